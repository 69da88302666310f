//! Token-bucket rate limiting.
//!
//! Declared with [`RateLimitTag`]. Every request served by the built handler
//! draws one token from a bucket shared by all of them; an empty bucket
//! answers `429 Too Many Requests` without calling the inner handler.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use http::StatusCode;
use tracing::debug;

use crate::context::RequestContext;
use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler, HandlerResult};
use crate::marker::{CustomTag, Wrap};
use crate::request::Request;
use crate::response::Response;

/// Declarative rate limit, resolved by the `rate_limit` factory.
///
/// The bucket holds `permits_per_second` tokens and refills continuously at
/// that rate, so short bursts up to one second's worth are admitted.
#[derive(Clone, Debug)]
pub struct RateLimitTag {
    pub permits_per_second: u32,
    pub order: i32,
}

impl RateLimitTag {
    pub fn new(permits_per_second: u32) -> Self {
        Self { permits_per_second, order: 0 }
    }

    pub(crate) fn factory(tag: &RateLimitTag) -> Wrap {
        let bucket = Arc::new(TokenBucket::new(tag.permits_per_second));
        Arc::new(move |next| {
            Arc::new(RateLimited { next, bucket: Arc::clone(&bucket) }) as BoxedHandler
        })
    }
}

impl CustomTag for RateLimitTag {
    const FACTORY: &'static str = "rate_limit";

    fn order(&self) -> i32 { self.order }
}

struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(permits_per_second: u32) -> Self {
        let capacity = f64::from(permits_per_second);
        Self {
            capacity,
            refill_per_sec: capacity,
            state: Mutex::new(BucketState { tokens: capacity, last_refill: Instant::now() }),
        }
    }

    fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = now;

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

struct RateLimited {
    next: BoxedHandler,
    bucket: Arc<TokenBucket>,
}

impl ErasedHandler for RateLimited {
    fn call(&self, ctx: RequestContext, req: Request) -> BoxFuture {
        if self.bucket.try_acquire() {
            return self.next.call(ctx, req);
        }
        debug!(id = ctx.id(), uri = %ctx.uri(), "rate limited");
        let rejected: HandlerResult = Ok(Response::status(StatusCode::TOO_MANY_REQUESTS));
        Box::pin(std::future::ready(rejected))
    }
}
