//! Handler trait and type erasure.
//!
//! # How handlers and decorators are stored
//!
//! A decorated operation is a stack of handlers of *different* concrete types:
//! the user's `async fn` at the bottom, one decorator per declaration above it.
//! Every layer is hidden behind the same trait object so the stack can be
//! folded at setup time and shared by every request afterwards.
//!
//! ```text
//! async fn hello(ctx, req) -> Response { … }       ← user writes this
//!        ↓ Operation::new("hello", hello)
//! hello.into_boxed_handler()                       ← Handler blanket impl
//!        ↓
//! Arc::new(FnHandler(hello))                       ← BoxedHandler
//!        ↓ chain::build folds decorators around it
//! Arc::new(Decorated { next, f })                  ← still a BoxedHandler
//!        ↓
//! handler.call(ctx, req)  at request time          ← one vtable dispatch per layer
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::RequestContext;
use crate::error::HandlerError;
use crate::request::Request;
use crate::response::{IntoResponse, Response};

/// What every layer of a handler stack resolves to.
pub type HandlerResult = Result<Response, HandlerError>;

/// A heap-allocated, type-erased future that resolves to a [`HandlerResult`].
pub type BoxFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send + 'static>>;

/// Dispatch interface shared by handlers and decorators.
///
/// Implement it directly for decorators that keep state (a rate limiter's
/// bucket, a logger's configuration); closures go through [`decorate_with`].
pub trait ErasedHandler {
    fn call(&self, ctx: RequestContext, req: Request) -> BoxFuture;
}

/// A type-erased handler node. Owns the layer below it.
pub type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

// ── Outcomes ──────────────────────────────────────────────────────────────────

/// Anything a handler may resolve to.
///
/// Infallible handlers return a response-like value; fallible ones return
/// `Result<T, E>` where the error converts into a [`HandlerError`].
pub trait IntoOutcome {
    fn into_outcome(self) -> HandlerResult;
}

macro_rules! infallible_outcome {
    ($($ty:ty),* $(,)?) => {
        $(
            impl IntoOutcome for $ty {
                fn into_outcome(self) -> HandlerResult { Ok(self.into_response()) }
            }
        )*
    };
}

infallible_outcome!(Response, &'static str, String, http::StatusCode);

impl<T, E> IntoOutcome for Result<T, E>
where
    T: IntoResponse,
    E: Into<HandlerError>,
{
    fn into_outcome(self) -> HandlerResult {
        self.map(IntoResponse::into_response).map_err(Into::into)
    }
}

// ── Public Handler trait ──────────────────────────────────────────────────────

/// Implemented for every valid operation handler.
///
/// Satisfied by any function with the signature:
///
/// ```text
/// async fn name(ctx: RequestContext, req: Request) -> impl IntoOutcome
/// ```
///
/// The trait is sealed: only the blanket impl below can satisfy it.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

mod private {
    pub trait Sealed {}
}

impl<F, Fut, R> private::Sealed for F
where
    F: Fn(RequestContext, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoOutcome + Send + 'static,
{
}

impl<F, Fut, R> Handler for F
where
    F: Fn(RequestContext, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoOutcome + Send + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

struct FnHandler<F>(F);

impl<F, Fut, R> ErasedHandler for FnHandler<F>
where
    F: Fn(RequestContext, Request) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoOutcome + Send + 'static,
{
    fn call(&self, ctx: RequestContext, req: Request) -> BoxFuture {
        let fut = (self.0)(ctx, req);
        Box::pin(async move { fut.await.into_outcome() })
    }
}

// ── Decorating closures ───────────────────────────────────────────────────────

/// Wraps `next` with an async closure that receives the wrapped handler.
///
/// The closure decides whether and how to call `next`. Returning without
/// calling it short-circuits the layers below.
///
/// ```rust
/// use plait::handler::{decorate_with, BoxedHandler};
///
/// fn require_token(next: BoxedHandler) -> BoxedHandler {
///     decorate_with(next, |next, ctx, req| async move {
///         if req.header_value("authorization").is_none() {
///             return Ok(plait::Response::status(http::StatusCode::UNAUTHORIZED));
///         }
///         next.call(ctx, req).await
///     })
/// }
/// ```
pub fn decorate_with<F, Fut>(next: BoxedHandler, f: F) -> BoxedHandler
where
    F: Fn(BoxedHandler, RequestContext, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(Decorated { next, f })
}

struct Decorated<F> {
    next: BoxedHandler,
    f: F,
}

impl<F, Fut> ErasedHandler for Decorated<F>
where
    F: Fn(BoxedHandler, RequestContext, Request) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, ctx: RequestContext, req: Request) -> BoxFuture {
        Box::pin((self.f)(Arc::clone(&self.next), ctx, req))
    }
}
