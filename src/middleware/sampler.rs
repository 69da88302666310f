//! Sampling predicates.

use crate::context::RequestContext;

/// Decides whether a request is observed by a logging or tracing decorator.
///
/// Samplers are pure: the same context always yields the same answer.
/// Any `Fn(&RequestContext) -> bool` is a sampler.
pub trait Sampler: Send + Sync {
    fn is_sampled(&self, ctx: &RequestContext) -> bool;
}

impl<F> Sampler for F
where
    F: Fn(&RequestContext) -> bool + Send + Sync,
{
    fn is_sampled(&self, ctx: &RequestContext) -> bool {
        self(ctx)
    }
}

/// Samples every request.
#[derive(Clone, Copy, Debug, Default)]
pub struct Always;

impl Sampler for Always {
    fn is_sampled(&self, _ctx: &RequestContext) -> bool { true }
}

/// Samples nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct Never;

impl Sampler for Never {
    fn is_sampled(&self, _ctx: &RequestContext) -> bool { false }
}

/// Samples a fixed share of requests, chosen by request id.
#[derive(Clone, Copy, Debug)]
pub struct Ratio {
    per_million: u64,
}

impl Ratio {
    /// `rate` is clamped to `0.0..=1.0`.
    pub fn new(rate: f64) -> Self {
        let rate = if rate.is_nan() { 0.0 } else { rate.clamp(0.0, 1.0) };
        Self { per_million: (rate * 1_000_000.0).round() as u64 }
    }
}

impl Sampler for Ratio {
    fn is_sampled(&self, ctx: &RequestContext) -> bool {
        // Fibonacci hashing spreads sequential ids evenly.
        let bucket = (ctx.id().wrapping_mul(0x9E37_79B9_7F4A_7C15) >> 32) % 1_000_000;
        bucket < self.per_million
    }
}

#[cfg(test)]
mod tests {
    use http::Uri;

    use super::*;
    use crate::request::Request;

    fn contexts(n: usize) -> Vec<RequestContext> {
        let req = Request::get(Uri::from_static("/"));
        (0..n).map(|_| RequestContext::builder(&req).build()).collect()
    }

    #[tokio::test]
    async fn fixed_samplers() {
        let ctx = &contexts(1)[0];
        assert!(Always.is_sampled(ctx));
        assert!(!Never.is_sampled(ctx));
        assert!((|c: &RequestContext| c.uri().path() == "/").is_sampled(ctx));
    }

    #[tokio::test]
    async fn ratio_extremes_and_determinism() {
        let all = contexts(200);
        assert!(all.iter().all(|c| Ratio::new(1.0).is_sampled(c)));
        assert!(all.iter().all(|c| !Ratio::new(0.0).is_sampled(c)));
        assert!(all.iter().all(|c| !Ratio::new(f64::NAN).is_sampled(c)));

        let half = Ratio::new(0.5);
        let first: Vec<bool> = all.iter().map(|c| half.is_sampled(c)).collect();
        let second: Vec<bool> = all.iter().map(|c| half.is_sampled(c)).collect();
        assert_eq!(first, second);
        let sampled = first.iter().filter(|s| **s).count();
        assert!(sampled > 0 && sampled < all.len());
    }
}
