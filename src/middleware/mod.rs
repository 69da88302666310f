//! Built-in decorators.
//!
//! Logging and tracing observe a request through its
//! [`RequestLog`](crate::RequestLog) and leave the data path alone; the rate
//! limiter is the only one here that can answer on the inner handler's behalf.
//!
//! - [`logging`]: request and response log lines, sampled and sanitized
//! - [`trace`]: a `tracing` span per request, tagged from the log
//! - [`rate_limit`]: token-bucket admission, `429` when exhausted
//! - [`sampler`]: the predicates deciding which requests are observed

pub mod logging;
pub mod rate_limit;
pub mod sampler;
pub mod trace;
