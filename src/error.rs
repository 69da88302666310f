//! Error types.
//!
//! Three families, one per place they surface:
//!
//! - [`Error`]: setup-time configuration failures. Returned by
//!   [`Unit::bind`](crate::Unit::bind) and [`chain::build`](crate::chain::build).
//!   Fatal to setup, never retried.
//! - [`HandlerError`]: a failure raised by a handler. It travels unmodified
//!   through every decorator layer and ends up as the request log's cause.
//! - [`ListenerError`]: a failure inside a lifecycle listener. Reported to an
//!   [`ErrorReporter`](crate::log::ErrorReporter), never propagated.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

/// Boxed error accepted from user code.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Configuration error raised while binding a unit or building a chain.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A custom tag names a factory that is not in the registry.
    #[error("no decorator factory registered under `{factory}`")]
    UnknownFactory { factory: &'static str },

    /// The tag instance handed to a factory is not the type it was registered for.
    #[error("factory `{factory}` expects a `{expected}` tag")]
    TagMismatch {
        factory: &'static str,
        expected: &'static str,
    },

    /// An operation was bound without an invocation path.
    #[error("operation `{unit}::{operation}` has no route; call `Operation::route` before binding")]
    MissingRoute {
        unit: String,
        operation: String,
    },

    /// A request context was built with no tokio runtime to run its listeners on.
    #[error("no tokio runtime available for lifecycle listeners; pass one with `RequestContextBuilder::handle`")]
    NoRuntime,
}

/// An error produced by a handler or a decorator.
///
/// Cheap to clone: the same instance is returned to the caller and recorded
/// as the request log's cause.
#[derive(Clone)]
pub struct HandlerError(Arc<dyn StdError + Send + Sync + 'static>);

impl HandlerError {
    pub fn new(err: impl Into<BoxError>) -> Self {
        Self(Arc::from(err.into()))
    }

    /// The cause recorded when a dispatch is dropped before it completes.
    pub fn cancelled() -> Self {
        Self(Arc::new(Cancelled))
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.is::<Cancelled>()
    }

    /// The cause recorded when a handler panics during a dispatch.
    pub fn panicked(message: impl Into<String>) -> Self {
        Self(Arc::new(Panicked(message.into())))
    }

    pub fn is_panicked(&self) -> bool {
        self.0.is::<Panicked>()
    }

    pub fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
        &*self.0
    }
}

/// Any error type converts, so handlers can use `?` freely.
///
/// `HandlerError` itself does not implement `std::error::Error`, which is what
/// keeps this blanket impl coherent.
impl<E> From<E> for HandlerError
where
    E: StdError + Send + Sync + 'static,
{
    fn from(err: E) -> Self {
        Self(Arc::new(err))
    }
}

impl fmt::Debug for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("request was cancelled before it completed")]
struct Cancelled;

#[derive(Debug, thiserror::Error)]
#[error("handler panicked: {0}")]
struct Panicked(String);

/// A failure inside a lifecycle listener.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("listener failed: {0}")]
    Failed(#[source] BoxError),

    #[error("listener panicked: {0}")]
    Panicked(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_error_keeps_the_source_message() {
        let err: HandlerError = std::io::Error::other("upstream reset").into();
        assert_eq!(err.to_string(), "upstream reset");
        assert!(!err.is_cancelled());
        assert!(err.as_error().is::<std::io::Error>());
    }

    #[test]
    fn cancelled_is_recognisable() {
        let err = HandlerError::cancelled();
        assert!(err.is_cancelled());
        assert_eq!(err.clone().to_string(), "request was cancelled before it completed");
        assert!(!err.is_panicked());
    }

    #[test]
    fn panicked_is_distinct_from_cancelled() {
        let err = HandlerError::panicked("index out of bounds");
        assert!(err.is_panicked());
        assert!(!err.is_cancelled());
        assert_eq!(err.to_string(), "handler panicked: index out of bounds");
    }

    #[test]
    fn configuration_errors_name_the_culprit() {
        let err = Error::UnknownFactory { factory: "audit" };
        assert_eq!(err.to_string(), "no decorator factory registered under `audit`");
    }
}
