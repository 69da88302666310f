//! Chain building.
//!
//! Turns an [`OrderedChain`] into a live handler stack. Direct tags already
//! carry their decorating function; custom tags are resolved through the
//! [`DecoratorRegistry`], which maps a factory key to a function from the tag
//! instance to a decorator.
//!
//! The fold runs left to right, so the **last** marker in the chain ends up
//! outermost: it sees the request first and the response last.
//!
//! ```text
//! chain = [d1, d2, d3]
//! built = d3(d2(d1(base)))
//! ```

use std::any::type_name;
use std::collections::HashMap;
use std::sync::Arc;

use tracing::trace;

use crate::error::Error;
use crate::handler::BoxedHandler;
use crate::marker::{CustomTag, Marker, Target, Wrap};
use crate::middleware::logging::LoggingTag;
use crate::middleware::rate_limit::RateLimitTag;
use crate::order::OrderedChain;

type Factory = Arc<dyn Fn(&Marker) -> Result<Wrap, Error> + Send + Sync>;

/// Lookup table from factory key to decorator constructor.
///
/// [`DecoratorRegistry::new`] comes with the built-in `logging` and
/// `rate_limit` factories; [`DecoratorRegistry::empty`] has none.
#[derive(Clone)]
pub struct DecoratorRegistry {
    factories: HashMap<&'static str, Factory>,
}

impl DecoratorRegistry {
    pub fn new() -> Self {
        Self::empty()
            .register::<LoggingTag, _>(LoggingTag::factory)
            .register::<RateLimitTag, _>(RateLimitTag::factory)
    }

    pub fn empty() -> Self {
        Self { factories: HashMap::new() }
    }

    /// Registers the factory for tag type `T` under `T::FACTORY`.
    /// A later registration for the same key replaces the earlier one.
    pub fn register<T, F>(mut self, factory: F) -> Self
    where
        T: CustomTag,
        F: Fn(&T) -> Wrap + Send + Sync + 'static,
    {
        let erased: Factory = Arc::new(move |marker: &Marker| {
            marker.tag::<T>().map(&factory).ok_or(Error::TagMismatch {
                factory: T::FACTORY,
                expected: type_name::<T>(),
            })
        });
        self.factories.insert(T::FACTORY, erased);
        self
    }

    pub fn contains(&self, factory: &str) -> bool {
        self.factories.contains_key(factory)
    }

    /// Resolves one marker to its decorating function.
    pub fn resolve(&self, marker: &Marker) -> Result<Wrap, Error> {
        match marker.target() {
            Target::Decorator { wrap, .. } => Ok(Arc::clone(wrap)),
            Target::Factory(key) => {
                let factory = self
                    .factories
                    .get(key)
                    .ok_or(Error::UnknownFactory { factory: *key })?;
                factory(marker)
            }
        }
    }
}

impl Default for DecoratorRegistry {
    fn default() -> Self { Self::new() }
}

/// Folds the decorators of `chain` around `base`.
///
/// Every marker is resolved before anything is wrapped, so a configuration
/// error leaves no half-built stack behind.
pub fn build(
    registry: &DecoratorRegistry,
    chain: &OrderedChain,
    base: BoxedHandler,
) -> Result<BoxedHandler, Error> {
    let wraps = chain
        .iter()
        .map(|marker| registry.resolve(marker))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(chain.iter().zip(wraps).fold(base, |next, (marker, wrap)| {
        trace!(decorator = marker.name(), priority = marker.priority(), "wrapping");
        wrap(next)
    }))
}
