//! Decorator declarations.
//!
//! A handling unit and each of its operations carry [`Declaration`]s. Each
//! declaration holds one or more [`Tag`]s, and the scanner turns every tag into
//! a [`Marker`]: the immutable record the ordering engine and chain builder
//! work on.
//!
//! There are two kinds of tag:
//!
//! - **Direct**: [`Tag::decorator`] carries the decorating function itself.
//! - **Custom**: [`Tag::custom`] carries a value of a type implementing
//!   [`CustomTag`]. The type names the factory that turns it into a decorator;
//!   the factory is looked up in a [`DecoratorRegistry`](crate::DecoratorRegistry)
//!   when the chain is built.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::handler::BoxedHandler;

/// A decorating function: takes the handler below, returns the wrapped one.
pub type Wrap = Arc<dyn Fn(BoxedHandler) -> BoxedHandler + Send + Sync>;

/// A user-defined declaration type backed by a registered factory.
///
/// ```rust
/// use plait::CustomTag;
///
/// struct Audit { channel: &'static str }
///
/// impl CustomTag for Audit {
///     const FACTORY: &'static str = "audit";
/// }
/// ```
pub trait CustomTag: Any + Send + Sync {
    /// Registry key of the factory that builds this tag's decorator.
    const FACTORY: &'static str;

    /// Position in the decorator order. Lower runs further inside.
    fn order(&self) -> i32 {
        0
    }
}

/// Marks a [`CustomTag`] that may be declared several times on one target.
pub trait Repeatable: CustomTag {}

/// Which scope a declaration was found on.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Scope {
    Unit,
    Operation,
}

/// What a marker resolves to when the chain is built.
#[derive(Clone)]
pub enum Target {
    /// The tag carries the decorating function.
    Decorator { name: &'static str, wrap: Wrap },
    /// The tag is handed to the factory registered under this key.
    Factory(&'static str),
}

impl Target {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Decorator { name, .. } => *name,
            Self::Factory(factory) => *factory,
        }
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decorator { name, .. } => f.debug_tuple("Decorator").field(name).finish(),
            Self::Factory(factory) => f.debug_tuple("Factory").field(factory).finish(),
        }
    }
}

// ── Tags ──────────────────────────────────────────────────────────────────────

/// A single declaration as written on a unit or an operation.
#[derive(Clone)]
pub struct Tag {
    target: Target,
    priority: Option<i32>,
    instance: Arc<dyn Any + Send + Sync>,
}

impl Tag {
    /// A direct reference to a decorating function.
    ///
    /// `name` identifies the decorator in logs and in
    /// [`OrderedChain::names`](crate::OrderedChain::names).
    pub fn decorator(name: &'static str, wrap: fn(BoxedHandler) -> BoxedHandler) -> Self {
        Self {
            target: Target::Decorator { name, wrap: Arc::new(wrap) },
            priority: None,
            instance: Arc::new(()),
        }
    }

    /// A direct reference to a decorating closure, e.g. a configured
    /// [`LoggingDecorator`](crate::middleware::logging::LoggingDecorator).
    pub fn wrap<F>(name: &'static str, wrap: F) -> Self
    where
        F: Fn(BoxedHandler) -> BoxedHandler + Send + Sync + 'static,
    {
        Self {
            target: Target::Decorator { name, wrap: Arc::new(wrap) },
            priority: None,
            instance: Arc::new(()),
        }
    }

    /// A factory-backed tag. Its priority comes from [`CustomTag::order`].
    pub fn custom<T: CustomTag>(tag: T) -> Self {
        Self {
            target: Target::Factory(T::FACTORY),
            priority: Some(tag.order()),
            instance: Arc::new(tag),
        }
    }

    /// Sets an explicit priority. Lower priorities end up further inside.
    pub fn order(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tag")
            .field("target", &self.target)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

/// One entry in a unit's or an operation's declaration list.
#[derive(Clone, Debug)]
pub enum Declaration {
    Single(Tag),
    /// Container of repeated custom tags, kept in declaration order.
    Repeated(Vec<Tag>),
}

impl Declaration {
    /// Several instances of the same repeatable tag.
    pub fn repeated<T: Repeatable>(tags: impl IntoIterator<Item = T>) -> Self {
        Self::Repeated(tags.into_iter().map(Tag::custom).collect())
    }
}

impl From<Tag> for Declaration {
    fn from(tag: Tag) -> Self {
        Self::Single(tag)
    }
}

// ── Marker ────────────────────────────────────────────────────────────────────

/// A scanned declaration, ready to be ordered and built.
#[derive(Clone)]
pub struct Marker {
    target: Target,
    priority: i32,
    instance: Arc<dyn Any + Send + Sync>,
    scope: Scope,
    index: usize,
}

impl Marker {
    pub(crate) fn new(tag: &Tag, scope: Scope, index: usize) -> Self {
        Self {
            target: tag.target.clone(),
            priority: tag.priority.unwrap_or(0),
            instance: Arc::clone(&tag.instance),
            scope,
            index,
        }
    }

    pub fn target(&self) -> &Target { &self.target }
    pub fn priority(&self) -> i32 { self.priority }
    pub fn scope(&self) -> Scope { self.scope }
    pub fn index(&self) -> usize { self.index }
    pub fn name(&self) -> &'static str { self.target.name() }

    /// The source tag instance, if it is a `T`.
    pub fn tag<T: Any>(&self) -> Option<&T> {
        self.instance.downcast_ref::<T>()
    }
}

impl fmt::Debug for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Marker")
            .field("target", &self.target)
            .field("priority", &self.priority)
            .field("scope", &self.scope)
            .field("index", &self.index)
            .finish()
    }
}
