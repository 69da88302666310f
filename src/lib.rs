//! # plait
//!
//! Declarative decorator ordering and per-request lifecycle events for async
//! request/response handlers.
//!
//! Transport, routing and wire formats belong to whatever sits around this
//! crate. What is left is the part every client and server shares:
//!
//! - **Decorator discovery.** A [`Unit`] and each of its [`Operation`]s carry
//!   declarations. They are scanned from both scopes, sorted by priority
//!   (stable, unit scope first on ties) and folded around the operation's
//!   handler once, when the unit is bound.
//! - **Lifecycle events.** Every request gets a [`RequestLog`] whose fields
//!   freeze at three [`Milestone`]s. Decorators register listeners instead of
//!   sitting on the data path; listeners run later, in order, on a per-request
//!   executor.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use http::{Method, Uri};
//! use plait::middleware::logging::LoggingTag;
//! use plait::middleware::rate_limit::RateLimitTag;
//! use plait::{DecoratorRegistry, Operation, Request, RequestContext, Response, Tag, Unit};
//!
//! async fn get_user(_ctx: RequestContext, req: Request) -> Response {
//!     Response::text(format!("user at {}", req.uri().path()))
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), plait::Error> {
//!     let users = Unit::new("Users")
//!         .decorate(Tag::custom(LoggingTag::default()))
//!         .operation(
//!             Operation::new("get_user", get_user)
//!                 .route(Method::GET, "/users/{id}")
//!                 .decorate(Tag::custom(RateLimitTag::new(100)).order(-1)),
//!         )
//!         .bind(&DecoratorRegistry::new())?;
//!
//!     // The transport picks the operation and builds the context.
//!     let req = Request::get(Uri::from_static("/users/7"));
//!     let ctx = RequestContext::builder(&req).build();
//!     let res = users[0].call(ctx, req).await;
//!     assert!(res.is_ok());
//!     Ok(())
//! }
//! ```

mod content;
mod context;
mod error;
mod marker;
mod order;
mod request;
mod response;
mod unit;

pub mod chain;
pub mod handler;
pub mod log;
pub mod middleware;
pub mod scan;

pub use chain::DecoratorRegistry;
pub use content::Content;
pub use context::{RequestContext, RequestContextBuilder, dispatch};
pub use error::{BoxError, Error, HandlerError, ListenerError};
pub use handler::{BoxedHandler, Handler, HandlerResult};
pub use log::{ErrorReporter, Milestone, RequestLog, TracingReporter};
pub use marker::{CustomTag, Declaration, Marker, Repeatable, Scope, Tag, Target, Wrap};
pub use order::{OrderedChain, merge};
pub use request::Request;
pub use response::{ContentType, IntoResponse, Response, ResponseBuilder};
pub use unit::{BoundOperation, Operation, Route, Unit};
