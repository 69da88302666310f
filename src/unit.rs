//! Handling units and their operations.
//!
//! A [`Unit`] groups operations that share unit-scope declarations. Binding a
//! unit scans, orders and builds every operation once; the resulting
//! [`BoundOperation`]s are what a transport keeps for the lifetime of the
//! service and calls per request.
//!
//! ```rust,no_run
//! use plait::{DecoratorRegistry, Operation, Request, RequestContext, Response, Tag, Unit};
//! use plait::middleware::logging::LoggingTag;
//! use http::Method;
//!
//! async fn hello(_ctx: RequestContext, _req: Request) -> Response {
//!     Response::text("hello")
//! }
//!
//! # fn main() -> Result<(), plait::Error> {
//! let bound = Unit::new("Greeter")
//!     .decorate(Tag::custom(LoggingTag::default()))
//!     .operation(Operation::new("hello", hello).route(Method::GET, "/hello"))
//!     .bind(&DecoratorRegistry::new())?;
//! # Ok(())
//! # }
//! ```

use http::Method;
use tracing::debug;

use crate::chain::{self, DecoratorRegistry};
use crate::context::{RequestContext, dispatch};
use crate::error::Error;
use crate::handler::{BoxedHandler, Handler, HandlerResult};
use crate::marker::Declaration;
use crate::order::{OrderedChain, merge};
use crate::request::Request;
use crate::scan::scan;

/// Where an operation is reachable. Matching requests to routes is the
/// transport's business; this is carried through for it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Route {
    pub method: Method,
    pub path: String,
}

/// A single addressable operation of a unit.
pub struct Operation {
    name: String,
    route: Option<Route>,
    declarations: Vec<Declaration>,
    handler: BoxedHandler,
}

impl Operation {
    pub fn new(name: impl Into<String>, handler: impl Handler) -> Self {
        Self {
            name: name.into(),
            route: None,
            declarations: Vec::new(),
            handler: handler.into_boxed_handler(),
        }
    }

    pub fn route(mut self, method: Method, path: impl Into<String>) -> Self {
        self.route = Some(Route { method, path: path.into() });
        self
    }

    /// Adds an operation-scope declaration. Returns `self` for chaining.
    pub fn decorate(mut self, declaration: impl Into<Declaration>) -> Self {
        self.declarations.push(declaration.into());
        self
    }

    pub fn name(&self) -> &str { &self.name }
    pub fn declarations(&self) -> &[Declaration] { &self.declarations }
}

/// A handling unit: a named group of operations with shared declarations.
pub struct Unit {
    name: String,
    declarations: Vec<Declaration>,
    operations: Vec<Operation>,
}

impl Unit {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            declarations: Vec::new(),
            operations: Vec::new(),
        }
    }

    /// Adds a unit-scope declaration, applied to every operation.
    pub fn decorate(mut self, declaration: impl Into<Declaration>) -> Self {
        self.declarations.push(declaration.into());
        self
    }

    pub fn operation(mut self, operation: Operation) -> Self {
        self.operations.push(operation);
        self
    }

    pub fn name(&self) -> &str { &self.name }
    pub fn declarations(&self) -> &[Declaration] { &self.declarations }

    /// The decorator order of the operation called `name`, without building it.
    pub fn chain_for(&self, name: &str) -> Option<OrderedChain> {
        let operation = self.operations.iter().find(|op| op.name == name)?;
        let scanned = scan(self, operation);
        Some(merge(scanned.unit, scanned.operation))
    }

    /// Scans, orders and builds every operation.
    ///
    /// Fails on the first operation without a route or with a declaration the
    /// registry cannot resolve.
    pub fn bind(&self, registry: &DecoratorRegistry) -> Result<Vec<BoundOperation>, Error> {
        self.operations
            .iter()
            .map(|operation| self.bind_operation(registry, operation))
            .collect()
    }

    fn bind_operation(
        &self,
        registry: &DecoratorRegistry,
        operation: &Operation,
    ) -> Result<BoundOperation, Error> {
        let route = operation.route.clone().ok_or_else(|| Error::MissingRoute {
            unit: self.name.clone(),
            operation: operation.name.clone(),
        })?;

        let scanned = scan(self, operation);
        let chain = merge(scanned.unit, scanned.operation);
        let handler = chain::build(registry, &chain, operation.handler.clone())?;

        debug!(
            unit = %self.name,
            operation = %operation.name,
            method = %route.method,
            path = %route.path,
            decorators = ?chain.names(),
            "bound operation"
        );

        Ok(BoundOperation {
            unit: self.name.clone(),
            name: operation.name.clone(),
            route,
            chain,
            handler,
        })
    }
}

/// An operation with its decorator stack built. Cheap to share; immutable.
#[derive(Clone)]
pub struct BoundOperation {
    unit: String,
    name: String,
    route: Route,
    chain: OrderedChain,
    handler: BoxedHandler,
}

impl BoundOperation {
    pub fn unit(&self) -> &str { &self.unit }
    pub fn name(&self) -> &str { &self.name }
    pub fn route(&self) -> &Route { &self.route }
    pub fn chain(&self) -> &OrderedChain { &self.chain }
    pub fn handler(&self) -> &BoxedHandler { &self.handler }

    /// Runs one request through the decorated operation. See [`dispatch`];
    /// the request log is armed before the returned future is first polled.
    pub fn call(
        &self,
        ctx: RequestContext,
        req: Request,
    ) -> impl Future<Output = HandlerResult> + Send + 'static {
        dispatch(&self.handler, ctx, req)
    }
}

#[cfg(test)]
mod tests {
    use http::Uri;

    use super::*;
    use crate::response::Response;

    async fn hello(_ctx: RequestContext, _req: Request) -> Response {
        Response::text("hello")
    }

    #[test]
    fn operation_without_route_fails_to_bind() {
        let err = Unit::new("Greeter")
            .operation(Operation::new("hello", hello))
            .bind(&DecoratorRegistry::new())
            .err()
            .unwrap();
        assert_eq!(
            err.to_string(),
            "operation `Greeter::hello` has no route; call `Operation::route` before binding"
        );
    }

    #[tokio::test]
    async fn bound_operation_serves_requests() {
        let bound = Unit::new("Greeter")
            .operation(Operation::new("hello", hello).route(Method::GET, "/hello"))
            .bind(&DecoratorRegistry::new())
            .unwrap();

        assert_eq!(bound.len(), 1);
        assert_eq!(bound[0].route().path, "/hello");
        assert!(bound[0].chain().is_empty());

        let req = Request::get(Uri::from_static("/hello"));
        let ctx = RequestContext::builder(&req).build();
        let res = bound[0].call(ctx, req).await.unwrap();
        assert_eq!(res.body().to_string(), "hello");
    }

    #[test]
    fn chain_for_unknown_operation_is_none() {
        assert!(Unit::new("Greeter").chain_for("missing").is_none());
    }
}
