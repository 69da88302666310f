//! Request context and dispatch.
//!
//! The [`RequestContext`] is what the transport hands to a handler stack next
//! to the request itself: addresses, an id, and the request's
//! [`RequestLog`]. [`dispatch`] drives a built handler stack for one request
//! and keeps the log's milestones in step with it.

use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::FutureExt as _;
use http::{Method, Uri};
use tokio::runtime::Handle;
use tracing::{trace, warn};

use crate::error::{Error, HandlerError};
use crate::handler::{BoxedHandler, HandlerResult};
use crate::log::{ErrorReporter, RequestHead, RequestLog, TracingReporter, panic_message};
use crate::request::Request;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Per-request context passed through every layer of a handler stack.
///
/// Cloning is cheap: all clones share one [`RequestLog`].
#[derive(Clone, Debug)]
pub struct RequestContext {
    log: Arc<RequestLog>,
}

impl RequestContext {
    /// Starts building the context for `req`.
    pub fn builder(req: &Request) -> RequestContextBuilder {
        RequestContextBuilder {
            method: req.method().clone(),
            uri: req.uri().clone(),
            version: req.http_version(),
            serialization_format: None,
            remote_addr: None,
            local_addr: None,
            reporter: Arc::new(TracingReporter),
            runtime: None,
        }
    }

    pub fn log(&self) -> &Arc<RequestLog> { &self.log }
    pub fn id(&self) -> u64 { self.log.id() }
    pub fn method(&self) -> &Method { self.log.method() }
    pub fn uri(&self) -> &Uri { self.log.uri() }
    pub fn remote_addr(&self) -> Option<SocketAddr> { self.log.remote_addr() }
    pub fn local_addr(&self) -> Option<SocketAddr> { self.log.local_addr() }
}

/// Builder for [`RequestContext`].
pub struct RequestContextBuilder {
    method: Method,
    uri: Uri,
    version: http::Version,
    serialization_format: Option<String>,
    remote_addr: Option<SocketAddr>,
    local_addr: Option<SocketAddr>,
    reporter: Arc<dyn ErrorReporter>,
    runtime: Option<Handle>,
}

impl RequestContextBuilder {
    pub fn remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    pub fn local_addr(mut self, addr: SocketAddr) -> Self {
        self.local_addr = Some(addr);
        self
    }

    /// Serialization format of an RPC exchange, e.g. `"tbinary"` or `"json"`.
    pub fn serialization_format(mut self, format: impl Into<String>) -> Self {
        self.serialization_format = Some(format.into());
        self
    }

    /// Where listener failures for this request are reported.
    /// Defaults to [`TracingReporter`].
    pub fn reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Runtime that runs this request's lifecycle listeners. Needed when the
    /// context is built from code that is not itself inside a runtime.
    pub fn handle(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Creates the context and its request log, spawning the log's listener
    /// executor on the configured [`handle`](Self::handle) or, failing that,
    /// on the current runtime.
    pub fn try_build(self) -> Result<RequestContext, Error> {
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|_| Error::NoRuntime)?,
        };
        let head = RequestHead {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            method: self.method,
            uri: self.uri,
            version: self.version,
            serialization_format: self.serialization_format,
            remote_addr: self.remote_addr,
            local_addr: self.local_addr,
        };
        Ok(RequestContext { log: RequestLog::new(head, self.reporter, &runtime) })
    }

    /// Like [`try_build`](Self::try_build).
    ///
    /// # Panics
    ///
    /// Panics if no [`handle`](Self::handle) was given and this is called
    /// outside a tokio runtime.
    pub fn build(self) -> RequestContext {
        match self.try_build() {
            Ok(ctx) => ctx,
            Err(err) => panic!("{err}"),
        }
    }
}

// ── Dispatch ──────────────────────────────────────────────────────────────────

/// Runs one request through `handler`, driving the log's milestones.
///
/// The request's headers, content and trailers are recorded and the request is
/// ended before the handler runs. Once the handler resolves, the response is
/// recorded and the log completes; a handler error becomes the log's cause and
/// is returned unchanged. A panicking handler completes the log with a
/// [`HandlerError::panicked`] cause, which is also what the caller gets back.
///
/// The log is armed as soon as this is called: if the returned future is
/// dropped early, even before it is first polled, the log completes with a
/// [`HandlerError::cancelled`] cause.
pub fn dispatch(
    handler: &BoxedHandler,
    ctx: RequestContext,
    req: Request,
) -> impl Future<Output = HandlerResult> + Send + 'static {
    let handler = Arc::clone(handler);
    let log = Arc::clone(ctx.log());
    let guard = CompleteOnDrop(Some(Arc::clone(&log)));

    async move {
        log.set_request_headers(req.headers().clone());
        log.set_request_content(req.body().clone());
        log.set_request_trailers(req.trailer_map().clone());
        log.end_request();

        let outcome = match AssertUnwindSafe(handler.call(ctx, req)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(payload) => {
                let message = panic_message(&*payload);
                warn!(id = log.id(), panic = %message, "handler panicked");
                Err(HandlerError::panicked(message))
            }
        };
        guard.disarm();

        match &outcome {
            Ok(res) => {
                log.start_response(res.status_code(), res.headers().clone());
                log.set_response_content(res.body().clone());
                log.set_response_trailers(res.trailers().clone());
                log.end_response(None);
            }
            Err(cause) => {
                log.end_response(Some(cause.clone()));
            }
        }
        outcome
    }
}

/// Completes the log with a cancellation cause unless disarmed.
struct CompleteOnDrop(Option<Arc<RequestLog>>);

impl CompleteOnDrop {
    fn disarm(mut self) {
        self.0 = None;
    }
}

impl Drop for CompleteOnDrop {
    fn drop(&mut self) {
        if let Some(log) = self.0.take() {
            trace!(id = log.id(), "dispatch dropped before completion");
            log.end_response(Some(HandlerError::cancelled()));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use http::{StatusCode, Uri};

    use super::*;
    use crate::handler::Handler;
    use crate::log::Milestone;
    use crate::response::Response;

    async fn echo(_ctx: RequestContext, req: Request) -> Response {
        Response::builder()
            .header("x-echo", "1")
            .text(req.body().to_string())
    }

    async fn failing(_ctx: RequestContext, _req: Request) -> Result<Response, std::io::Error> {
        Err(std::io::Error::other("backend unavailable"))
    }

    async fn stuck(_ctx: RequestContext, _req: Request) -> Response {
        std::future::pending::<()>().await;
        Response::text("unreachable")
    }

    #[tokio::test]
    async fn context_exposes_transport_addresses() {
        let req = Request::get(Uri::from_static("http://example.com/a"));
        let remote: SocketAddr = "10.0.0.1:5000".parse().unwrap();
        let ctx = RequestContext::builder(&req).remote_addr(remote).build();

        assert_eq!(ctx.remote_addr(), Some(remote));
        assert_eq!(ctx.local_addr(), None);
        assert_eq!(ctx.uri().path(), "/a");
        assert_ne!(ctx.id(), RequestContext::builder(&req).build().id());
    }

    #[tokio::test]
    async fn successful_dispatch_records_both_sides() {
        let req = Request::post(Uri::from_static("/echo"), "ping").header("x-in", "1");
        let ctx = RequestContext::builder(&req).build();
        let log = Arc::clone(ctx.log());

        let res = dispatch(&echo.into_boxed_handler(), ctx, req).await.unwrap();
        assert_eq!(res.body().to_string(), "ping");

        assert!(log.reached(Milestone::Complete).await);
        assert_eq!(log.status(), Some(StatusCode::OK));
        assert_eq!(log.request_headers().unwrap()["x-in"], "1");
        assert_eq!(log.response_headers().unwrap()["x-echo"], "1");
        assert_eq!(log.response_content().map(|c| c.to_string()), Some("ping".to_owned()));
        assert!(log.cause().is_none());
    }

    #[tokio::test]
    async fn handler_error_is_returned_and_recorded() {
        let req = Request::get(Uri::from_static("/"));
        let ctx = RequestContext::builder(&req).build();
        let log = Arc::clone(ctx.log());

        let err = dispatch(&failing.into_boxed_handler(), ctx, req).await.unwrap_err();
        assert_eq!(err.to_string(), "backend unavailable");

        assert!(log.reached(Milestone::Complete).await);
        assert!(!log.reached(Milestone::ResponseStart).await);
        assert_eq!(log.cause().unwrap().to_string(), "backend unavailable");
    }

    #[tokio::test]
    async fn cancelled_dispatch_still_completes_once() {
        let req = Request::get(Uri::from_static("/"));
        let ctx = RequestContext::builder(&req).build();
        let log = Arc::clone(ctx.log());

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        log.on(Milestone::Complete, move |log| {
            tx.send(log.cause().is_some_and(|c| c.is_cancelled())).unwrap();
        });

        let handler = stuck.into_boxed_handler();
        let timed_out = tokio::time::timeout(Duration::from_millis(10), dispatch(&handler, ctx, req)).await;
        assert!(timed_out.is_err());

        assert_eq!(rx.recv().await, Some(true));
        assert_eq!(rx.recv().await, None);
        assert!(!log.end_response(None));
    }

    #[tokio::test]
    async fn dispatch_dropped_before_first_poll_completes_as_cancelled() {
        let req = Request::get(Uri::from_static("/"));
        let ctx = RequestContext::builder(&req).build();
        let log = Arc::clone(ctx.log());

        let call = dispatch(&echo.into_boxed_handler(), ctx, req);
        drop(call);

        assert!(log.reached(Milestone::Complete).await);
        assert!(!log.is_reached(Milestone::RequestEnd));
        assert!(log.cause().unwrap().is_cancelled());
    }

    #[tokio::test]
    async fn panicking_handler_completes_with_a_panic_cause() {
        async fn explode(_ctx: RequestContext, _req: Request) -> Response {
            panic!("index out of range");
        }

        let req = Request::get(Uri::from_static("/"));
        let ctx = RequestContext::builder(&req).build();
        let log = Arc::clone(ctx.log());

        let err = dispatch(&explode.into_boxed_handler(), ctx, req).await.unwrap_err();
        assert!(err.is_panicked());
        assert!(!err.is_cancelled());
        assert_eq!(err.to_string(), "handler panicked: index out of range");

        assert!(log.reached(Milestone::Complete).await);
        assert!(log.cause().unwrap().is_panicked());
    }

    #[test]
    fn try_build_outside_a_runtime_fails() {
        let req = Request::get(Uri::from_static("/"));
        let err = RequestContext::builder(&req).try_build().err().unwrap();
        assert!(matches!(err, Error::NoRuntime));
    }

    #[test]
    fn explicit_handle_runs_listeners_outside_a_runtime() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let req = Request::get(Uri::from_static("/"));
        let ctx = RequestContext::builder(&req).handle(rt.handle().clone()).build();

        let (tx, rx) = std::sync::mpsc::channel();
        ctx.log().on(Milestone::Complete, move |log| {
            tx.send(log.cause().is_none()).unwrap();
        });
        assert!(ctx.log().end_response(None));

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(true));
    }
}
