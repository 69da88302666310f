use std::sync::{Arc, Mutex};
use std::time::Duration;

use http::{Method, StatusCode, Uri};
use plait::handler::{BoxedHandler, decorate_with};
use plait::{
    DecoratorRegistry, ErrorReporter, HandlerError, ListenerError, Milestone, Operation, Request,
    RequestContext, Response, Tag, Unit,
};
use tokio::sync::mpsc;

#[derive(Default)]
struct Collect(Mutex<Vec<String>>);

impl ErrorReporter for Collect {
    fn report(&self, milestone: Milestone, error: &ListenerError) {
        self.0.lock().unwrap().push(format!("{milestone:?}: {error}"));
    }
}

async fn hello(_ctx: RequestContext, _req: Request) -> Response {
    Response::builder().header("x-served-by", "hello").text("hello")
}

async fn broken(_ctx: RequestContext, _req: Request) -> Result<Response, HandlerError> {
    Err(HandlerError::new("no backend"))
}

async fn slow(_ctx: RequestContext, _req: Request) -> Response {
    tokio::time::sleep(Duration::from_secs(60)).await;
    Response::text("late")
}

/// A decorator that records every milestone it observes, in firing order.
fn observing(events: mpsc::UnboundedSender<String>) -> Tag {
    Tag::wrap("observe", move |next: BoxedHandler| {
        let events = events.clone();
        decorate_with(next, move |next, ctx, req| {
            for milestone in [Milestone::Complete, Milestone::ResponseStart, Milestone::RequestEnd] {
                let events = events.clone();
                ctx.log().on(milestone, move |log| {
                    let status = log.status().map(|s| s.as_u16());
                    let _ = events.send(format!("{milestone:?} {status:?}"));
                });
            }
            async move { next.call(ctx, req).await }
        })
    })
}

fn bind(handler: Operation, tag: Tag) -> plait::BoundOperation {
    Unit::new("Svc")
        .operation(handler.route(Method::GET, "/").decorate(tag))
        .bind(&DecoratorRegistry::new())
        .unwrap()
        .remove(0)
}

async fn drain(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<String> {
    let mut seen = Vec::new();
    while let Some(event) = rx.recv().await {
        seen.push(event);
    }
    seen
}

#[tokio::test]
async fn milestones_fire_in_lifecycle_order() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let op = bind(Operation::new("hello", hello), observing(tx));

    let req = Request::get(Uri::from_static("/"));
    let ctx = RequestContext::builder(&req).build();
    let res = op.call(ctx, req).await.unwrap();
    assert_eq!(res.status_code(), StatusCode::OK);
    drop(op);

    // Registered Complete-first; they still fire in lifecycle order.
    assert_eq!(
        drain(&mut rx).await,
        ["RequestEnd None", "ResponseStart Some(200)", "Complete Some(200)"]
    );
}

#[tokio::test]
async fn failure_skips_response_start() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let op = bind(Operation::new("broken", broken), observing(tx));

    let req = Request::get(Uri::from_static("/"));
    let ctx = RequestContext::builder(&req).build();
    let log = Arc::clone(ctx.log());
    let err = op.call(ctx, req).await.unwrap_err();
    assert_eq!(err.to_string(), "no backend");
    drop(op);

    assert_eq!(drain(&mut rx).await, ["RequestEnd None", "Complete None"]);
    assert_eq!(log.cause().map(|c| c.to_string()).as_deref(), Some("no backend"));
}

#[tokio::test]
async fn cancelled_call_completes_once_with_a_cancellation_cause() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let op = bind(Operation::new("slow", slow), observing(tx));

    let req = Request::get(Uri::from_static("/"));
    let ctx = RequestContext::builder(&req).build();
    let log = Arc::clone(ctx.log());
    let outcome = tokio::time::timeout(Duration::from_millis(20), op.call(ctx, req)).await;
    assert!(outcome.is_err());
    drop(op);

    assert_eq!(drain(&mut rx).await, ["RequestEnd None", "Complete None"]);
    assert!(log.cause().unwrap().is_cancelled());
}

#[tokio::test]
async fn listener_failures_are_reported_and_contained() {
    let reporter = Arc::new(Collect::default());
    let op = bind(Operation::new("hello", hello), Tag::decorator("noop", |next| next));

    let req = Request::get(Uri::from_static("/"));
    let ctx = RequestContext::builder(&req).reporter(reporter.clone()).build();
    let log = Arc::clone(ctx.log());

    let (tx, rx) = tokio::sync::oneshot::channel();
    log.add_listener(Milestone::Complete, |_| Err("disk full".into()));
    log.on(Milestone::Complete, |_| panic!("listener bug"));
    log.on(Milestone::Complete, move |log| {
        let _ = tx.send(log.status());
    });

    let res = op.call(ctx, req).await.unwrap();
    assert_eq!(res.body().to_string(), "hello");
    assert_eq!(rx.await.unwrap(), Some(StatusCode::OK));

    assert_eq!(
        *reporter.0.lock().unwrap(),
        [
            "Complete: listener failed: disk full",
            "Complete: listener panicked: listener bug",
        ]
    );
}

#[tokio::test]
async fn late_listener_sees_frozen_fields() {
    let op = bind(Operation::new("hello", hello), Tag::decorator("noop", |next| next));

    let req = Request::get(Uri::from_static("/")).header("x-in", "1");
    let ctx = RequestContext::builder(&req).build();
    let log = Arc::clone(ctx.log());
    op.call(ctx, req).await.unwrap();
    assert!(log.reached(Milestone::Complete).await);

    assert!(!log.set_request_headers(http::HeaderMap::new()));
    assert!(!log.set_response_content("rewritten".into()));

    let (tx, rx) = tokio::sync::oneshot::channel();
    log.on(Milestone::RequestEnd, move |log| {
        let headers = log.request_headers().unwrap_or_default();
        let content = log.response_content().map(|c| c.to_string());
        let _ = tx.send((headers.get("x-in").is_some(), content));
    });
    assert_eq!(rx.await.unwrap(), (true, Some("hello".to_owned())));
    assert_eq!(log.pending_listeners(Milestone::RequestEnd), 0);
}

#[tokio::test]
async fn call_dropped_before_first_poll_still_completes() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let op = bind(Operation::new("hello", hello), observing(tx));

    let req = Request::get(Uri::from_static("/"));
    let ctx = RequestContext::builder(&req).build();
    let log = Arc::clone(ctx.log());
    let (done_tx, done_rx) = tokio::sync::oneshot::channel();
    log.on(Milestone::Complete, move |log| {
        let _ = done_tx.send(log.cause().map(|c| c.is_cancelled()));
    });

    // The decorators never run, so `observing` registers nothing.
    drop(op.call(ctx, req));
    drop(op);

    assert_eq!(done_rx.await.unwrap(), Some(true));
    assert!(drain(&mut rx).await.is_empty());
}
