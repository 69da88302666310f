//! Minimal plait example: one unit, a few decorators, requests served in-process.
//!
//! Run with:
//!   RUST_LOG=trace cargo run --example basic
//!
//! The log lines show the chain being bound, then each request passing through
//! the rate limiter, the logging decorators and the trace span. The third
//! `GET /users/42` is rejected with 429 before reaching the handler.

use http::{Method, StatusCode, Uri};
use plait::handler::{BoxedHandler, decorate_with};
use plait::middleware::logging::{LoggingDecorator, LoggingTag};
use plait::middleware::rate_limit::RateLimitTag;
use plait::middleware::trace::TraceDecorator;
use plait::{
    DecoratorRegistry, HandlerError, Milestone, Operation, Request, RequestContext, Response, Tag,
    Unit,
};
use tracing::{Level, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let logging = LoggingDecorator::builder()
        .request_headers_sanitizer(|_| None)
        .failure_response_level(Level::ERROR)
        .build();

    let users = Unit::new("Users")
        .decorate(TraceDecorator::new().into_tag().order(100))
        .decorate(Tag::decorator("request_id", request_id))
        .operation(
            Operation::new("get_user", get_user)
                .route(Method::GET, "/users/{id}")
                .decorate(logging.into_tag())
                .decorate(Tag::custom(RateLimitTag::new(2)).order(-1)),
        )
        .operation(
            Operation::new("create_user", create_user)
                .route(Method::POST, "/users")
                .decorate(Tag::custom(LoggingTag::with_levels(Level::INFO, Level::INFO, Level::WARN))),
        )
        .bind(&DecoratorRegistry::new())?;

    for op in &users {
        info!(operation = op.name(), chain = ?op.chain().names(), "ready");
    }

    let get_user = &users[0];
    for _ in 0..3 {
        let req = Request::get(Uri::from_static("http://localhost:3000/users/42"));
        let ctx = RequestContext::builder(&req).build();
        let log = ctx.log().clone();
        log.on(Milestone::Complete, |log| {
            info!(id = log.id(), status = ?log.status(), elapsed = ?log.total_duration(), "done");
        });
        let res = get_user.call(ctx, req).await.map_err(|err| err.to_string())?;
        info!(status = %res.status_code(), body = %res.body(), "GET /users/42");
        log.reached(Milestone::Complete).await;
    }

    let create_user = &users[1];
    for body in [r#"{"name":"alice"}"#, ""] {
        let req = Request::post(Uri::from_static("http://localhost:3000/users"), body);
        let ctx = RequestContext::builder(&req).build();
        let log = ctx.log().clone();
        match create_user.call(ctx, req).await {
            Ok(res) => info!(status = %res.status_code(), "POST /users"),
            Err(err) => info!(%err, "POST /users failed"),
        }
        log.reached(Milestone::Complete).await;
    }

    Ok(())
}

// Tags every response with the request id.
fn request_id(next: BoxedHandler) -> BoxedHandler {
    decorate_with(next, |next, ctx, req| async move {
        let id = ctx.id().to_string();
        next.call(ctx, req).await.map(|res| res.with_header("x-request-id", &id))
    })
}

async fn get_user(_ctx: RequestContext, req: Request) -> Response {
    let id = req.uri().path().rsplit('/').next().unwrap_or("unknown");
    Response::json(format!(r#"{{"id":"{id}","name":"alice"}}"#).into_bytes())
}

async fn create_user(_ctx: RequestContext, req: Request) -> Result<Response, HandlerError> {
    if req.body().is_empty() {
        return Err(HandlerError::new("empty body"));
    }
    Ok(Response::builder()
        .status(StatusCode::CREATED)
        .header("location", "/users/99")
        .json(req.body().bytes().map(|b| b.to_vec()).unwrap_or_default()))
}
