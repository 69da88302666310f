//! Tracing span tags derived from a request log.
//!
//! [`contribute`] reads a completed [`RequestLog`] and hands its transport
//! facts to a [`SpanCustomizer`]. [`TraceDecorator`] puts that together with
//! a `tracing` span around the inner handler.

use std::sync::Arc;

use http::uri::Scheme;
use http::{Uri, Version};
use tracing::{Instrument, Span, field};

use crate::context::RequestContext;
use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler};
use crate::log::{Milestone, RequestLog};
use crate::marker::Tag;
use crate::middleware::sampler::{Always, Sampler};
use crate::request::Request;

pub const HTTP_HOST: &str = "http.host";
pub const HTTP_URL: &str = "http.url";
pub const HTTP_PROTOCOL: &str = "http.protocol";
pub const HTTP_SERIALIZATION_FORMAT: &str = "http.serfmt";
pub const ADDRESS_REMOTE: &str = "address.remote";
pub const ADDRESS_LOCAL: &str = "address.local";

/// Something that accepts span tags and a span name.
pub trait SpanCustomizer {
    fn tag(&mut self, key: &'static str, value: &str);
    fn name(&mut self, name: &str);
}

/// Tags are recorded as span fields. The span must have been created with
/// those fields declared, otherwise `tracing` ignores them. The name is
/// recorded as `otel.name`.
impl SpanCustomizer for Span {
    fn tag(&mut self, key: &'static str, value: &str) {
        self.record(key, value);
    }

    fn name(&mut self, name: &str) {
        self.record("otel.name", name);
    }
}

/// Adds the standard request tags to `customizer`, skipping any value the
/// log does not have. An RPC request renames the span after its method.
pub fn contribute(log: &RequestLog, customizer: &mut impl SpanCustomizer) {
    if let Some(host) = host(log) {
        customizer.tag(HTTP_HOST, &host);
    }
    customizer.tag(HTTP_URL, &url(log));
    customizer.tag(HTTP_PROTOCOL, protocol(log.uri(), log.version()));
    if let Some(format) = log.serialization_format() {
        customizer.tag(HTTP_SERIALIZATION_FORMAT, format);
    }
    if let Some(addr) = log.remote_addr() {
        customizer.tag(ADDRESS_REMOTE, &addr.to_string());
    }
    if let Some(addr) = log.local_addr() {
        customizer.tag(ADDRESS_LOCAL, &addr.to_string());
    }
    if let Some(method) = log.request_content().and_then(|c| c.rpc_method().map(str::to_owned)) {
        customizer.name(&method);
    }
}

/// The authority as the client addressed it, port included.
fn host(log: &RequestLog) -> Option<String> {
    if let Some(authority) = log.uri().authority() {
        return Some(authority.as_str().to_owned());
    }
    let headers = log.request_headers()?;
    let host = headers.get(http::header::HOST)?.to_str().ok()?;
    Some(host.to_owned())
}

fn url(log: &RequestLog) -> String {
    let uri = log.uri();
    let path = uri.path_and_query().map_or("/", |pq| pq.as_str());
    match uri.authority() {
        Some(authority) => {
            let scheme = uri.scheme_str().unwrap_or("http");
            format!("{scheme}://{authority}{path}")
        }
        None => path.to_owned(),
    }
}

/// Session protocol: `h1`/`h2` over TLS, `h1c`/`h2c` in cleartext. A URI
/// without a scheme counts as cleartext.
fn protocol(uri: &Uri, version: Version) -> &'static str {
    let tls = uri.scheme() == Some(&Scheme::HTTPS);
    match version {
        Version::HTTP_3 => "h3",
        Version::HTTP_2 if tls => "h2",
        Version::HTTP_2 => "h2c",
        _ if tls => "h1",
        _ => "h1c",
    }
}

// ── TraceDecorator ────────────────────────────────────────────────────────────

/// Runs the inner handler inside an `INFO` span named `request` and fills in
/// the span's tags once the exchange completes.
#[derive(Clone)]
pub struct TraceDecorator {
    sampler: Arc<dyn Sampler>,
}

impl TraceDecorator {
    pub fn new() -> Self {
        Self { sampler: Arc::new(Always) }
    }

    /// Requests the sampler rejects run without a span.
    pub fn with_sampler(sampler: impl Sampler + 'static) -> Self {
        Self { sampler: Arc::new(sampler) }
    }

    pub fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        Arc::new(Traced { next, sampler: Arc::clone(&self.sampler) })
    }

    /// This decorator as a direct tag named `trace`.
    pub fn into_tag(self) -> Tag {
        Tag::wrap("trace", move |next| self.wrap(next))
    }
}

impl Default for TraceDecorator {
    fn default() -> Self { Self::new() }
}

struct Traced {
    next: BoxedHandler,
    sampler: Arc<dyn Sampler>,
}

impl ErasedHandler for Traced {
    fn call(&self, ctx: RequestContext, req: Request) -> BoxFuture {
        if !self.sampler.is_sampled(&ctx) {
            return self.next.call(ctx, req);
        }

        let span = tracing::info_span!(
            "request",
            otel.name = field::Empty,
            id = ctx.id(),
            http.method = %ctx.method(),
            http.host = field::Empty,
            http.url = field::Empty,
            http.protocol = field::Empty,
            http.serfmt = field::Empty,
            address.remote = field::Empty,
            address.local = field::Empty,
        );
        let mut recorded = span.clone();
        ctx.log().on(Milestone::Complete, move |log| contribute(log, &mut recorded));

        Box::pin(self.next.call(ctx, req).instrument(span))
    }
}
