//! Request/response logging.
//!
//! [`LoggingDecorator`] never touches the data path. For every sampled
//! request it registers two lifecycle listeners on the request's
//! [`RequestLog`]: one at [`Milestone::RequestEnd`] that logs the request and
//! one at [`Milestone::Complete`] that logs the response or the failure.
//! Every logged field passes through a sanitizer first; a sanitizer that
//! returns `None` drops the field from the line.
//!
//! ```rust
//! use plait::middleware::logging::LoggingDecorator;
//! use plait::middleware::sampler::Ratio;
//! use tracing::Level;
//!
//! let logging = LoggingDecorator::builder()
//!     .request_level(Level::DEBUG)
//!     .request_headers_sanitizer(|_| None)
//!     .sampler(Ratio::new(0.1))
//!     .build();
//! # let _ = logging;
//! ```

use std::fmt::{self, Write as _};
use std::sync::Arc;

use http::HeaderMap;
use tracing::Level;

use crate::content::Content;
use crate::context::RequestContext;
use crate::error::HandlerError;
use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler};
use crate::log::{Milestone, RequestLog};
use crate::marker::{CustomTag, Tag, Wrap};
use crate::middleware::sampler::{Always, Sampler};
use crate::request::Request;

type HeadersSanitizer = Arc<dyn Fn(&HeaderMap) -> Option<String> + Send + Sync>;
type ContentSanitizer = Arc<dyn Fn(&Content) -> Option<String> + Send + Sync>;
type CauseSanitizer = Arc<dyn Fn(&HandlerError) -> Option<String> + Send + Sync>;

/// Emits an event at a level only known at runtime.
macro_rules! emit {
    ($level:expr, $($arg:tt)+) => {{
        let level: Level = $level;
        if level == Level::ERROR {
            tracing::error!($($arg)+)
        } else if level == Level::WARN {
            tracing::warn!($($arg)+)
        } else if level == Level::INFO {
            tracing::info!($($arg)+)
        } else if level == Level::DEBUG {
            tracing::debug!($($arg)+)
        } else {
            tracing::trace!($($arg)+)
        }
    }};
}

/// Whether the active subscriber wants events at `level` from this module.
fn level_enabled(level: Level) -> bool {
    if level == Level::ERROR {
        tracing::enabled!(Level::ERROR)
    } else if level == Level::WARN {
        tracing::enabled!(Level::WARN)
    } else if level == Level::INFO {
        tracing::enabled!(Level::INFO)
    } else if level == Level::DEBUG {
        tracing::enabled!(Level::DEBUG)
    } else {
        tracing::enabled!(Level::TRACE)
    }
}

// ── LoggingDecorator ──────────────────────────────────────────────────────────

/// Logs requests and responses through lifecycle listeners.
///
/// Cheap to clone; every handler it wraps shares one configuration.
#[derive(Clone)]
pub struct LoggingDecorator {
    config: Arc<Config>,
}

struct Config {
    request_level: Level,
    success_level: Level,
    failure_level: Level,
    request_headers: HeadersSanitizer,
    request_content: ContentSanitizer,
    request_trailers: HeadersSanitizer,
    response_headers: HeadersSanitizer,
    response_content: ContentSanitizer,
    response_trailers: HeadersSanitizer,
    cause: CauseSanitizer,
    sampler: Arc<dyn Sampler>,
}

impl LoggingDecorator {
    /// Logs everything verbatim: requests and successful responses at `INFO`,
    /// failed responses at `WARN`.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> LoggingDecoratorBuilder {
        LoggingDecoratorBuilder::default()
    }

    /// Wraps `next`. The returned handler produces exactly what `next` does.
    pub fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        Arc::new(Logged { next, config: Arc::clone(&self.config) })
    }

    /// This decorator as a direct tag named `logging`.
    pub fn into_tag(self) -> Tag {
        Tag::wrap("logging", move |next| self.wrap(next))
    }
}

impl Default for LoggingDecorator {
    fn default() -> Self { Self::new() }
}

impl fmt::Debug for LoggingDecorator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggingDecorator")
            .field("request_level", &self.config.request_level)
            .field("success_level", &self.config.success_level)
            .field("failure_level", &self.config.failure_level)
            .finish_non_exhaustive()
    }
}

struct Logged {
    next: BoxedHandler,
    config: Arc<Config>,
}

impl ErasedHandler for Logged {
    fn call(&self, ctx: RequestContext, req: Request) -> BoxFuture {
        if self.config.sampler.is_sampled(&ctx) {
            let config = Arc::clone(&self.config);
            ctx.log().on(Milestone::RequestEnd, move |log| config.log_request(log));
            let config = Arc::clone(&self.config);
            ctx.log().on(Milestone::Complete, move |log| config.log_response(log));
        }
        self.next.call(ctx, req)
    }
}

impl Config {
    fn log_request(&self, log: &RequestLog) {
        if !level_enabled(self.request_level) {
            return;
        }
        let line = self.render_request(log);
        emit!(self.request_level, id = log.id(), "request: {line}");
    }

    /// A failed exchange whose request line was filtered out logs the request
    /// too, at the failure level.
    fn log_response(&self, log: &RequestLog) {
        let level = self.response_level(log);
        if !level_enabled(level) {
            return;
        }
        if log.cause().is_some() && !level_enabled(self.request_level) {
            let line = self.render_request(log);
            emit!(level, id = log.id(), "request: {line}");
        }
        let line = self.render_response(log);
        emit!(level, id = log.id(), "response: {line}");
    }

    fn response_level(&self, log: &RequestLog) -> Level {
        if log.cause().is_some() { self.failure_level } else { self.success_level }
    }

    fn render_request(&self, log: &RequestLog) -> String {
        let mut line = format!("{} {}", log.method(), log.uri());
        field(&mut line, "headers", log.request_headers().filter(|h| !h.is_empty()).and_then(|h| (self.request_headers)(&h)));
        field(&mut line, "content", log.request_content().filter(|c| !c.is_empty()).and_then(|c| (self.request_content)(&c)));
        field(&mut line, "trailers", log.request_trailers().filter(|h| !h.is_empty()).and_then(|h| (self.request_trailers)(&h)));
        line
    }

    fn render_response(&self, log: &RequestLog) -> String {
        let mut line = match log.status() {
            Some(status) => status.to_string(),
            None => "-".to_owned(),
        };
        field(&mut line, "headers", log.response_headers().filter(|h| !h.is_empty()).and_then(|h| (self.response_headers)(&h)));
        field(&mut line, "content", log.response_content().filter(|c| !c.is_empty()).and_then(|c| (self.response_content)(&c)));
        field(&mut line, "trailers", log.response_trailers().filter(|h| !h.is_empty()).and_then(|h| (self.response_trailers)(&h)));
        field(&mut line, "cause", log.cause().and_then(|c| (self.cause)(&c)));
        if let Some(elapsed) = log.total_duration() {
            let _ = write!(line, " duration={elapsed:?}");
        }
        line
    }
}

fn field(line: &mut String, key: &str, value: Option<String>) {
    if let Some(value) = value {
        let _ = write!(line, " {key}={value}");
    }
}

// ── Builder ───────────────────────────────────────────────────────────────────

/// Builder for [`LoggingDecorator`].
pub struct LoggingDecoratorBuilder {
    config: Config,
}

impl Default for LoggingDecoratorBuilder {
    fn default() -> Self {
        let headers: HeadersSanitizer = Arc::new(|h: &HeaderMap| Some(format!("{h:?}")));
        let content: ContentSanitizer = Arc::new(|c: &Content| Some(c.to_string()));
        Self {
            config: Config {
                request_level: Level::INFO,
                success_level: Level::INFO,
                failure_level: Level::WARN,
                request_headers: Arc::clone(&headers),
                request_content: Arc::clone(&content),
                request_trailers: Arc::clone(&headers),
                response_headers: Arc::clone(&headers),
                response_content: content,
                response_trailers: headers,
                cause: Arc::new(|c: &HandlerError| Some(c.to_string())),
                sampler: Arc::new(Always),
            },
        }
    }
}

macro_rules! sanitizer_setters {
    ($($(#[$doc:meta])* $setter:ident => $field:ident: $input:ty;)+) => {
        $(
            $(#[$doc])*
            pub fn $setter<F>(mut self, sanitizer: F) -> Self
            where
                F: Fn(&$input) -> Option<String> + Send + Sync + 'static,
            {
                self.config.$field = Arc::new(sanitizer);
                self
            }
        )+
    };
}

impl LoggingDecoratorBuilder {
    pub fn request_level(mut self, level: Level) -> Self {
        self.config.request_level = level;
        self
    }

    pub fn success_response_level(mut self, level: Level) -> Self {
        self.config.success_level = level;
        self
    }

    /// Level used when the exchange completes with a cause.
    pub fn failure_response_level(mut self, level: Level) -> Self {
        self.config.failure_level = level;
        self
    }

    sanitizer_setters! {
        request_headers_sanitizer => request_headers: HeaderMap;
        request_content_sanitizer => request_content: Content;
        request_trailers_sanitizer => request_trailers: HeaderMap;
        response_headers_sanitizer => response_headers: HeaderMap;
        response_content_sanitizer => response_content: Content;
        response_trailers_sanitizer => response_trailers: HeaderMap;
        /// Renders the failure cause. Returning `None` logs the failure without it.
        cause_sanitizer => cause: HandlerError;
    }

    /// Which requests are logged. Defaults to [`Always`].
    pub fn sampler(mut self, sampler: impl Sampler + 'static) -> Self {
        self.config.sampler = Arc::new(sampler);
        self
    }

    pub fn build(self) -> LoggingDecorator {
        LoggingDecorator { config: Arc::new(self.config) }
    }
}

// ── LoggingTag ────────────────────────────────────────────────────────────────

/// Declarative logging, resolved by the `logging` factory.
///
/// Quieter than [`LoggingDecorator::new`]: requests and successes at `TRACE`,
/// failures at `WARN`.
#[derive(Clone, Debug)]
pub struct LoggingTag {
    pub request_level: Level,
    pub success_level: Level,
    pub failure_level: Level,
    pub order: i32,
}

impl Default for LoggingTag {
    fn default() -> Self {
        Self {
            request_level: Level::TRACE,
            success_level: Level::TRACE,
            failure_level: Level::WARN,
            order: 0,
        }
    }
}

impl LoggingTag {
    pub fn with_levels(request: Level, success: Level, failure: Level) -> Self {
        Self {
            request_level: request,
            success_level: success,
            failure_level: failure,
            ..Self::default()
        }
    }

    pub(crate) fn factory(tag: &LoggingTag) -> Wrap {
        let decorator = LoggingDecorator::builder()
            .request_level(tag.request_level)
            .success_response_level(tag.success_level)
            .failure_response_level(tag.failure_level)
            .build();
        Arc::new(move |next| decorator.wrap(next))
    }
}

impl CustomTag for LoggingTag {
    const FACTORY: &'static str = "logging";

    fn order(&self) -> i32 { self.order }
}
