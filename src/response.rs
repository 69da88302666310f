//! Response value type and the [`IntoResponse`] conversion trait.

use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};

use crate::content::Content;

// ── ContentType ───────────────────────────────────────────────────────────────

/// Common content-type values for use with [`ResponseBuilder::bytes`].
pub enum ContentType {
    Html,         // text/html; charset=utf-8
    Json,         // application/json
    OctetStream,  // application/octet-stream
    Text,         // text/plain; charset=utf-8
    Thrift,       // application/x-thrift
}

impl ContentType {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Html        => "text/html; charset=utf-8",
            Self::Json        => "application/json",
            Self::OctetStream => "application/octet-stream",
            Self::Text        => "text/plain; charset=utf-8",
            Self::Thrift      => "application/x-thrift",
        }
    }
}

// ── Response ─────────────────────────────────────────────────────────────────

/// A response produced by a handler.
///
/// # Shortcuts (200 OK)
///
/// ```rust
/// use plait::Response;
/// use http::StatusCode;
///
/// Response::json(br#"{"id":1}"#.to_vec());
/// Response::text("hello");
/// Response::status(StatusCode::NO_CONTENT);
/// ```
///
/// # Builder
///
/// ```rust
/// use plait::{ContentType, Response};
/// use http::StatusCode;
///
/// Response::builder()
///     .status(StatusCode::CREATED)
///     .header("location", "/users/42")
///     .json(br#"{"id":42}"#.to_vec());
///
/// Response::builder().bytes(ContentType::Thrift, vec![0x80, 0x01]);
/// ```
#[derive(Clone, Debug)]
pub struct Response {
    pub(crate) status: StatusCode,
    pub(crate) headers: HeaderMap,
    pub(crate) content: Content,
    pub(crate) trailers: HeaderMap,
}

impl Response {
    /// `200 OK`, `application/json`.
    pub fn json(body: Vec<u8>) -> Self {
        Self::builder().json(body)
    }

    /// `200 OK`, `text/plain; charset=utf-8`.
    pub fn text(body: impl Into<String>) -> Self {
        Self::builder().text(body)
    }

    /// Response with no body.
    pub fn status(status: StatusCode) -> Self {
        Self::builder().status(status).no_body()
    }

    /// Builder for responses that need a custom status, headers or trailers.
    pub fn builder() -> ResponseBuilder {
        ResponseBuilder {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            trailers: HeaderMap::new(),
        }
    }

    pub fn status_code(&self) -> StatusCode { self.status }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn body(&self) -> &Content { &self.content }
    pub fn trailers(&self) -> &HeaderMap { &self.trailers }

    /// Appends a header to a finished response, e.g. from a decorator.
    /// Invalid names or values are skipped.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        append(&mut self.headers, name, value);
        self
    }
}

// ── ResponseBuilder ───────────────────────────────────────────────────────────

/// Fluent builder for [`Response`].
///
/// Obtain via [`Response::builder()`]. Defaults to `200 OK`.
/// Terminated by a typed body method.
pub struct ResponseBuilder {
    status: StatusCode,
    headers: HeaderMap,
    trailers: HeaderMap,
}

impl ResponseBuilder {
    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Appends a header. Invalid names or values are skipped.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        append(&mut self.headers, name, value);
        self
    }

    /// Appends a trailer. Invalid names or values are skipped.
    pub fn trailer(mut self, name: &str, value: &str) -> Self {
        append(&mut self.trailers, name, value);
        self
    }

    /// Terminate with a JSON body (`application/json`).
    pub fn json(self, body: Vec<u8>) -> Response {
        self.finish(ContentType::Json, body.into())
    }

    /// Terminate with a plain-text body (`text/plain; charset=utf-8`).
    pub fn text(self, body: impl Into<String>) -> Response {
        self.finish(ContentType::Text, Content::from(body.into()))
    }

    /// Terminate with a typed body.
    pub fn bytes(self, content_type: ContentType, body: Vec<u8>) -> Response {
        self.finish(content_type, body.into())
    }

    /// Terminate with arbitrary content, e.g. an RPC reply.
    pub fn content(self, content_type: ContentType, content: Content) -> Response {
        self.finish(content_type, content)
    }

    /// Terminate with no body (e.g. `204 No Content`).
    pub fn no_body(self) -> Response {
        Response {
            status: self.status,
            headers: self.headers,
            content: Content::Empty,
            trailers: self.trailers,
        }
    }

    fn finish(mut self, content_type: ContentType, content: Content) -> Response {
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static(content_type.as_str()));
        Response {
            status: self.status,
            headers: self.headers,
            content,
            trailers: self.trailers,
        }
    }
}

fn append(map: &mut HeaderMap, name: &str, value: &str) {
    match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
        (Ok(name), Ok(value)) => {
            map.append(name, value);
        }
        _ => tracing::debug!(name, "skipping invalid response header"),
    }
}

// ── IntoResponse ──────────────────────────────────────────────────────────────

/// Conversion into a [`Response`].
///
/// Implement on your own types to return them directly from handlers.
pub trait IntoResponse {
    fn into_response(self) -> Response;
}

impl IntoResponse for Response {
    fn into_response(self) -> Response { self }
}

impl IntoResponse for &'static str {
    fn into_response(self) -> Response { Response::text(self) }
}

impl IntoResponse for String {
    fn into_response(self) -> Response { Response::text(self) }
}

/// Return a bare status from a handler: `return StatusCode::NOT_FOUND`
impl IntoResponse for StatusCode {
    fn into_response(self) -> Response { Response::status(self) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_content_type_and_keeps_custom_headers() {
        let res = Response::builder()
            .status(StatusCode::CREATED)
            .header("location", "/users/99")
            .trailer("grpc-status", "0")
            .json(b"{}".to_vec());

        assert_eq!(res.status_code(), StatusCode::CREATED);
        assert_eq!(res.headers()["content-type"], "application/json");
        assert_eq!(res.headers()["location"], "/users/99");
        assert_eq!(res.trailers()["grpc-status"], "0");
    }

    #[test]
    fn status_only_responses_have_no_body() {
        let res = StatusCode::NO_CONTENT.into_response();
        assert!(res.body().is_empty());
        assert!(res.headers().is_empty());
    }
}
