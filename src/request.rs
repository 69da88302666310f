//! Request value type.

use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, Uri, Version};

use crate::content::Content;

/// A request flowing through a decorated handler.
///
/// The same type is used on the client side (a request about to be sent) and
/// on the server side (a request that was received). Building one never
/// fails: invalid header names or values passed to [`Request::header`] are
/// skipped with a `debug!` event.
#[derive(Clone, Debug)]
pub struct Request {
    pub(crate) method: Method,
    pub(crate) uri: Uri,
    pub(crate) version: Version,
    pub(crate) headers: HeaderMap,
    pub(crate) content: Content,
    pub(crate) trailers: HeaderMap,
}

impl Request {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            content: Content::Empty,
            trailers: HeaderMap::new(),
        }
    }

    pub fn get(uri: Uri) -> Self {
        Self::new(Method::GET, uri)
    }

    pub fn post(uri: Uri, content: impl Into<Content>) -> Self {
        Self::new(Method::POST, uri).content(content)
    }

    /// An RPC call to `service.method`, sent as a `POST` to `uri`.
    pub fn rpc(uri: Uri, service: &str, method: &str, payload: impl Into<bytes::Bytes>) -> Self {
        Self::new(Method::POST, uri).content(Content::Rpc {
            service: service.to_owned(),
            method: method.to_owned(),
            payload: payload.into(),
        })
    }

    pub fn version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    /// Appends a header. Returns `self` for chaining.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            (Ok(name), Ok(value)) => {
                self.headers.append(name, value);
            }
            _ => tracing::debug!(name, "skipping invalid request header"),
        }
        self
    }

    pub fn content(mut self, content: impl Into<Content>) -> Self {
        self.content = content.into();
        self
    }

    pub fn trailers(mut self, trailers: HeaderMap) -> Self {
        self.trailers = trailers;
        self
    }

    pub fn method(&self) -> &Method { &self.method }
    pub fn uri(&self) -> &Uri { &self.uri }
    pub fn http_version(&self) -> Version { self.version }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn body(&self) -> &Content { &self.content }
    pub fn trailer_map(&self) -> &HeaderMap { &self.trailers }

    /// Case-insensitive header lookup. Non-UTF-8 values read as `None`.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}
