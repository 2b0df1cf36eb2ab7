//! HTTP message model shared by the flow engine, expression languages, and
//! the transport layer.

use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use http::{Method, StatusCode};

/// Read access common to requests and responses, used by expression
/// evaluation and problem-detail negotiation.
pub trait HttpMessage: Send + Sync {
    /// Message headers.
    fn headers(&self) -> &HeaderMap;

    /// Raw message body.
    fn body(&self) -> &Bytes;

    /// Value of the `Content-Type` header, if present and valid UTF-8.
    fn content_type(&self) -> Option<&str> {
        self.headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    fn body_text(&self) -> String {
        String::from_utf8_lossy(self.body()).into_owned()
    }

    /// Whether the content type denotes JSON (`application/json`, `+json`).
    fn is_json(&self) -> bool {
        self.content_type()
            .is_some_and(|ct| media_type(ct).ends_with("json"))
    }

    /// Whether the content type denotes XML (`text/xml`, `application/xml`, `+xml`).
    fn is_xml(&self) -> bool {
        self.content_type()
            .is_some_and(|ct| media_type(ct).ends_with("xml"))
    }
}

/// Strips parameters (`; charset=...`) and lowercases a content type.
fn media_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// Inbound HTTP request.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    /// Request target as received: origin-form (`/a?b`) or absolute-form.
    pub uri: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Request {
    /// Creates a request with no headers and an empty body.
    #[must_use]
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Shorthand for a `GET` request.
    #[must_use]
    pub fn get(uri: impl Into<String>) -> Self {
        Self::new(Method::GET, uri)
    }

    /// Shorthand for a `POST` request.
    #[must_use]
    pub fn post(uri: impl Into<String>) -> Self {
        Self::new(Method::POST, uri)
    }

    /// Adds a header. Invalid names or values are ignored.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        set_header(&mut self.headers, name, value);
        self
    }

    /// Replaces the body and updates `Content-Length`.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.set_body(body);
        self
    }

    /// Sets the `Content-Type` header.
    #[must_use]
    pub fn with_content_type(self, content_type: &str) -> Self {
        self.with_header(CONTENT_TYPE.as_str(), content_type)
    }

    /// Replaces the body and updates `Content-Length`.
    pub fn set_body(&mut self, body: impl Into<Bytes>) {
        self.body = body.into();
        self.headers
            .insert(CONTENT_LENGTH, HeaderValue::from(self.body.len()));
    }

    /// Path component of the URI, without query string.
    #[must_use]
    pub fn path(&self) -> &str {
        let without_scheme = match self.uri.find("://") {
            Some(idx) => {
                let rest = &self.uri[idx + 3..];
                rest.find('/').map_or("/", |slash| &rest[slash..])
            }
            None => self.uri.as_str(),
        };
        without_scheme
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
    }

    /// Query string of the URI, without the leading `?`.
    #[must_use]
    pub fn query(&self) -> Option<&str> {
        self.uri
            .split_once('?')
            .map(|(_, q)| q.split('#').next().unwrap_or_default())
    }

    /// Path plus query, as forwarded to a backend.
    #[must_use]
    pub fn path_and_query(&self) -> String {
        match self.query() {
            Some(q) => format!("{}?{q}", self.path()),
            None => self.path().to_string(),
        }
    }

    /// Host header without port.
    #[must_use]
    pub fn host(&self) -> Option<&str> {
        self.headers
            .get(http::header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(|h| h.rsplit_once(':').map_or(h, |(host, _)| host))
    }
}

impl HttpMessage for Request {
    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn body(&self) -> &Bytes {
        &self.body
    }
}

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

/// Outbound HTTP response.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Response {
    /// Creates a response with the given status, no headers, and an empty body.
    #[must_use]
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Shorthand for `200 OK`.
    #[must_use]
    pub fn ok() -> Self {
        Self::new(StatusCode::OK)
    }

    /// Adds a header. Invalid names or values are ignored.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        set_header(&mut self.headers, name, value);
        self
    }

    /// Replaces the body and updates `Content-Length`.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.set_body(body);
        self
    }

    /// Sets the `Content-Type` header.
    #[must_use]
    pub fn with_content_type(self, content_type: &str) -> Self {
        self.with_header(CONTENT_TYPE.as_str(), content_type)
    }

    /// Replaces the body and updates `Content-Length`.
    pub fn set_body(&mut self, body: impl Into<Bytes>) {
        self.body = body.into();
        self.headers
            .insert(CONTENT_LENGTH, HeaderValue::from(self.body.len()));
    }
}

impl HttpMessage for Response {
    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn body(&self) -> &Bytes {
        &self.body
    }
}

/// Inserts a header, silently skipping names or values that are not valid HTTP.
pub fn set_header(headers: &mut HeaderMap, name: &str, value: &str) {
    if let (Ok(name), Ok(value)) = (
        HeaderName::from_bytes(name.as_bytes()),
        HeaderValue::from_str(value),
    ) {
        headers.insert(name, value);
    }
}
