//! Problem-detail responses (RFC 9457 style) for errors raised inside the
//! flow engine.
//!
//! In production mode only `title`, `type` and `see` are rendered. Development
//! mode adds the detail text, extension fields, the error chain, and an
//! `attention` note reminding operators that internals are being exposed.

use http::header::{ACCEPT, CONTENT_TYPE};
use http::StatusCode;
use serde_json::{Map, Value as Json};

use crate::exchange::Exchange;
use crate::message::{HttpMessage, Response};
use crate::outcome::Flow;

/// Base URI for `type` and `see` identifiers.
pub const PROBLEM_BASE_URI: &str = "https://flowgate.dev/problems";

pub const APPLICATION_PROBLEM_JSON: &str = "application/problem+json";
pub const APPLICATION_PROBLEM_XML: &str = "application/problem+xml";

const ATTENTION: &str = "This problem detail was generated in development mode and may expose \
internal details. Run the gateway in production mode to suppress them.";

/// Broad problem category; selects the default status and the `type` prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProblemKind {
    /// Caused by the client's request (400).
    User,
    /// Access denied (403).
    Security,
    /// Failure inside the gateway (500).
    Internal,
    /// Failure talking to a backend (502).
    Gateway,
}

impl ProblemKind {
    fn segment(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Security => "security",
            Self::Internal => "internal",
            Self::Gateway => "gateway",
        }
    }

    fn default_status(self) -> StatusCode {
        match self {
            Self::User => StatusCode::BAD_REQUEST,
            Self::Security => StatusCode::FORBIDDEN,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Gateway => StatusCode::BAD_GATEWAY,
        }
    }
}

/// Builder for a problem-detail document.
#[derive(Debug, Clone)]
pub struct ProblemDetails {
    production: bool,
    kind: ProblemKind,
    component: String,
    subtypes: Vec<String>,
    see_subtypes: Vec<String>,
    status: Option<StatusCode>,
    title: Option<String>,
    detail: Option<String>,
    flow: Option<Flow>,
    extensions: Map<String, Json>,
    error_chain: Vec<String>,
}

impl ProblemDetails {
    fn new(kind: ProblemKind, production: bool, component: &str) -> Self {
        Self {
            production,
            kind,
            component: component.to_string(),
            subtypes: Vec::new(),
            see_subtypes: Vec::new(),
            status: None,
            title: None,
            detail: None,
            flow: None,
            extensions: Map::new(),
            error_chain: Vec::new(),
        }
    }

    #[must_use]
    pub fn user(production: bool, component: &str) -> Self {
        Self::new(ProblemKind::User, production, component)
    }

    #[must_use]
    pub fn security(production: bool, component: &str) -> Self {
        Self::new(ProblemKind::Security, production, component)
    }

    #[must_use]
    pub fn internal(production: bool, component: &str) -> Self {
        Self::new(ProblemKind::Internal, production, component)
    }

    #[must_use]
    pub fn gateway(production: bool, component: &str) -> Self {
        Self::new(ProblemKind::Gateway, production, component)
    }

    /// Appends a path segment to the `type` URI.
    #[must_use]
    pub fn add_subtype(mut self, subtype: &str) -> Self {
        self.subtypes.push(slug(subtype));
        self
    }

    /// Appends a path segment to the `see` URI.
    #[must_use]
    pub fn add_see(mut self, segment: &str) -> Self {
        self.see_subtypes.push(slug(segment));
        self
    }

    #[must_use]
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    #[must_use]
    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    #[must_use]
    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn component(mut self, component: &str) -> Self {
        self.component = component.to_string();
        self
    }

    #[must_use]
    pub fn flow(mut self, flow: Flow) -> Self {
        self.flow = Some(flow);
        self
    }

    /// Adds an extension field, rendered in development mode only.
    #[must_use]
    pub fn internal_field(mut self, key: &str, value: impl Into<Json>) -> Self {
        self.extensions.insert(key.to_string(), value.into());
        self
    }

    /// Records an error and its `source()` chain, rendered in development mode only.
    #[must_use]
    pub fn error(mut self, error: &(dyn std::error::Error + 'static)) -> Self {
        let mut current = Some(error);
        while let Some(err) = current {
            self.error_chain.push(err.to_string());
            current = err.source();
        }
        self
    }

    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        self.status.unwrap_or_else(|| self.kind.default_status())
    }

    #[must_use]
    pub fn type_uri(&self) -> String {
        let mut uri = format!("{PROBLEM_BASE_URI}/{}", self.kind.segment());
        for subtype in &self.subtypes {
            uri.push('/');
            uri.push_str(subtype);
        }
        uri
    }

    fn see_uri(&self) -> Option<String> {
        let component = slug(&self.component);
        if component.is_empty() {
            return None;
        }
        let mut uri = format!("{PROBLEM_BASE_URI}/{}/{component}", self.kind.segment());
        if let Some(flow) = self.flow {
            uri.push('/');
            uri.push_str(flow.as_str());
        }
        for segment in &self.see_subtypes {
            uri.push('/');
            uri.push_str(segment);
        }
        Some(uri)
    }

    fn default_title(&self) -> &'static str {
        match self.kind {
            ProblemKind::User => "Invalid request.",
            ProblemKind::Security => "Access denied.",
            ProblemKind::Internal => "Internal server error.",
            ProblemKind::Gateway => "Bad gateway.",
        }
    }

    /// Fields in rendering order.
    fn fields(&self) -> Map<String, Json> {
        let mut map = Map::new();
        map.insert(
            "title".into(),
            Json::String(
                self.title
                    .clone()
                    .unwrap_or_else(|| self.default_title().to_string()),
            ),
        );
        map.insert("type".into(), Json::String(self.type_uri()));
        if let Some(see) = self.see_uri() {
            map.insert("see".into(), Json::String(see));
        }
        if self.production {
            return map;
        }
        if let Some(detail) = &self.detail {
            map.insert("detail".into(), Json::String(detail.clone()));
        }
        for (key, value) in &self.extensions {
            map.insert(key.clone(), value.clone());
        }
        if let Some((message, causes)) = self.error_chain.split_first() {
            map.insert("message".into(), Json::String(message.clone()));
            if !causes.is_empty() {
                map.insert(
                    "causes".into(),
                    Json::Array(causes.iter().cloned().map(Json::String).collect()),
                );
            }
        }
        map.insert("attention".into(), Json::String(ATTENTION.to_string()));
        map
    }

    /// Renders the document as `application/problem+json`.
    #[must_use]
    pub fn build(&self) -> Response {
        let body = Json::Object(self.fields()).to_string();
        Response::new(self.status_code())
            .with_content_type(APPLICATION_PROBLEM_JSON)
            .with_body(body)
    }

    /// Renders the document as `application/problem+xml`.
    #[must_use]
    pub fn build_xml(&self) -> Response {
        let mut body = String::from(r#"<?xml version="1.0" encoding="UTF-8"?><problem-details>"#);
        for (key, value) in self.fields() {
            let element = xml_name(&key);
            let text = match value {
                Json::String(s) => s,
                other => other.to_string(),
            };
            body.push_str(&format!("<{element}>{}</{element}>", xml_escape(&text)));
        }
        body.push_str("</problem-details>");
        Response::new(self.status_code())
            .with_content_type(APPLICATION_PROBLEM_XML)
            .with_body(body)
    }

    /// Builds the response in the representation the client is most likely to
    /// understand and stores it on the exchange, replacing any existing one.
    pub fn build_and_set_response(&self, exchange: &mut Exchange) {
        let response = if prefers_xml(exchange) {
            self.build_xml()
        } else {
            self.build()
        };
        tracing::debug!(
            exchange = exchange.id(),
            status = response.status.as_u16(),
            problem = %self.type_uri(),
            "problem response set"
        );
        exchange.set_response(response);
    }
}

/// XML when the request is XML or only accepts XML.
fn prefers_xml(exchange: &Exchange) -> bool {
    let request = exchange.request();
    if request.is_xml() {
        return true;
    }
    request
        .headers()
        .get(ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("xml") && !accept.contains("json"))
        && request.headers().get(CONTENT_TYPE).is_none()
}

fn slug(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
        .to_ascii_lowercase()
}

fn xml_name(key: &str) -> String {
    let name: String = key
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if name.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_') {
        name
    } else {
        format!("_{name}")
    }
}

fn xml_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Request;

    fn parse(response: &Response) -> Map<String, Json> {
        match serde_json::from_slice::<Json>(&response.body) {
            Ok(Json::Object(map)) => map,
            other => panic!("expected JSON object, got {other:?}"),
        }
    }

    fn with_details(production: bool) -> Response {
        ProblemDetails::user(production, "component a b c")
            .add_subtype("catastrophe")
            .title("Something happened!")
            .detail("A detailed description.")
            .internal_field("a", "1")
            .internal_field("b", "2")
            .build()
    }

    #[test]
    fn user_problem_defaults_to_400_and_orders_fields() {
        let response = ProblemDetails::user(false, "component-a")
            .add_subtype("catastrophe")
            .title("Something happened!")
            .build();

        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        assert_eq!(response.content_type(), Some(APPLICATION_PROBLEM_JSON));

        let json = parse(&response);
        assert_eq!(json["title"], "Something happened!");
        assert_eq!(json["type"], "https://flowgate.dev/problems/user/catastrophe");
        assert_eq!(
            json.keys().collect::<Vec<_>>(),
            vec!["title", "type", "see", "attention"]
        );
    }

    #[test]
    fn production_hides_detail_and_extensions() {
        let json = parse(&with_details(true));
        assert_eq!(json.len(), 3);
        assert_eq!(json["title"], "Something happened!");
    }

    #[test]
    fn development_shows_detail_and_extensions() {
        let json = parse(&with_details(false));
        assert_eq!(json.len(), 7);
        assert_eq!(json["detail"], "A detailed description.");
        assert_eq!(json["a"], "1");
        assert_eq!(json["b"], "2");
    }

    #[test]
    fn see_uri_includes_component_flow_and_segments() {
        let json = parse(
            &ProblemDetails::user(false, "component-b")
                .component("flux-generator")
                .flow(Flow::Request)
                .add_see("io")
                .build(),
        );
        assert_eq!(
            json["see"],
            "https://flowgate.dev/problems/user/flux-generator/request/io"
        );
    }

    #[test]
    fn error_chain_rendered_in_development_only() {
        let err = anyhow::anyhow!("inner cause").context("outer failure");
        let dev = parse(&ProblemDetails::internal(false, "x").error(err.as_ref()).build());
        assert_eq!(dev["message"], "outer failure");
        assert_eq!(dev["causes"][0], "inner cause");

        let prod = parse(&ProblemDetails::internal(true, "x").error(err.as_ref()).build());
        assert!(prod.get("message").is_none());
    }

    #[test]
    fn xml_request_gets_xml_problem() {
        let mut exc = Exchange::new(Request::post("/foo").with_content_type("application/xml"));
        ProblemDetails::user(false, "blaster")
            .add_subtype("atomic")
            .title("Catastrophe & <more>")
            .internal_field("foo", "7")
            .build_and_set_response(&mut exc);

        let response = exc.response().expect("response set");
        assert!(response.is_xml());
        let body = response.body_text();
        assert!(body.contains("<title>Catastrophe &amp; &lt;more&gt;</title>"));
        assert!(body.contains("<type>https://flowgate.dev/problems/user/atomic</type>"));
        assert!(body.contains("<foo>7</foo>"));
        assert!(body.contains("development mode"));
    }

    #[test]
    fn gateway_problem_is_502() {
        assert_eq!(
            ProblemDetails::gateway(true, "call").build().status,
            StatusCode::BAD_GATEWAY
        );
    }
}
