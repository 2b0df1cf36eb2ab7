//! Built-in leaf interceptors available to every flow.

use std::sync::Arc;

use async_trait::async_trait;
use flowgate_core::{
    Exchange, Flow, Flows, Interceptor, InterceptorError, Language, Outcome, Template,
};
use http::header::{HeaderName, HeaderValue};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value as Json};

use super::{BuildError, FactoryContext};

fn parse_config<T: DeserializeOwned>(name: &str, config: &Map<String, Json>) -> Result<T, BuildError> {
    serde_json::from_value(Json::Object(config.clone())).map_err(|e| BuildError::InvalidConfig {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

/// Phase a header is written in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeaderTarget {
    #[default]
    Request,
    Response,
}

// ---------------------------------------------------------------------------
// SetHeader
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SetHeaderConfig {
    name: String,
    value: String,
    #[serde(default)]
    language: Language,
    #[serde(default)]
    on: HeaderTarget,
}

/// Sets a header on the request or on the response to a rendered template.
///
/// A response header is written in the abort pass too, so error responses
/// carry it.
pub struct SetHeader {
    header: HeaderName,
    value: Template,
    target: HeaderTarget,
}

impl SetHeader {
    #[must_use]
    pub fn new(header: HeaderName, value: Template, target: HeaderTarget) -> Self {
        Self { header, value, target }
    }

    fn render(&self, exchange: &Exchange, flow: Flow) -> Result<HeaderValue, InterceptorError> {
        let rendered = self.value.render(exchange, flow)?;
        HeaderValue::from_str(&rendered).map_err(|e| {
            InterceptorError::Internal(anyhow::anyhow!(
                "rendered value for header {} is not valid: {e}",
                self.header
            ))
        })
    }
}

#[async_trait]
impl Interceptor for SetHeader {
    fn name(&self) -> &str {
        "setHeader"
    }

    fn flows(&self) -> Flows {
        match self.target {
            HeaderTarget::Request => Flows::REQUEST,
            HeaderTarget::Response => Flows::RESPONSE | Flows::ABORT,
        }
    }

    fn short_description(&self) -> String {
        format!("setHeader {}: {}", self.header, self.value.source())
    }

    async fn handle_request(&self, exchange: &mut Exchange) -> Result<Outcome, InterceptorError> {
        let value = self.render(exchange, Flow::Request)?;
        exchange.request_mut().headers.insert(self.header.clone(), value);
        Ok(Outcome::Continue)
    }

    async fn handle_response(&self, exchange: &mut Exchange) -> Result<Outcome, InterceptorError> {
        if exchange.response().is_none() {
            return Ok(Outcome::Continue);
        }
        let value = self.render(exchange, exchange.flow())?;
        if let Some(response) = exchange.response_mut() {
            response.headers.insert(self.header.clone(), value);
        }
        Ok(Outcome::Continue)
    }
}

/// Factory for `setHeader`: `{ "name", "value", "language"?, "on"? }`.
///
/// # Errors
///
/// Fails on an invalid header name or a value template that does not compile.
pub fn set_header_factory(
    context: &FactoryContext,
    config: &Map<String, Json>,
) -> Result<Arc<dyn Interceptor>, BuildError> {
    let config: SetHeaderConfig = parse_config("setHeader", config)?;
    let header = HeaderName::from_bytes(config.name.as_bytes()).map_err(|e| BuildError::InvalidConfig {
        name: "setHeader".to_string(),
        reason: format!("invalid header name {:?}: {e}", config.name),
    })?;
    let value = context.compiler.compile_template(config.language, &config.value)?;
    Ok(Arc::new(SetHeader::new(header, value, config.on)))
}

// ---------------------------------------------------------------------------
// SetProperty
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SetPropertyConfig {
    name: String,
    value: String,
    #[serde(default)]
    language: Language,
}

/// Stores a rendered template as an exchange property during the request
/// pass.
pub struct SetProperty {
    property: String,
    value: Template,
}

impl SetProperty {
    #[must_use]
    pub fn new(property: impl Into<String>, value: Template) -> Self {
        Self {
            property: property.into(),
            value,
        }
    }
}

#[async_trait]
impl Interceptor for SetProperty {
    fn name(&self) -> &str {
        "setProperty"
    }

    fn flows(&self) -> Flows {
        Flows::REQUEST
    }

    fn short_description(&self) -> String {
        format!("setProperty {} = {}", self.property, self.value.source())
    }

    async fn handle_request(&self, exchange: &mut Exchange) -> Result<Outcome, InterceptorError> {
        let value = self.value.render(exchange, Flow::Request)?;
        exchange.set_property(self.property.clone(), value);
        Ok(Outcome::Continue)
    }
}

/// Factory for `setProperty`: `{ "name", "value", "language"? }`.
///
/// # Errors
///
/// Fails on a value template that does not compile.
pub fn set_property_factory(
    context: &FactoryContext,
    config: &Map<String, Json>,
) -> Result<Arc<dyn Interceptor>, BuildError> {
    let config: SetPropertyConfig = parse_config("setProperty", config)?;
    let value = context.compiler.compile_template(config.language, &config.value)?;
    Ok(Arc::new(SetProperty::new(config.name, value)))
}
