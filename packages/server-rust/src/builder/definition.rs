//! Serde model of proxy and flow definitions.
//!
//! Built-in constructs are a closed, tagged enum. Any other `type` is kept as
//! a [`InterceptorSpec::Plugin`] and resolved by name in the
//! [`InterceptorRegistry`](super::InterceptorRegistry) at build time.

use flowgate_core::{Language, ScriptConfig};
use serde::Deserialize;
use serde_json::{Map, Value as Json};

/// Top-level gateway definition file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct GatewayDefinition {
    pub proxies: Vec<ProxyDefinition>,
    pub scripts: ScriptConfig,
}

impl GatewayDefinition {
    /// Parses a definition from JSON text.
    ///
    /// # Errors
    ///
    /// Returns the JSON error with line and column on malformed input or an
    /// unknown field.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// One routing rule with its flow.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct ProxyDefinition {
    /// Display name; defaults to the rule key.
    pub name: Option<String>,
    pub host: Option<String>,
    pub method: Option<String>,
    pub path: Option<PathDefinition>,
    /// Backend base URL the request path is appended to.
    pub target: Option<String>,
    pub flow: Vec<InterceptorSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PathDefinition {
    pub uri: String,
    /// Treat `uri` as a regular expression instead of a prefix.
    #[serde(default)]
    pub regex: bool,
}

// ---------------------------------------------------------------------------
// InterceptorSpec
// ---------------------------------------------------------------------------

/// One node of a flow definition.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "Json")]
pub enum InterceptorSpec {
    Construct(ConstructSpec),
    /// A leaf resolved through the registry. `config` holds every field of
    /// the definition except `type`.
    Plugin { name: String, config: Map<String, Json> },
}

/// Built-in structural constructs.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", deny_unknown_fields)]
pub enum ConstructSpec {
    Request {
        #[serde(default)]
        flow: Vec<InterceptorSpec>,
    },
    Response {
        #[serde(default)]
        flow: Vec<InterceptorSpec>,
    },
    Abort {
        #[serde(default)]
        flow: Vec<InterceptorSpec>,
    },
    If {
        test: String,
        #[serde(default)]
        language: Language,
        #[serde(default)]
        flow: Vec<InterceptorSpec>,
    },
    For {
        #[serde(rename = "in")]
        items: String,
        #[serde(default)]
        language: Language,
        #[serde(default)]
        flow: Vec<InterceptorSpec>,
    },
    Choose {
        cases: Vec<CaseSpec>,
        #[serde(default)]
        otherwise: Option<Vec<InterceptorSpec>>,
    },
    Call {
        url: String,
        #[serde(default)]
        language: Language,
    },
    Return {
        #[serde(default)]
        status: Option<u16>,
        #[serde(default, rename = "contentType")]
        content_type: Option<String>,
    },
    Destination {
        url: String,
    },
}

impl ConstructSpec {
    /// Every `type` tag handled by [`ConstructSpec`].
    pub const TYPES: &'static [&'static str] = &[
        "request",
        "response",
        "abort",
        "if",
        "for",
        "choose",
        "call",
        "return",
        "destination",
    ];
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CaseSpec {
    pub test: String,
    #[serde(default)]
    pub language: Language,
    #[serde(default)]
    pub flow: Vec<InterceptorSpec>,
}

impl TryFrom<Json> for InterceptorSpec {
    type Error = String;

    fn try_from(value: Json) -> Result<Self, Self::Error> {
        let Json::Object(mut fields) = value else {
            return Err("interceptor definition must be an object".to_string());
        };
        let kind = match fields.get("type") {
            Some(Json::String(kind)) => kind.clone(),
            _ => return Err("interceptor definition needs a string \"type\"".to_string()),
        };

        if ConstructSpec::TYPES.contains(&kind.as_str()) {
            serde_json::from_value(Json::Object(fields))
                .map(Self::Construct)
                .map_err(|e| format!("{kind}: {e}"))
        } else {
            fields.remove("type");
            Ok(Self::Plugin {
                name: kind,
                config: fields,
            })
        }
    }
}
