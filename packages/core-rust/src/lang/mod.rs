//! Expression languages used by conditional, loop, and call constructs.
//!
//! Every language compiles its source once at configuration time into a
//! [`CompiledExpression`] that is shared by all exchanges. Compilation errors
//! surface from [`ExpressionCompiler::compile`]; evaluation errors surface per
//! exchange and are handled by the owning construct.

mod attribute;
mod jsonpath;
mod pool;
mod script;
mod template;
mod xpath;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::exchange::Exchange;
use crate::outcome::Flow;
use crate::value::Value;

pub use pool::{BoundedPool, PoolGuard};
pub use script::{ScriptConfig, ScriptRuntime};
pub use template::Template;

/// Expression language, selected per construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// Built-in attribute-path language (`header.x == 'y' && method == 'GET'`).
    #[default]
    Attribute,
    /// Rhai script.
    Script,
    /// XPath 1.0 over an XML body.
    #[serde(rename = "xpath")]
    XPath,
    /// JSONPath (RFC 9535) over a JSON body.
    #[serde(rename = "jsonpath")]
    JsonPath,
}

impl Language {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Attribute => "attribute",
            Self::Script => "script",
            Self::XPath => "xpath",
            Self::JsonPath => "jsonpath",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "attribute" | "spel" => Ok(Self::Attribute),
            "script" | "rhai" => Ok(Self::Script),
            "xpath" => Ok(Self::XPath),
            "jsonpath" => Ok(Self::JsonPath),
            other => Err(format!("unknown expression language: {other}")),
        }
    }
}

/// Result shape the caller wants from an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedType {
    Boolean,
    Sequence,
    String,
    Any,
}

impl ExpectedType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Sequence => "sequence",
            Self::String => "string",
            Self::Any => "any",
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ExpressionError {
    /// Bad syntax, reported at configuration time.
    #[error("cannot compile {language} expression `{source_text}`: {message}")]
    Compile {
        language: Language,
        source_text: String,
        message: String,
    },
    #[error("evaluation failed: {message}")]
    Evaluation { message: String },
    /// A member was accessed on an absent value. Conditions treat this as `false`.
    #[error("null dereference: {message}")]
    NullDereference { message: String },
    #[error("expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
}

impl ExpressionError {
    pub(crate) fn evaluation(message: impl Into<String>) -> Self {
        Self::Evaluation {
            message: message.into(),
        }
    }

    pub(crate) fn compile(language: Language, source: &str, message: impl Into<String>) -> Self {
        Self::Compile {
            language,
            source_text: source.to_string(),
            message: message.into(),
        }
    }
}

/// Immutable, thread-safe compiled form of an expression.
pub trait CompiledExpression: Send + Sync + fmt::Debug {
    fn language(&self) -> Language;

    /// Source text as configured.
    fn source(&self) -> &str;

    /// Evaluates against the message of the given phase.
    ///
    /// # Errors
    ///
    /// Returns [`ExpressionError`] when evaluation fails; a missing value is
    /// `Ok(Value::Null)` or [`ExpressionError::NullDereference`], never a
    /// generic evaluation error.
    fn evaluate(
        &self,
        exchange: &Exchange,
        flow: Flow,
        expected: ExpectedType,
    ) -> Result<Value, ExpressionError>;
}

/// Shared handle to a compiled expression.
pub type Expression = Arc<dyn CompiledExpression>;

/// Compiles expressions for every [`Language`].
///
/// Holds the shared Rhai engine pool, so one compiler should be created per
/// gateway and reused for every construct.
#[derive(Debug, Clone)]
pub struct ExpressionCompiler {
    scripts: Arc<ScriptRuntime>,
}

impl ExpressionCompiler {
    #[must_use]
    pub fn new(config: &ScriptConfig) -> Self {
        Self {
            scripts: Arc::new(ScriptRuntime::new(config)),
        }
    }

    /// # Errors
    ///
    /// Returns [`ExpressionError::Compile`] on invalid syntax.
    pub fn compile(&self, language: Language, source: &str) -> Result<Expression, ExpressionError> {
        let expression: Expression = match language {
            Language::Attribute => Arc::new(attribute::AttributeExpression::compile(source)?),
            Language::Script => Arc::new(self.scripts.compile(source)?),
            Language::XPath => Arc::new(xpath::XPathExpression::compile(source)?),
            Language::JsonPath => Arc::new(jsonpath::JsonPathExpression::compile(source)?),
        };
        tracing::debug!(language = %language, source, "expression compiled");
        Ok(expression)
    }

    /// Compiles a `${...}` template whose placeholders use `language`.
    ///
    /// # Errors
    ///
    /// Returns [`ExpressionError::Compile`] on an unterminated placeholder or
    /// invalid placeholder expression.
    pub fn compile_template(&self, language: Language, source: &str) -> Result<Template, ExpressionError> {
        Template::compile(self, language, source)
    }
}

impl Default for ExpressionCompiler {
    fn default() -> Self {
        Self::new(&ScriptConfig::default())
    }
}

/// Boolean test shared by `if` and `choose` cases.
#[derive(Debug, Clone)]
pub struct Condition {
    expression: Expression,
}

impl Condition {
    #[must_use]
    pub fn new(expression: Expression) -> Self {
        Self { expression }
    }

    #[must_use]
    pub fn source(&self) -> &str {
        self.expression.source()
    }

    #[must_use]
    pub fn language(&self) -> Language {
        self.expression.language()
    }

    /// Evaluates to a boolean. A null result or a null dereference is `false`.
    ///
    /// # Errors
    ///
    /// Any other evaluation failure, or a non-boolean result.
    pub fn test(&self, exchange: &Exchange, flow: Flow) -> Result<bool, ExpressionError> {
        match self
            .expression
            .evaluate(exchange, flow, ExpectedType::Boolean)
        {
            Ok(Value::Null) => Ok(false),
            Ok(Value::Bool(b)) => Ok(b),
            Ok(other) => Err(ExpressionError::TypeMismatch {
                expected: ExpectedType::Boolean.as_str(),
                found: other.type_name(),
            }),
            Err(ExpressionError::NullDereference { message }) => {
                tracing::debug!(
                    exchange = exchange.id(),
                    condition = self.source(),
                    %message,
                    "null dereference in condition, treated as false"
                );
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}
