//! Rhai-backed script language.
//!
//! Scripts see the current exchange through these scope variables:
//! `method`, `uri`, `path`, `headers` (lowercase names), `body`, `json`
//! (parsed body or `()`), `properties`, `flow`, `status` (`()` without a
//! response) and `destinations`. Every exchange property whose name is a valid
//! identifier is also bound directly, so `it` works inside a loop.

use std::fmt;
use std::sync::Arc;

use rhai::{Dynamic, Engine, EvalAltResult, Scope, AST};
use serde::{Deserialize, Serialize};

use super::pool::BoundedPool;
use super::{CompiledExpression, ExpectedType, ExpressionError, Language};
use crate::exchange::Exchange;
use crate::message::HttpMessage;
use crate::outcome::Flow;
use crate::value::Value;

/// Sandbox limits and pool sizing for script evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptConfig {
    /// Number of pooled engines. `None` means twice the available parallelism.
    pub pool_size: Option<usize>,
    pub max_operations: u64,
    pub max_call_levels: usize,
    pub max_string_size: usize,
    pub max_array_size: usize,
    pub max_map_size: usize,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            pool_size: None,
            max_operations: 100_000,
            max_call_levels: 32,
            max_string_size: 1_000_000,
            max_array_size: 10_000,
            max_map_size: 10_000,
        }
    }
}

/// Shared pool of configured Rhai engines.
pub struct ScriptRuntime {
    engines: BoundedPool<Engine>,
}

impl ScriptRuntime {
    #[must_use]
    pub fn new(config: &ScriptConfig) -> Self {
        let capacity = config.pool_size.unwrap_or_else(BoundedPool::<Engine>::default_capacity);
        let config = config.clone();
        Self {
            engines: BoundedPool::new(capacity, move || build_engine(&config)),
        }
    }

    /// # Errors
    ///
    /// Returns [`ExpressionError::Compile`] on a Rhai parse error.
    pub fn compile(self: &Arc<Self>, source: &str) -> Result<ScriptExpression, ExpressionError> {
        let ast = self
            .engines
            .acquire()
            .compile(source)
            .map_err(|e| ExpressionError::compile(Language::Script, source, e.to_string()))?;
        Ok(ScriptExpression {
            source: source.to_string(),
            ast,
            runtime: Arc::clone(self),
        })
    }

    /// Engines created so far (bounded by the pool capacity).
    #[must_use]
    pub fn engines_created(&self) -> usize {
        self.engines.created()
    }
}

impl fmt::Debug for ScriptRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptRuntime")
            .field("capacity", &self.engines.capacity())
            .field("created", &self.engines.created())
            .finish()
    }
}

fn build_engine(config: &ScriptConfig) -> Engine {
    let mut engine = Engine::new();
    engine.set_max_operations(config.max_operations);
    engine.set_max_call_levels(config.max_call_levels);
    engine.set_max_string_size(config.max_string_size);
    engine.set_max_array_size(config.max_array_size);
    engine.set_max_map_size(config.max_map_size);
    engine.set_strict_variables(false);

    engine.register_fn("to_json", |value: Dynamic| -> String {
        serde_json::to_string(&value).unwrap_or_else(|_| "null".to_string())
    });
    engine.register_fn("from_json", |json: &str| -> Dynamic {
        serde_json::from_str::<serde_json::Value>(json)
            .map_or(Dynamic::UNIT, |v| Value::from(v).to_dynamic())
    });
    engine
}

/// A compiled script; evaluation borrows an engine from the shared pool.
pub struct ScriptExpression {
    source: String,
    ast: AST,
    runtime: Arc<ScriptRuntime>,
}

impl fmt::Debug for ScriptExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptExpression")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

impl ScriptExpression {
    fn scope(exchange: &Exchange, flow: Flow) -> Scope<'static> {
        let mut scope = Scope::new();
        for (name, value) in exchange.properties() {
            if is_identifier(name) {
                scope.push_dynamic(name.clone(), value.to_dynamic());
            }
        }

        let request = exchange.request();
        let message = exchange.message(flow);

        let mut headers = rhai::Map::new();
        for (name, value) in message.headers() {
            if let Ok(text) = value.to_str() {
                headers
                    .entry(name.as_str().into())
                    .or_insert_with(|| Dynamic::from(text.to_string()));
            }
        }
        let mut properties = rhai::Map::new();
        for (name, value) in exchange.properties() {
            properties.insert(name.as_str().into(), value.to_dynamic());
        }
        let json = serde_json::from_slice::<serde_json::Value>(message.body())
            .map_or(Dynamic::UNIT, |v| Value::from(v).to_dynamic());
        let status = exchange
            .response()
            .map_or(Dynamic::UNIT, |r| Dynamic::from_int(i64::from(r.status.as_u16())));
        let destinations: rhai::Array = exchange
            .destinations()
            .iter()
            .map(|d| Dynamic::from(d.clone()))
            .collect();

        scope
            .push_constant("method", request.method.as_str().to_string())
            .push_constant("uri", request.uri.clone())
            .push_constant("path", request.path().to_string())
            .push_constant_dynamic("headers", Dynamic::from_map(headers))
            .push_constant("body", message.body_text())
            .push_constant_dynamic("json", json)
            .push_constant_dynamic("properties", Dynamic::from_map(properties))
            .push_constant("flow", flow.as_str().to_string())
            .push_constant_dynamic("status", status)
            .push_constant_dynamic("destinations", Dynamic::from_array(destinations));
        scope
    }
}

impl CompiledExpression for ScriptExpression {
    fn language(&self) -> Language {
        Language::Script
    }

    fn source(&self) -> &str {
        &self.source
    }

    fn evaluate(
        &self,
        exchange: &Exchange,
        flow: Flow,
        expected: ExpectedType,
    ) -> Result<Value, ExpressionError> {
        let mut scope = Self::scope(exchange, flow);
        let result = {
            let engine = self.runtime.engines.acquire();
            engine.eval_ast_with_scope::<Dynamic>(&mut scope, &self.ast)
        }
        .map_err(|e| map_eval_error(&e))?;

        let value = Value::from_dynamic(result);
        Ok(match (expected, value) {
            (ExpectedType::String, v @ (Value::Null | Value::String(_))) => v,
            (ExpectedType::String, other) => Value::String(other.to_string()),
            (_, v) => v,
        })
    }
}

/// Lookups that hit nothing become null dereferences, everything else is an
/// ordinary evaluation failure.
fn map_eval_error(err: &EvalAltResult) -> ExpressionError {
    let message = err.to_string();
    match err {
        EvalAltResult::ErrorVariableNotFound(..) | EvalAltResult::ErrorPropertyNotFound(..) => {
            ExpressionError::NullDereference { message }
        }
        EvalAltResult::ErrorFunctionNotFound(signature, _)
        | EvalAltResult::ErrorIndexingType(signature, _)
            if signature.contains("()") =>
        {
            ExpressionError::NullDereference { message }
        }
        _ => ExpressionError::evaluation(message),
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
