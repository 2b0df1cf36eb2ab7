use serde_json_path::JsonPath;

use super::{CompiledExpression, ExpectedType, ExpressionError, Language};
use crate::exchange::Exchange;
use crate::outcome::Flow;
use crate::value::Value;

/// JSONPath query over the JSON body of the phase's message.
///
/// Result shaping by expected type:
/// - `Boolean`: a single boolean node yields its value, otherwise whether any
///   node matched.
/// - `Sequence`: the matched nodes; a single array node is expanded.
/// - `String` / `Any`: the single node, `Null` when nothing matched, or an
///   array of all nodes.
#[derive(Debug)]
pub(super) struct JsonPathExpression {
    source: String,
    path: JsonPath,
}

impl JsonPathExpression {
    pub(super) fn compile(source: &str) -> Result<Self, ExpressionError> {
        let path = JsonPath::parse(source)
            .map_err(|e| ExpressionError::compile(Language::JsonPath, source, e.to_string()))?;
        Ok(Self {
            source: source.to_string(),
            path,
        })
    }
}

impl CompiledExpression for JsonPathExpression {
    fn language(&self) -> Language {
        Language::JsonPath
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
        let body = exchange.message(flow).body();
        if body.is_empty() {
            return Ok(Value::Null);
        }
        let document: serde_json::Value = serde_json::from_slice(body)
            .map_err(|e| ExpressionError::evaluation(format!("body is not valid JSON: {e}")))?;
        let nodes = self.path.query(&document).all();

        Ok(match expected {
            ExpectedType::Boolean => match nodes.as_slice() {
                [serde_json::Value::Bool(b)] => Value::Bool(*b),
                other => Value::Bool(!other.is_empty()),
            },
            ExpectedType::Sequence => match nodes.as_slice() {
                [serde_json::Value::Array(items)] => {
                    Value::Array(items.iter().cloned().map(Value::from).collect())
                }
                other => Value::Array(other.iter().map(|n| Value::from((*n).clone())).collect()),
            },
            ExpectedType::String | ExpectedType::Any => {
                let value = match nodes.as_slice() {
                    [] => Value::Null,
                    [single] => Value::from((*single).clone()),
                    many => Value::Array(many.iter().map(|n| Value::from((*n).clone())).collect()),
                };
                match (expected, value) {
                    (ExpectedType::String, v @ (Value::Null | Value::String(_))) => v,
                    (ExpectedType::String, other) => Value::String(other.to_string()),
                    (_, v) => v,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Request;

    fn exchange(body: &str) -> Exchange {
        Exchange::new(
            Request::post("/")
                .with_content_type("application/json")
                .with_body(body.to_string()),
        )
    }

    fn eval(path: &str, body: &str, expected: ExpectedType) -> Result<Value, ExpressionError> {
        JsonPathExpression::compile(path)
            .expect("compiles")
            .evaluate(&exchange(body), Flow::Request, expected)
    }

    const ORDER: &str = r#"{"id": 7, "active": true, "items": [{"sku": "a"}, {"sku": "b"}]}"#;

    #[test]
    fn single_array_node_expands_for_sequences() {
        let value = eval("$.items", ORDER, ExpectedType::Sequence).expect("evaluates");
        assert_eq!(value.as_array().map(<[Value]>::len), Some(2));
    }

    #[test]
    fn wildcard_collects_nodes() {
        assert_eq!(
            eval("$.items[*].sku", ORDER, ExpectedType::Any).ok(),
            Some(Value::Array(vec![Value::from("a"), Value::from("b")]))
        );
    }

    #[test]
    fn boolean_uses_node_value_or_existence() {
        assert_eq!(eval("$.active", ORDER, ExpectedType::Boolean).ok(), Some(Value::Bool(true)));
        assert_eq!(eval("$.id", ORDER, ExpectedType::Boolean).ok(), Some(Value::Bool(true)));
        assert_eq!(eval("$.missing", ORDER, ExpectedType::Boolean).ok(), Some(Value::Bool(false)));
    }

    #[test]
    fn string_expectation_renders_numbers() {
        assert_eq!(eval("$.id", ORDER, ExpectedType::String).ok(), Some(Value::from("7")));
    }

    #[test]
    fn empty_body_is_null_and_invalid_body_fails() {
        assert_eq!(eval("$.id", "", ExpectedType::Any).ok(), Some(Value::Null));
        assert!(matches!(
            eval("$.id", "not json", ExpectedType::Any),
            Err(ExpressionError::Evaluation { .. })
        ));
    }

    #[test]
    fn invalid_path_fails_compile() {
        assert!(JsonPathExpression::compile("$[").is_err());
    }
}
