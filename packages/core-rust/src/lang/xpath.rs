use sxd_xpath::{evaluate_xpath, Factory, Value as XPathValue};

use super::{CompiledExpression, ExpectedType, ExpressionError, Language};
use crate::exchange::Exchange;
use crate::outcome::Flow;
use crate::value::Value;

/// XPath 1.0 over the XML body of the phase's message.
///
/// The compiled form of `sxd-xpath` is not `Send`, so the source is
/// syntax-checked at configuration time and re-parsed per evaluation.
#[derive(Debug)]
pub(super) struct XPathExpression {
    source: String,
}

impl XPathExpression {
    pub(super) fn compile(source: &str) -> Result<Self, ExpressionError> {
        match Factory::new().build(source) {
            Ok(Some(_)) => Ok(Self {
                source: source.to_string(),
            }),
            Ok(None) => Err(ExpressionError::compile(Language::XPath, source, "empty expression")),
            Err(e) => Err(ExpressionError::compile(Language::XPath, source, e.to_string())),
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
fn number(n: f64) -> Value {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 9.0e15 {
        Value::Int(n as i64)
    } else {
        Value::Float(n)
    }
}

impl CompiledExpression for XPathExpression {
    fn language(&self) -> Language {
        Language::XPath
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
        let text = exchange.message(flow).body_text();
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        let package = sxd_document::parser::parse(&text)
            .map_err(|e| ExpressionError::evaluation(format!("body is not well-formed XML: {e:?}")))?;
        let document = package.as_document();
        let result = evaluate_xpath(&document, &self.source)
            .map_err(|e| ExpressionError::evaluation(e.to_string()))?;

        Ok(match expected {
            ExpectedType::Boolean => Value::Bool(result.boolean()),
            ExpectedType::String => Value::String(result.string()),
            ExpectedType::Sequence | ExpectedType::Any => match result {
                XPathValue::Nodeset(nodes) => {
                    let mut values: Vec<Value> = nodes
                        .document_order()
                        .iter()
                        .map(|node| Value::String(node.string_value()))
                        .collect();
                    if expected == ExpectedType::Any && values.len() <= 1 {
                        values.pop().unwrap_or(Value::Null)
                    } else {
                        Value::Array(values)
                    }
                }
                XPathValue::Boolean(b) => Value::Bool(b),
                XPathValue::Number(n) => number(n),
                XPathValue::String(s) => Value::String(s),
            },
        })
    }
}
