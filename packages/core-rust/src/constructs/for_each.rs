use std::sync::Arc;

use async_trait::async_trait;

use super::expression_failed;
use crate::error::InterceptorError;
use crate::exchange::Exchange;
use crate::flow_controller::FlowController;
use crate::interceptor::Interceptor;
use crate::lang::{ExpectedType, Expression, ExpressionError};
use crate::outcome::{Flow, Flows, Outcome};
use crate::value::Value;

/// Exchange property holding the current element inside a `for` body.
pub const LOOP_PROPERTY: &str = "it";

/// Runs its children once per element of a sequence, request pass only.
///
/// Iterations are never cut short: every element is visited and the loop
/// returns the most severe outcome any iteration produced. A result that is
/// not a sequence makes the loop a no-op. The previous value of
/// [`LOOP_PROPERTY`] is restored afterwards, so loops can nest.
pub struct For {
    expression: Expression,
    children: Vec<Arc<dyn Interceptor>>,
    controller: FlowController,
}

impl For {
    #[must_use]
    pub fn new(expression: Expression, children: Vec<Arc<dyn Interceptor>>) -> Self {
        Self {
            expression,
            children,
            controller: FlowController::default(),
        }
    }

    #[must_use]
    pub fn with_controller(mut self, controller: FlowController) -> Self {
        self.controller = controller;
        self
    }
}

#[async_trait]
impl Interceptor for For {
    fn name(&self) -> &str {
        "for"
    }

    fn flows(&self) -> Flows {
        Flows::REQUEST
    }

    fn children(&self) -> &[Arc<dyn Interceptor>] {
        &self.children
    }

    fn short_description(&self) -> String {
        format!("for ({}: {})", self.expression.language(), self.expression.source())
    }

    async fn handle_request(&self, exchange: &mut Exchange) -> Result<Outcome, InterceptorError> {
        let items = match self
            .expression
            .evaluate(exchange, Flow::Request, ExpectedType::Sequence)
        {
            Ok(Value::Array(items)) => items,
            Ok(other) => {
                tracing::debug!(
                    exchange = exchange.id(),
                    expression = self.expression.source(),
                    found = other.type_name(),
                    "for: not a sequence, skipping"
                );
                return Ok(Outcome::Continue);
            }
            Err(ExpressionError::NullDereference { .. }) => return Ok(Outcome::Continue),
            Err(error) => {
                return Ok(expression_failed(
                    &self.controller,
                    exchange,
                    "for",
                    self.expression.source(),
                    Flow::Request,
                    &error,
                ))
            }
        };

        let previous = exchange.remove_property(LOOP_PROPERTY);
        let mut result = Outcome::Continue;
        for item in items {
            exchange.set_property(LOOP_PROPERTY, item);
            let outcome = self
                .controller
                .invoke_request_handlers(exchange, &self.children)
                .await;
            result = result.most_severe(outcome);
        }
        match previous {
            Some(value) => {
                exchange.set_property(LOOP_PROPERTY, value);
            }
            None => {
                exchange.remove_property(LOOP_PROPERTY);
            }
        }
        Ok(result)
    }
}
