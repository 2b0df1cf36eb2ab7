use std::sync::Arc;

use async_trait::async_trait;

use super::{expression_failed, next_scope, run_branch};
use crate::error::InterceptorError;
use crate::exchange::Exchange;
use crate::flow_controller::FlowController;
use crate::interceptor::Interceptor;
use crate::lang::Condition;
use crate::outcome::{Flow, Flows, Outcome};

/// Runs its children when the condition holds.
///
/// When the condition holds in the request pass, the children run and are
/// registered at their positions for the response and abort passes, and the
/// `if` itself sits those passes out. Otherwise the condition is evaluated
/// afresh in the later phase against that phase's message, so a test on
/// `statusCode` works for an `if` that was skipped or only deferred.
pub struct If {
    scope: u64,
    condition: Condition,
    children: Vec<Arc<dyn Interceptor>>,
    controller: FlowController,
}

impl If {
    #[must_use]
    pub fn new(condition: Condition, children: Vec<Arc<dyn Interceptor>>) -> Self {
        Self {
            scope: next_scope(),
            condition,
            children,
            controller: FlowController::default(),
        }
    }

    #[must_use]
    pub fn with_controller(mut self, controller: FlowController) -> Self {
        self.controller = controller;
        self
    }

    async fn run(&self, exchange: &mut Exchange, flow: Flow) -> Outcome {
        if flow != Flow::Request && exchange.branch_taken(self.scope) {
            return Outcome::Continue;
        }
        match self.condition.test(exchange, flow) {
            Ok(true) => {
                tracing::debug!(exchange = exchange.id(), condition = self.condition.source(), %flow, "condition true");
                run_branch(&self.controller, exchange, self.scope, &self.children, flow).await
            }
            Ok(false) => Outcome::Continue,
            Err(error) => expression_failed(
                &self.controller,
                exchange,
                "if",
                self.condition.source(),
                flow,
                &error,
            ),
        }
    }
}

#[async_trait]
impl Interceptor for If {
    fn name(&self) -> &str {
        "if"
    }

    fn flows(&self) -> Flows {
        Flows::REQUEST_RESPONSE_ABORT
    }

    fn children(&self) -> &[Arc<dyn Interceptor>] {
        &self.children
    }

    fn short_description(&self) -> String {
        format!("if ({}: {})", self.condition.language(), self.condition.source())
    }

    async fn handle_request(&self, exchange: &mut Exchange) -> Result<Outcome, InterceptorError> {
        Ok(self.run(exchange, Flow::Request).await)
    }

    async fn handle_response(&self, exchange: &mut Exchange) -> Result<Outcome, InterceptorError> {
        let flow = exchange.flow();
        Ok(self.run(exchange, flow).await)
    }
}
