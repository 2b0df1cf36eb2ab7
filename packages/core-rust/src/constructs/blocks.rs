use std::sync::Arc;

use async_trait::async_trait;

use crate::error::InterceptorError;
use crate::exchange::Exchange;
use crate::flow_controller::FlowController;
use crate::interceptor::Interceptor;
use crate::outcome::{Flows, Outcome};

// ---------------------------------------------------------------------------
// RequestBlock
// ---------------------------------------------------------------------------

/// Runs its children during the request pass only.
pub struct RequestBlock {
    children: Vec<Arc<dyn Interceptor>>,
    controller: FlowController,
}

impl RequestBlock {
    #[must_use]
    pub fn new(children: Vec<Arc<dyn Interceptor>>) -> Self {
        Self {
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
impl Interceptor for RequestBlock {
    fn name(&self) -> &str {
        "request"
    }

    fn flows(&self) -> Flows {
        Flows::REQUEST
    }

    fn children(&self) -> &[Arc<dyn Interceptor>] {
        &self.children
    }

    async fn handle_request(&self, exchange: &mut Exchange) -> Result<Outcome, InterceptorError> {
        Ok(self
            .controller
            .invoke_request_handlers(exchange, &self.children)
            .await)
    }
}

// ---------------------------------------------------------------------------
// ResponseBlock / AbortBlock
// ---------------------------------------------------------------------------

/// Registers its response-phase children for the response pass without
/// running anything during the request pass.
pub struct ResponseBlock {
    children: Vec<Arc<dyn Interceptor>>,
}

impl ResponseBlock {
    #[must_use]
    pub fn new(children: Vec<Arc<dyn Interceptor>>) -> Self {
        Self { children }
    }
}

#[async_trait]
impl Interceptor for ResponseBlock {
    fn name(&self) -> &str {
        "response"
    }

    fn flows(&self) -> Flows {
        Flows::REQUEST
    }

    fn children(&self) -> &[Arc<dyn Interceptor>] {
        &self.children
    }

    async fn handle_request(&self, exchange: &mut Exchange) -> Result<Outcome, InterceptorError> {
        defer(exchange, &self.children, false);
        Ok(Outcome::Continue)
    }
}

/// Registers its abort-phase children for the abort pass.
pub struct AbortBlock {
    children: Vec<Arc<dyn Interceptor>>,
}

impl AbortBlock {
    #[must_use]
    pub fn new(children: Vec<Arc<dyn Interceptor>>) -> Self {
        Self { children }
    }
}

#[async_trait]
impl Interceptor for AbortBlock {
    fn name(&self) -> &str {
        "abort"
    }

    fn flows(&self) -> Flows {
        Flows::REQUEST
    }

    fn children(&self) -> &[Arc<dyn Interceptor>] {
        &self.children
    }

    async fn handle_request(&self, exchange: &mut Exchange) -> Result<Outcome, InterceptorError> {
        defer(exchange, &self.children, true);
        Ok(Outcome::Continue)
    }
}

fn defer(exchange: &mut Exchange, children: &[Arc<dyn Interceptor>], for_abort: bool) {
    for child in children {
        let flows = child.flows();
        let applies = if for_abort {
            flows.handles_aborts()
        } else {
            flows.handles_responses()
        };
        if applies {
            exchange.push_deferred(Arc::clone(child), for_abort);
        }
    }
}
