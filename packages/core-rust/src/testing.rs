//! Interceptors and helpers shared by the unit tests of the flow engine.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::InterceptorError;
use crate::exchange::Exchange;
use crate::interceptor::Interceptor;
use crate::message::{HttpMessage, Response};
use crate::outcome::{Flows, Outcome};

/// Shared invocation log; entries read `name:phase`.
#[derive(Debug, Clone, Default)]
pub(crate) struct Log(Arc<Mutex<Vec<String>>>);

impl Log {
    pub(crate) fn push(&self, entry: String) {
        self.0.lock().push(entry);
    }

    pub(crate) fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Behavior {
    Outcome(Outcome),
    Fail,
    Panic,
    /// Cancels the exchange, then continues.
    Cancel,
}

/// Records every invocation and reacts as configured.
pub(crate) struct Probe {
    name: String,
    flows: Flows,
    on_request: Behavior,
    on_response: Behavior,
    log: Log,
}

impl Probe {
    pub(crate) fn new(name: &str, log: &Log) -> Self {
        Self {
            name: name.to_string(),
            flows: Flows::REQUEST_RESPONSE,
            on_request: Behavior::Outcome(Outcome::Continue),
            on_response: Behavior::Outcome(Outcome::Continue),
            log: log.clone(),
        }
    }

    pub(crate) fn flows(mut self, flows: Flows) -> Self {
        self.flows = flows;
        self
    }

    pub(crate) fn on_request(mut self, behavior: Behavior) -> Self {
        self.on_request = behavior;
        self
    }

    pub(crate) fn on_response(mut self, behavior: Behavior) -> Self {
        self.on_response = behavior;
        self
    }

    pub(crate) fn arc(self) -> Arc<dyn Interceptor> {
        Arc::new(self)
    }

    fn act(behavior: Behavior, exchange: &Exchange) -> Result<Outcome, InterceptorError> {
        match behavior {
            Behavior::Outcome(outcome) => Ok(outcome),
            Behavior::Fail => Err(anyhow::anyhow!("probe failure").into()),
            Behavior::Panic => panic!("probe panic"),
            Behavior::Cancel => {
                exchange.cancel();
                Ok(Outcome::Continue)
            }
        }
    }
}

#[async_trait]
impl Interceptor for Probe {
    fn name(&self) -> &str {
        &self.name
    }

    fn flows(&self) -> Flows {
        self.flows
    }

    async fn handle_request(&self, exchange: &mut Exchange) -> Result<Outcome, InterceptorError> {
        self.log.push(format!("{}:request", self.name));
        Self::act(self.on_request, exchange)
    }

    async fn handle_response(&self, exchange: &mut Exchange) -> Result<Outcome, InterceptorError> {
        self.log.push(format!("{}:{}", self.name, exchange.flow()));
        Self::act(self.on_response, exchange)
    }
}

/// Appends a marker to the message body of the current phase.
pub(crate) struct Mark {
    name: String,
    on_request: String,
    on_response: String,
}

impl Mark {
    /// `a` on the request, `A` on the response.
    pub(crate) fn letters(name: &str) -> Self {
        Self {
            name: name.to_string(),
            on_request: name.to_lowercase(),
            on_response: name.to_uppercase(),
        }
    }

    /// `>a` on the request, `<a` on the response.
    pub(crate) fn arrows(name: &str) -> Self {
        Self {
            name: name.to_string(),
            on_request: format!(">{name}"),
            on_response: format!("<{name}"),
        }
    }

    pub(crate) fn arc(self) -> Arc<dyn Interceptor> {
        Arc::new(self)
    }
}

#[async_trait]
impl Interceptor for Mark {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle_request(&self, exchange: &mut Exchange) -> Result<Outcome, InterceptorError> {
        let body = format!("{}{}", exchange.request().body_text(), self.on_request);
        exchange.request_mut().set_body(body);
        Ok(Outcome::Continue)
    }

    async fn handle_response(&self, exchange: &mut Exchange) -> Result<Outcome, InterceptorError> {
        if let Some(response) = exchange.response_mut() {
            let body = format!("{}{}", response.body_text(), self.on_response);
            response.set_body(body);
        }
        Ok(Outcome::Continue)
    }
}

/// Stands in for a backend that mirrors the request.
pub(crate) fn echo(exchange: &mut Exchange) {
    let request = exchange.request();
    let mut response = Response::ok().with_body(request.body.clone());
    if let Some(content_type) = request.content_type() {
        response = response.with_content_type(content_type);
    }
    exchange.set_response(response);
    exchange.set_state(crate::exchange::ExchangeState::BackendCall);
}
