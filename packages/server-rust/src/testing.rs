//! Test doubles shared by the server unit tests.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use flowgate_core::{
    ClientError, Exchange, ExpressionCompiler, FlowController, Flows, HttpClient, HttpMessage,
    Interceptor, InterceptorError, Outcome, Response,
};
use http::StatusCode;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Map, Value as Json};

use crate::builder::{BuildError, FactoryContext, FlowBuilder, InterceptorRegistry, ProxyDefinition};
use crate::network::{AppState, ShutdownController};
use crate::proxy::RuleManager;
use crate::service::{build_exchange_pipeline, ExchangePipeline, ExchangeProcessor, GatewayConfig};

// ---------------------------------------------------------------------------
// EchoClient
// ---------------------------------------------------------------------------

/// Backend double: answers `200` with the request's body and content type, or
/// fails with a connect error when built with [`EchoClient::refusing`].
#[derive(Default)]
pub struct EchoClient {
    refuse: bool,
    calls: Mutex<Vec<String>>,
}

impl EchoClient {
    pub fn refusing() -> Self {
        Self {
            refuse: true,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Destinations called so far.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl HttpClient for EchoClient {
    async fn call(&self, exchange: &mut Exchange) -> Result<Response, ClientError> {
        let url = exchange
            .destinations()
            .first()
            .cloned()
            .ok_or(ClientError::NoDestination)?;
        self.calls.lock().push(url.clone());
        if self.refuse {
            return Err(ClientError::Connect {
                url,
                reason: "connection refused".into(),
            });
        }

        let request = exchange.request();
        let mut response = Response::new(StatusCode::OK).with_body(request.body.clone());
        if let Some(content_type) = request.content_type() {
            response = response.with_content_type(content_type);
        }
        Ok(response)
    }
}

// ---------------------------------------------------------------------------
// Append
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct AppendConfig {
    request: Option<String>,
    response: Option<String>,
    #[serde(default)]
    outcome: Option<String>,
}

/// Appends text to the request body in the request phase and to the response
/// body in the response phase, so a run leaves an ordered trace.
struct Append {
    request: Option<String>,
    response: Option<String>,
    outcome: Outcome,
}

#[async_trait]
impl Interceptor for Append {
    fn name(&self) -> &str {
        "append"
    }

    fn flows(&self) -> Flows {
        match (&self.request, &self.response) {
            (Some(_), None) => Flows::REQUEST,
            (None, Some(_)) => Flows::RESPONSE | Flows::ABORT,
            _ => Flows::REQUEST_RESPONSE_ABORT,
        }
    }

    async fn handle_request(&self, exchange: &mut Exchange) -> Result<Outcome, InterceptorError> {
        if let Some(text) = &self.request {
            let body = format!("{}{text}", exchange.request().body_text());
            exchange.request_mut().set_body(body);
        }
        Ok(self.outcome)
    }

    async fn handle_response(&self, exchange: &mut Exchange) -> Result<Outcome, InterceptorError> {
        if let (Some(text), Some(response)) = (&self.response, exchange.response_mut()) {
            let body = format!("{}{text}", response.body_text());
            response.set_body(body);
        }
        Ok(Outcome::Continue)
    }
}

fn append_factory(
    _context: &FactoryContext,
    config: &Map<String, Json>,
) -> Result<Arc<dyn Interceptor>, BuildError> {
    let config: AppendConfig =
        serde_json::from_value(Json::Object(config.clone())).map_err(|e| BuildError::InvalidConfig {
            name: "append".into(),
            reason: e.to_string(),
        })?;
    let outcome = match config.outcome.as_deref() {
        None | Some("continue") => Outcome::Continue,
        Some("return") => Outcome::Return,
        Some("abort") => Outcome::Abort,
        Some(other) => {
            return Err(BuildError::InvalidConfig {
                name: "append".into(),
                reason: format!("unknown outcome {other}"),
            })
        }
    };
    Ok(Arc::new(Append {
        request: config.request,
        response: config.response,
        outcome,
    }))
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn context_with(client: Arc<dyn HttpClient>) -> FactoryContext {
    FactoryContext::new(FlowController::new(false), ExpressionCompiler::default(), client)
}

pub fn context() -> FactoryContext {
    context_with(Arc::new(EchoClient::default()))
}

/// Built-in leaves plus `append`.
pub fn registry() -> Arc<InterceptorRegistry> {
    let registry = InterceptorRegistry::with_builtin_leaves();
    registry.register("append", Arc::new(append_factory));
    Arc::new(registry)
}

/// Pipeline with one proxy on `/api` that appends `+` to the request body and
/// `!` to the response body, backed by [`EchoClient`].
pub fn echo_pipeline(config: &GatewayConfig) -> ExchangePipeline {
    let definition: ProxyDefinition = serde_json::from_str(
        r#"{ "path": { "uri": "/api" }, "target": "http://backend",
             "flow": [ { "type": "append", "request": "+", "response": "!" } ] }"#,
    )
    .unwrap();
    let proxy = FlowBuilder::new(registry(), context()).build_proxy(&definition).unwrap();
    let processor = ExchangeProcessor::new(
        Arc::new(RuleManager::new(vec![proxy])),
        Arc::new(EchoClient::default()),
        FlowController::new(config.production),
    );
    build_exchange_pipeline(processor, config)
}

/// Handler state over [`echo_pipeline`], still in the `Starting` state.
pub fn app_state(config: GatewayConfig) -> AppState {
    AppState {
        shutdown: Arc::new(ShutdownController::new()),
        pipeline: echo_pipeline(&config),
        config: Arc::new(config),
        start_time: Instant::now(),
    }
}
