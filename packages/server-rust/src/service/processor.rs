//! Exchange processor: drives one exchange through rule matching, the request
//! pass, the backend call, and the response or abort pass.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use flowgate_core::{
    ClientError, Exchange, ExchangeState, Flow, FlowController, HttpClient, Outcome, ProblemDetails,
};
use http::StatusCode;
use tower::Service;

use super::error::GatewayError;
use crate::proxy::RuleMatcher;

/// Exchange property holding the name of the matched proxy.
pub const PROXY_PROPERTY: &str = "proxy";

const COMPONENT: &str = "gateway";

/// Runs exchanges to completion. Every exchange returned carries a response.
///
/// State machine:
/// - no matching proxy: `404` problem, no passes run
/// - request pass `Continue`: backend call, then response pass (abort pass
///   instead if the call fails)
/// - request pass `Return`: response pass on the response set so far
/// - request pass `Abort`: abort pass
/// - response pass `Abort`: abort pass
#[derive(Clone)]
pub struct ExchangeProcessor {
    matcher: Arc<dyn RuleMatcher>,
    client: Arc<dyn HttpClient>,
    controller: FlowController,
}

impl ExchangeProcessor {
    #[must_use]
    pub fn new(matcher: Arc<dyn RuleMatcher>, client: Arc<dyn HttpClient>, controller: FlowController) -> Self {
        Self {
            matcher,
            client,
            controller,
        }
    }

    /// Processes one exchange and returns it in the `Completed` state.
    pub async fn process(&self, mut exchange: Exchange) -> Exchange {
        let Some(proxy) = self.matcher.find(&exchange) else {
            tracing::debug!(exchange = exchange.id(), path = exchange.request().path(), "no matching proxy");
            ProblemDetails::user(self.controller.production(), COMPONENT)
                .add_subtype("no-route")
                .status(StatusCode::NOT_FOUND)
                .title("No proxy matches the request.")
                .internal_field("path", exchange.request().path())
                .build_and_set_response(&mut exchange);
            exchange.set_state(ExchangeState::Completed);
            return exchange;
        };

        exchange.set_property(PROXY_PROPERTY, proxy.name());
        if let Some(destination) = proxy.destination_for(exchange.request()) {
            exchange.set_destinations(vec![destination]);
        }
        tracing::debug!(exchange = exchange.id(), proxy = proxy.name(), "matched proxy");

        let outcome = self
            .controller
            .run_request_pass(&mut exchange, proxy.interceptors())
            .await;

        let abort = match outcome {
            Outcome::Continue => match self.call_backend(&mut exchange).await {
                Ok(()) => self.response_pass(&mut exchange).await,
                Err(error) => {
                    self.backend_failed(&mut exchange, &error);
                    true
                }
            },
            Outcome::Return => {
                if exchange.response().is_none() {
                    self.missing_response(&mut exchange, "Request flow returned without a response.");
                }
                self.response_pass(&mut exchange).await
            }
            Outcome::Abort => true,
        };

        if abort {
            if exchange.response().is_none() {
                self.missing_response(&mut exchange, "Request flow aborted without a response.");
            }
            self.controller
                .run_response_or_abort_pass(&mut exchange, true)
                .await;
            if exchange.response().is_none() {
                self.missing_response(&mut exchange, "Abort flow removed the response.");
            }
        }

        exchange.set_state(ExchangeState::Completed);
        tracing::debug!(
            exchange = exchange.id(),
            proxy = proxy.name(),
            status = exchange.response().map_or(0, |r| r.status.as_u16()),
            aborted = abort,
            "exchange completed"
        );
        exchange
    }

    /// Runs the response pass; returns `true` when it ended in `Abort`.
    async fn response_pass(&self, exchange: &mut Exchange) -> bool {
        self.controller
            .run_response_or_abort_pass(exchange, false)
            .await
            == Outcome::Abort
    }

    async fn call_backend(&self, exchange: &mut Exchange) -> Result<(), ClientError> {
        exchange.set_state(ExchangeState::BackendCall);
        let cancellation = exchange.cancellation_token().clone();
        let response = tokio::select! {
            () = cancellation.cancelled() => {
                return Err(ClientError::Other(anyhow::anyhow!("exchange cancelled during backend call")));
            }
            response = self.client.call(exchange) => response?,
        };
        exchange.set_response(response);
        Ok(())
    }

    fn backend_failed(&self, exchange: &mut Exchange, error: &ClientError) {
        tracing::warn!(exchange = exchange.id(), %error, "backend call failed");
        let mut problem = ProblemDetails::gateway(self.controller.production(), COMPONENT)
            .add_subtype("backend-call-failed")
            .flow(Flow::Request)
            .error(error);
        problem = match error {
            ClientError::Timeout { .. } => problem
                .status(StatusCode::GATEWAY_TIMEOUT)
                .title("The backend did not answer in time."),
            _ => problem.title("Calling the backend failed."),
        };
        if let Some(url) = exchange.destinations().first() {
            problem = problem.internal_field("url", url.as_str());
        }
        problem.build_and_set_response(exchange);
    }

    fn missing_response(&self, exchange: &mut Exchange, title: &str) {
        tracing::warn!(exchange = exchange.id(), state = exchange.state().as_str(), "{title}");
        ProblemDetails::internal(self.controller.production(), COMPONENT)
            .add_subtype("missing-response")
            .title(title)
            .build_and_set_response(exchange);
    }
}

impl Service<Exchange> for ExchangeProcessor {
    type Response = Exchange;
    type Error = GatewayError;
    type Future = Pin<Box<dyn Future<Output = Result<Exchange, GatewayError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, exchange: Exchange) -> Self::Future {
        let processor = self.clone();
        Box::pin(async move { Ok(processor.process(exchange).await) })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use flowgate_core::{HttpMessage, Request, Value};
    use serde_json::Value as Json;
    use tower::ServiceExt;

    use super::*;
    use crate::builder::{FlowBuilder, ProxyDefinition};
    use crate::proxy::RuleManager;
    use crate::testing::{context_with, registry, EchoClient};

    fn processor_with(flow: &str, client: Arc<EchoClient>) -> ExchangeProcessor {
        let definition: ProxyDefinition = serde_json::from_str(&format!(
            r#"{{ "name": "test", "path": {{ "uri": "/" }}, "target": "http://backend", "flow": {flow} }}"#
        ))
        .unwrap();
        let builder = FlowBuilder::new(registry(), context_with(client.clone()));
        let proxy = builder.build_proxy(&definition).unwrap();
        ExchangeProcessor::new(
            Arc::new(RuleManager::new(vec![proxy])),
            client,
            FlowController::new(false),
        )
    }

    fn processor(flow: &str) -> ExchangeProcessor {
        processor_with(flow, Arc::new(EchoClient::default()))
    }

    async fn run(processor: &ExchangeProcessor, request: Request) -> Exchange {
        processor.process(Exchange::new(request)).await
    }

    fn body(exc: &Exchange) -> String {
        exc.response().map(HttpMessage::body_text).unwrap_or_default()
    }

    fn problem(exc: &Exchange) -> Json {
        serde_json::from_slice(&exc.response().expect("response").body).unwrap()
    }

    #[tokio::test]
    async fn request_block_trace_through_backend() {
        let processor = processor(
            r#"[
                { "type": "append", "request": "a", "response": "A" },
                { "type": "request", "flow": [ { "type": "append", "request": "b" } ] },
                { "type": "append", "request": "c", "response": "C" }
            ]"#,
        );
        let exc = run(&processor, Request::post("/")).await;

        assert_eq!(exc.state(), ExchangeState::Completed);
        assert_eq!(exc.response().map(|r| r.status), Some(StatusCode::OK));
        assert_eq!(body(&exc), "abcCA");
    }

    #[tokio::test]
    async fn response_block_trace_is_onion_ordered() {
        let processor = processor(
            r#"[
                { "type": "append", "request": ">a", "response": "<a" },
                { "type": "response", "flow": [ { "type": "append", "response": "<b" } ] },
                { "type": "append", "request": ">c", "response": "<c" }
            ]"#,
        );
        let exc = run(&processor, Request::post("/")).await;
        assert_eq!(body(&exc), ">a>c<c<b<a");
    }

    const ONION_BRANCH: &str = r#"[
        { "type": "append", "request": ">a", "response": "<a" },
        { "type": "response", "flow": [ { "type": "append", "response": "<b" } ] },
        { "type": "append", "request": ">c", "response": "<c" }
    ]"#;

    #[tokio::test]
    async fn response_block_inside_if_is_onion_ordered() {
        let processor = processor(&format!(r#"[ {{ "type": "if", "test": "true", "flow": {ONION_BRANCH} }} ]"#));
        let exc = run(&processor, Request::post("/")).await;
        assert_eq!(body(&exc), ">a>c<c<b<a");
    }

    #[tokio::test]
    async fn response_block_inside_choose_is_onion_ordered() {
        let processor = processor(&format!(
            r#"[ {{ "type": "choose",
                    "cases": [
                        {{ "test": "false", "flow": [ {{ "type": "append", "request": "x", "response": "X" }} ] }},
                        {{ "test": "method == 'POST'", "flow": {ONION_BRANCH} }}
                    ] }} ]"#
        ));
        let exc = run(&processor, Request::post("/")).await;
        assert_eq!(body(&exc), ">a>c<c<b<a");
    }

    #[tokio::test]
    async fn response_block_inside_request_block_is_onion_ordered() {
        let processor = processor(
            r#"[
                { "type": "append", "request": ">a", "response": "<a" },
                { "type": "request", "flow": [
                    { "type": "append", "request": ">b" },
                    { "type": "response", "flow": [ { "type": "append", "response": "<d" } ] },
                    { "type": "append", "request": ">e" }
                ]},
                { "type": "append", "request": ">c", "response": "<c" }
            ]"#,
        );
        let exc = run(&processor, Request::post("/")).await;
        assert_eq!(body(&exc), ">a>b>e>c<c<d<a");
    }

    #[tokio::test]
    async fn if_inside_abort_block_runs_when_aborting() {
        let processor = processor(
            r#"[
                { "type": "abort", "flow": [
                    { "type": "if", "test": "true", "flow": [ { "type": "append", "response": "!" } ] }
                ]},
                { "type": "append", "request": "a", "outcome": "abort" }
            ]"#,
        );
        let exc = run(&processor, Request::post("/")).await;
        assert!(body(&exc).ends_with('!'));
    }

    #[tokio::test]
    async fn destination_is_target_plus_path_and_query() {
        let client = Arc::new(EchoClient::default());
        let processor = processor_with("[]", Arc::clone(&client));
        let exc = run(&processor, Request::get("/users/7?x=1")).await;

        assert_eq!(client.calls(), vec!["http://backend/users/7?x=1"]);
        assert_eq!(exc.property(PROXY_PROPERTY), Some(&Value::from("test")));
    }

    #[tokio::test]
    async fn no_matching_proxy_is_404_problem() {
        let processor = ExchangeProcessor::new(
            Arc::new(RuleManager::default()),
            Arc::new(EchoClient::default()),
            FlowController::new(false),
        );
        let exc = run(&processor, Request::get("/nowhere")).await;

        assert_eq!(exc.state(), ExchangeState::Completed);
        assert_eq!(exc.response().map(|r| r.status), Some(StatusCode::NOT_FOUND));
        assert_eq!(problem(&exc)["type"], "https://flowgate.dev/problems/user/no-route");
    }

    #[tokio::test]
    async fn return_skips_backend_and_runs_response_pass() {
        let client = Arc::new(EchoClient::default());
        let processor = processor_with(
            r#"[
                { "type": "append", "request": "a", "response": "A" },
                { "type": "return", "status": 201 },
                { "type": "append", "request": "never", "response": "never" }
            ]"#,
            Arc::clone(&client),
        );
        let exc = run(&processor, Request::post("/")).await;

        assert!(client.calls().is_empty());
        assert_eq!(exc.response().map(|r| r.status), Some(StatusCode::CREATED));
        assert_eq!(body(&exc), "aA");
    }

    #[tokio::test]
    async fn request_abort_runs_abort_pass_only() {
        let client = Arc::new(EchoClient::default());
        let processor = processor_with(
            r#"[
                { "type": "append", "request": "a", "response": "A" },
                { "type": "abort", "flow": [ { "type": "setHeader", "name": "x-aborted", "value": "yes", "on": "response" } ] },
                { "type": "if", "test": "true", "flow": [
                    { "type": "setHeader", "name": "x", "value": "${method && true}" }
                ]}
            ]"#,
            Arc::clone(&client),
        );
        let exc = run(&processor, Request::post("/")).await;

        assert!(client.calls().is_empty());
        let response = exc.response().expect("abort leaves a response");
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        // the abort-only header is written; `a` handles aborts and appends too
        assert_eq!(response.headers["x-aborted"], "yes");
        assert!(body(&exc).ends_with('A'));
    }

    #[tokio::test]
    async fn backend_failure_is_502_and_aborts() {
        let processor = processor_with(
            r#"[ { "type": "append", "request": "a", "response": "A" } ]"#,
            Arc::new(EchoClient::refusing()),
        );
        let exc = run(&processor, Request::get("/")).await;

        assert_eq!(exc.response().map(|r| r.status), Some(StatusCode::BAD_GATEWAY));
        let body = body(&exc);
        let json: Json = serde_json::from_str(body.trim_end_matches('A')).unwrap();
        assert_eq!(json["type"], "https://flowgate.dev/problems/gateway/backend-call-failed");
    }

    #[tokio::test]
    async fn response_pass_abort_switches_to_abort_pass() {
        let processor = processor(
            r#"[
                { "type": "abort", "flow": [ { "type": "append", "response": "!" } ] },
                { "type": "response", "flow": [
                    { "type": "setHeader", "name": "x-bad", "value": "${method && true}", "on": "response" }
                ]}
            ]"#,
        );
        let exc = run(&processor, Request::post("/").with_body("ok")).await;

        let response = exc.response().expect("response");
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body(&exc).ends_with('!'));
    }

    #[tokio::test]
    async fn cancelled_exchange_aborts_before_first_interceptor() {
        let processor = processor(r#"[ { "type": "append", "request": "a" } ]"#);
        let exc = Exchange::new(Request::post("/"));
        exc.cancel();
        let exc = processor.process(exc).await;

        assert_eq!(exc.response().map(|r| r.status), Some(StatusCode::SERVICE_UNAVAILABLE));
        assert_eq!(exc.request().body_text(), "");
    }

    #[tokio::test]
    async fn service_impl_completes_exchange() {
        let processor = processor("[]");
        let exc = processor
            .oneshot(Exchange::new(Request::post("/").with_body("svc")))
            .await
            .unwrap();
        assert_eq!(body(&exc), "svc");
        assert_eq!(exc.state(), ExchangeState::Completed);
    }
}
