//! Fallback handler that turns every non-administrative request into an
//! exchange and runs it through the pipeline.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::CONTENT_LENGTH;
use axum::http::StatusCode;
use axum::response::Response;
use flowgate_core::constructs::is_hop_by_hop;
use flowgate_core::{Exchange, ProblemDetails};
use tower::ServiceExt;

use super::AppState;
use crate::network::middleware::REQUEST_ID_HEADER;
use crate::network::HealthState;
use crate::service::GatewayError;

/// Exchange property holding the inbound request id.
pub const REQUEST_ID_PROPERTY: &str = "requestId";

const COMPONENT: &str = "gateway";

/// Proxies one HTTP request.
///
/// Requests are refused with `503` unless the gateway is ready. The body is
/// buffered up to `max_body_bytes`; larger bodies get `413`. The exchange is
/// cancelled if the connection goes away before it completes.
pub async fn gateway_handler(State(state): State<AppState>, request: Request) -> Response {
    let _in_flight = state.shutdown.in_flight_guard();
    let production = state.config.production;

    if state.shutdown.health_state() != HealthState::Ready {
        return into_http_response(
            ProblemDetails::internal(production, COMPONENT)
                .add_subtype("unavailable")
                .status(StatusCode::SERVICE_UNAVAILABLE)
                .title("The gateway is not accepting requests.")
                .internal_field("state", state.shutdown.health_state().as_str())
                .build(),
        );
    }

    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, state.config.network.max_body_bytes).await {
        Ok(body) => body,
        Err(error) => {
            tracing::debug!(error = %error, "request body rejected");
            return into_http_response(
                ProblemDetails::user(production, COMPONENT)
                    .add_subtype("body-too-large")
                    .status(StatusCode::PAYLOAD_TOO_LARGE)
                    .title("The request body could not be read within the configured limit.")
                    .internal_field("limit", state.config.network.max_body_bytes)
                    .build(),
            );
        }
    };

    let mut core_request = flowgate_core::Request::new(parts.method, parts.uri.to_string());
    core_request.headers = parts.headers;
    core_request.body = body;

    let request_id = core_request
        .headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map_or_else(|| uuid::Uuid::new_v4().to_string(), str::to_string);

    let mut exchange = Exchange::new(core_request);
    exchange.set_property(REQUEST_ID_PROPERTY, request_id);
    let token = state.shutdown.exchange_token();
    let _cancel_on_drop = token.clone().drop_guard();
    exchange.set_cancellation_token(token);

    match state.pipeline.clone().oneshot(exchange).await {
        Ok(mut exchange) => match exchange.take_response() {
            Some(response) => into_http_response(response),
            None => into_http_response(
                ProblemDetails::internal(production, COMPONENT)
                    .add_subtype("missing-response")
                    .title("The exchange completed without a response.")
                    .build(),
            ),
        },
        Err(GatewayError::Overloaded) => into_http_response(
            ProblemDetails::internal(production, COMPONENT)
                .add_subtype("overloaded")
                .status(StatusCode::SERVICE_UNAVAILABLE)
                .title("The gateway is overloaded. Try again later.")
                .build(),
        ),
        Err(error) => {
            tracing::error!(error = %error, "exchange pipeline failed");
            into_http_response(
                ProblemDetails::internal(production, COMPONENT)
                    .title("The exchange could not be processed.")
                    .error(&error)
                    .build(),
            )
        }
    }
}

/// Converts an exchange response into an axum response.
///
/// Hop-by-hop headers and `Content-Length` are dropped; the server framing
/// sets its own.
#[must_use]
pub fn into_http_response(response: flowgate_core::Response) -> Response {
    let mut out = Response::new(Body::from(response.body));
    *out.status_mut() = response.status;
    let headers = out.headers_mut();
    for (name, value) in &response.headers {
        if !is_hop_by_hop(name) && *name != CONTENT_LENGTH {
            headers.append(name.clone(), value.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use axum::http::header::CONTENT_TYPE;

    use super::*;
    use crate::network::NetworkConfig;
    use crate::service::GatewayConfig;
    use crate::testing::app_state;

    fn ready_state(config: GatewayConfig) -> AppState {
        let state = app_state(config);
        state.shutdown.set_ready();
        state
    }

    fn request(uri: &str, body: &'static str) -> Request {
        axum::http::Request::builder()
            .method("POST")
            .uri(uri)
            .header(CONTENT_TYPE, "text/plain")
            .body(Body::from(body))
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn proxies_request_through_pipeline() {
        let state = ready_state(GatewayConfig::default());
        let response = gateway_handler(State(state.clone()), request("/api/x", "hi")).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "text/plain");
        assert_eq!(body_text(response).await, "hi+!");
        assert_eq!(state.shutdown.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn unmatched_request_gets_problem_json() {
        let state = ready_state(GatewayConfig::default());
        let response = gateway_handler(State(state), request("/nowhere", "")).await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()[CONTENT_TYPE], "application/problem+json");
        let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(json["type"], "https://flowgate.dev/problems/user/no-route");
    }

    #[tokio::test]
    async fn refuses_requests_until_ready() {
        let state = app_state(GatewayConfig::default());
        let response = gateway_handler(State(state), request("/api", "hi")).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn refuses_requests_while_draining() {
        let state = ready_state(GatewayConfig::default());
        state.shutdown.trigger_shutdown();
        let response = gateway_handler(State(state), request("/api", "hi")).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn oversized_body_gets_413() {
        let config = GatewayConfig {
            network: NetworkConfig {
                max_body_bytes: 4,
                ..NetworkConfig::default()
            },
            ..GatewayConfig::default()
        };
        let state = ready_state(config);
        let response = gateway_handler(State(state), request("/api", "far too long")).await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn overloaded_pipeline_gets_503() {
        let config = GatewayConfig {
            max_concurrent_exchanges: 0,
            ..GatewayConfig::default()
        };
        let state = ready_state(config);
        let response = gateway_handler(State(state), request("/api", "hi")).await;

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(body_text(response).await.contains("problems/internal/overloaded"));
    }

    #[tokio::test]
    async fn cancelled_shutdown_cancels_new_exchanges() {
        let state = ready_state(GatewayConfig::default());
        state.shutdown.cancel_in_flight();
        let response = gateway_handler(State(state), request("/api", "hi")).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn into_http_response_strips_framing_headers() {
        let response = flowgate_core::Response::ok()
            .with_header("connection", "close")
            .with_header("transfer-encoding", "chunked")
            .with_header("x-kept", "1")
            .with_body("abc");
        let out = into_http_response(response);

        assert!(out.headers().get("connection").is_none());
        assert!(out.headers().get("transfer-encoding").is_none());
        assert!(out.headers().get(CONTENT_LENGTH).is_none());
        assert_eq!(out.headers()["x-kept"], "1");
    }
}
