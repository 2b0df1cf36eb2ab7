//! Pipeline composition: wraps the exchange processor in the middleware
//! layers.

use flowgate_core::Exchange;
use tower::util::BoxCloneSyncService;
use tower::ServiceBuilder;

use super::load_shed::LoadShedLayer;
use super::metrics::MetricsLayer;
use crate::service::config::GatewayConfig;
use crate::service::error::GatewayError;
use crate::service::processor::ExchangeProcessor;

/// The type-erased exchange pipeline shared by the HTTP handlers.
pub type ExchangePipeline = BoxCloneSyncService<Exchange, Exchange, GatewayError>;

/// Build the exchange pipeline by wrapping the `ExchangeProcessor` with
/// middleware layers.
///
/// Layer order (outermost to innermost):
/// 1. `LoadShedLayer` -- reject when overloaded (fail fast before doing any work)
/// 2. `MetricsLayer` -- record timing and outcome (closest to the processor)
#[must_use]
pub fn build_exchange_pipeline(processor: ExchangeProcessor, config: &GatewayConfig) -> ExchangePipeline {
    BoxCloneSyncService::new(
        ServiceBuilder::new()
            .layer(LoadShedLayer::new(config.max_concurrent_exchanges))
            .layer(MetricsLayer)
            .service(processor),
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use flowgate_core::{HttpMessage, Request};
    use http::StatusCode;
    use tower::ServiceExt;

    use super::*;
    use crate::testing::echo_pipeline;

    fn pipeline(max_concurrent_exchanges: u32) -> ExchangePipeline {
        echo_pipeline(&GatewayConfig {
            max_concurrent_exchanges,
            ..GatewayConfig::default()
        })
    }

    #[tokio::test]
    async fn pipeline_runs_exchange_end_to_end() {
        let exc = pipeline(10)
            .oneshot(Exchange::new(Request::post("/api/x").with_body("hi")))
            .await
            .unwrap();
        let response = exc.response().expect("response");
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body_text(), "hi+!");
    }

    #[tokio::test]
    async fn pipeline_with_zero_capacity_sheds_everything() {
        let err = pipeline(0)
            .oneshot(Exchange::new(Request::get("/api")))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Overloaded));
    }

    #[tokio::test]
    async fn cloned_pipeline_routes_independently() {
        let svc = pipeline(5);
        let matched = svc.clone().oneshot(Exchange::new(Request::get("/api"))).await;
        let unmatched = svc.oneshot(Exchange::new(Request::get("/other"))).await;
        assert!(matched.is_ok());
        assert_eq!(
            unmatched.unwrap().response().map(|r| r.status),
            Some(StatusCode::NOT_FOUND)
        );
    }
}
