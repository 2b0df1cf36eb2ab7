//! Metrics middleware for exchanges.
//!
//! Records a `flowgate_exchanges_total` counter labelled by method and status
//! class, and a `flowgate_exchange_duration_seconds` histogram, inside an
//! `exchange` tracing span.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use flowgate_core::Exchange;
use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use crate::service::error::GatewayError;

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

/// `2xx`, `4xx`, ... for a completed exchange; `error` when the pipeline
/// itself failed.
fn status_class(result: &Result<Exchange, GatewayError>) -> &'static str {
    let Ok(exchange) = result else {
        return "error";
    };
    match exchange.response().map(|r| r.status.as_u16()) {
        Some(100..=199) => "1xx",
        Some(200..=299) => "2xx",
        Some(300..=399) => "3xx",
        Some(400..=499) => "4xx",
        Some(500..=599) => "5xx",
        _ => "none",
    }
}

impl<S> Service<Exchange> for MetricsService<S>
where
    S: Service<Exchange, Response = Exchange, Error = GatewayError> + Send,
    S::Future: Send + 'static,
{
    type Response = Exchange;
    type Error = GatewayError;
    type Future = Pin<Box<dyn Future<Output = Result<Exchange, GatewayError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, exchange: Exchange) -> Self::Future {
        let exchange_id = exchange.id();
        let method = exchange.request().method.to_string();
        let path = exchange.request().path().to_string();

        let span = info_span!(
            "exchange",
            id = exchange_id,
            method = %method,
            path = %path,
            status = tracing::field::Empty,
            duration_ms = tracing::field::Empty,
        );

        let fut = self.inner.call(exchange);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;
                let elapsed = start.elapsed();

                let class = status_class(&result);
                let status = result
                    .as_ref()
                    .ok()
                    .and_then(|exc| exc.response())
                    .map_or(0, |r| r.status.as_u16());

                #[allow(clippy::cast_possible_truncation)]
                let duration_ms = elapsed.as_millis() as u64;
                tracing::Span::current().record("status", status);
                tracing::Span::current().record("duration_ms", duration_ms);

                metrics::counter!("flowgate_exchanges_total", "method" => method, "status" => class)
                    .increment(1);
                metrics::histogram!("flowgate_exchange_duration_seconds", "status" => class)
                    .record(elapsed.as_secs_f64());

                tracing::info!(id = exchange_id, status, duration_ms, "exchange complete");
                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use flowgate_core::{Request, Response};
    use http::StatusCode;
    use tower::ServiceExt;

    use super::*;

    /// Completes each exchange with a fixed status.
    struct Fixed(StatusCode);

    impl Service<Exchange> for Fixed {
        type Response = Exchange;
        type Error = GatewayError;
        type Future = Pin<Box<dyn Future<Output = Result<Exchange, GatewayError>> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, mut exchange: Exchange) -> Self::Future {
            exchange.set_response(Response::new(self.0));
            Box::pin(async move { Ok(exchange) })
        }
    }

    #[tokio::test]
    async fn metrics_layer_passes_through_exchange() {
        let svc = MetricsLayer.layer(Fixed(StatusCode::ACCEPTED));
        let exc = svc.oneshot(Exchange::new(Request::get("/m"))).await.unwrap();
        assert_eq!(exc.response().map(|r| r.status), Some(StatusCode::ACCEPTED));
    }

    #[test]
    fn status_classes() {
        let mut exc = Exchange::new(Request::get("/"));
        assert_eq!(status_class(&Ok(Exchange::new(Request::get("/")))), "none");
        exc.set_response(Response::new(StatusCode::BAD_GATEWAY));
        assert_eq!(status_class(&Ok(exc)), "5xx");
        assert_eq!(status_class(&Err(GatewayError::Overloaded)), "error");
    }
}
