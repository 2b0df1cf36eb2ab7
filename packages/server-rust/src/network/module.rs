//! Network module with deferred startup lifecycle.
//!
//! `new()` creates shared state, `start()` binds the TCP listener, and
//! `serve()` accepts connections until the shutdown future resolves. The
//! split lets the binary report the bound port (and wire metrics) between
//! binding and serving.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::handlers::{gateway_handler, health_handler, liveness_handler, readiness_handler, AppState};
use super::middleware::build_http_layers;
use super::shutdown::ShutdownController;
use crate::service::{ExchangePipeline, GatewayConfig};

/// Manages the gateway's HTTP listener lifecycle.
///
/// 1. `new()` -- allocates shared state (shutdown controller)
/// 2. `start()` -- binds the TCP listener to the configured address
/// 3. `serve()` -- accepts connections until shutdown is signalled
pub struct NetworkModule {
    config: Arc<GatewayConfig>,
    pipeline: ExchangePipeline,
    listener: Option<TcpListener>,
    shutdown: Arc<ShutdownController>,
    start_time: Instant,
}

impl NetworkModule {
    /// Creates a new network module without binding any port.
    #[must_use]
    pub fn new(config: Arc<GatewayConfig>, pipeline: ExchangePipeline) -> Self {
        Self {
            config,
            pipeline,
            listener: None,
            shutdown: Arc::new(ShutdownController::new()),
            start_time: Instant::now(),
        }
    }

    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    /// Assembles the axum router with all routes and middleware.
    ///
    /// Routes:
    /// - `GET /_gateway/health` -- detailed health JSON
    /// - `GET /_gateway/health/live` -- liveness probe
    /// - `GET /_gateway/health/ready` -- readiness probe
    /// - everything else -- proxied through the exchange pipeline
    pub fn build_router(&self) -> Router {
        let state = AppState {
            shutdown: Arc::clone(&self.shutdown),
            pipeline: self.pipeline.clone(),
            config: Arc::clone(&self.config),
            start_time: self.start_time,
        };

        Router::new()
            .route("/_gateway/health", get(health_handler))
            .route("/_gateway/health/live", get(liveness_handler))
            .route("/_gateway/health/ready", get(readiness_handler))
            .fallback(gateway_handler)
            .layer(build_http_layers(&self.config.network))
            .with_state(state)
    }

    /// Binds the TCP listener to the configured host and port.
    ///
    /// Returns the bound port, which differs from the configured one when
    /// port 0 asks for an OS-assigned port.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound (e.g., port in use).
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let network = &self.config.network;
        let addr = format!("{}:{}", network.host, network.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();

        info!("gateway listener bound to {}:{}", network.host, port);

        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves connections until `shutdown` resolves.
    ///
    /// After the shutdown signal:
    /// 1. Health state moves to Draining and new requests get `503`
    /// 2. In-flight exchanges get `drain_timeout` to finish
    /// 3. Whatever is still running is cancelled
    /// 4. Health state moves to Stopped once every exchange has completed
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called first, or if the server
    /// hits a fatal I/O error.
    pub async fn serve(mut self, shutdown: impl Future<Output = ()> + Send + 'static) -> anyhow::Result<()> {
        let listener = self
            .listener
            .take()
            .ok_or_else(|| anyhow::anyhow!("start() must be called before serve()"))?;
        let router = self.build_router();

        self.shutdown.set_ready();
        info!("gateway ready");

        let controller = Arc::clone(&self.shutdown);
        let drain_timeout = self.config.network.drain_timeout;
        let signal = async move {
            shutdown.await;
            info!(in_flight = controller.in_flight_count(), "shutdown signal received, draining");
            controller.trigger_shutdown();
            tokio::spawn(drain_or_cancel(controller, drain_timeout));
        };

        axum::serve(listener, router).with_graceful_shutdown(signal).await?;

        if self.shutdown.wait_for_drain(Duration::ZERO).await {
            info!("gateway stopped");
        } else {
            warn!(in_flight = self.shutdown.in_flight_count(), "gateway stopped with exchanges still running");
        }
        Ok(())
    }
}

/// Waits for in-flight exchanges, cancelling them once `timeout` expires.
async fn drain_or_cancel(controller: Arc<ShutdownController>, timeout: Duration) {
    if controller.wait_for_drain(timeout).await {
        info!("all exchanges drained");
    } else {
        warn!(
            in_flight = controller.in_flight_count(),
            "drain timeout expired, cancelling in-flight exchanges"
        );
        controller.cancel_in_flight();
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::network::{HealthState, NetworkConfig};
    use crate::testing::echo_pipeline;

    fn module() -> NetworkModule {
        let config = GatewayConfig {
            network: NetworkConfig {
                host: "127.0.0.1".to_string(),
                ..NetworkConfig::default()
            },
            ..GatewayConfig::default()
        };
        let pipeline = echo_pipeline(&config);
        NetworkModule::new(Arc::new(config), pipeline)
    }

    #[test]
    fn new_creates_module_without_binding() {
        assert!(module().listener.is_none());
    }

    #[test]
    fn shutdown_controller_returns_shared_arc() {
        let module = module();
        assert!(Arc::ptr_eq(&module.shutdown_controller(), &module.shutdown_controller()));
    }

    #[tokio::test]
    async fn router_serves_health_routes() {
        let module = module();
        module.shutdown_controller().set_ready();
        let router = module.build_router();

        let response = router
            .clone()
            .oneshot(Request::get("/_gateway/health/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router
            .oneshot(Request::get("/_gateway/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["state"], "ready");
    }

    #[tokio::test]
    async fn router_falls_back_to_gateway_and_sets_request_id() {
        let module = module();
        module.shutdown_controller().set_ready();

        let response = module
            .build_router()
            .oneshot(Request::post("/api/orders").body(Body::from("x")).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"x+!");
    }

    #[tokio::test]
    async fn start_binds_to_os_assigned_port() {
        let mut module = module();
        let port = module.start().await.expect("start should succeed");
        assert!(port > 0, "OS-assigned port should be > 0");
        assert!(module.listener.is_some());
    }

    #[tokio::test]
    async fn serve_without_start_is_an_error() {
        let err = module().serve(std::future::pending::<()>()).await.unwrap_err();
        assert!(err.to_string().contains("start() must be called"));
    }

    #[tokio::test]
    async fn serve_proxies_until_shutdown() {
        let mut module = module();
        let port = module.start().await.unwrap();
        let controller = module.shutdown_controller();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(module.serve(async move {
            let _ = stop_rx.await;
        }));

        let client = reqwest::Client::new();
        let response = client
            .post(format!("http://127.0.0.1:{port}/api/echo"))
            .body("hello")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);
        assert_eq!(response.text().await.unwrap(), "hello+!");
        drop(client);

        stop_tx.send(()).unwrap();
        server.await.unwrap().unwrap();
        assert_eq!(controller.health_state(), HealthState::Stopped);
    }
}
