//! HTTP handler definitions for the gateway listener.
//!
//! This module defines `AppState` (the shared state carried through axum
//! extractors) and re-exports all handler functions for convenient access
//! when building the router.

pub mod gateway;
pub mod health;

pub use gateway::gateway_handler;
pub use health::{health_handler, liveness_handler, readiness_handler};

use std::sync::Arc;
use std::time::Instant;

use super::ShutdownController;
use crate::service::{ExchangePipeline, GatewayConfig};

/// Shared application state passed to all axum handlers via `State` extraction.
///
/// Holds `Arc` references and a cloneable pipeline so cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    /// Graceful shutdown controller with health state and in-flight tracking.
    pub shutdown: Arc<ShutdownController>,
    /// Exchange pipeline every proxied request is sent through.
    pub pipeline: ExchangePipeline,
    pub config: Arc<GatewayConfig>,
    /// Process start time, used for uptime calculation.
    pub start_time: Instant,
}
