//! Exchange processing service.
//!
//! 1. **Processor** (`processor`): the per-exchange state machine, as a
//!    `tower::Service<Exchange>`
//! 2. **Middleware** (`middleware`): Tower layers (load shedding, metrics)
//! 3. **Configuration** (`config`): gateway-level settings

pub mod config;
pub mod error;
pub mod middleware;
pub mod processor;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use middleware::{build_exchange_pipeline, ExchangePipeline};
pub use processor::{ExchangeProcessor, PROXY_PROPERTY};
