//! flowgate server: HTTP transport, proxy rules, flow builder, and the
//! exchange processor that drives interceptor flows against backends.

pub mod builder;
pub mod client;
pub mod network;
pub mod proxy;
pub mod service;

#[cfg(test)]
mod testing;

pub use builder::{BuildError, FlowBuilder, GatewayDefinition, InterceptorRegistry};
pub use client::ReqwestHttpClient;
pub use network::{NetworkConfig, NetworkModule};
pub use proxy::{RuleManager, RuleMatcher, ServiceProxy};
pub use service::{build_exchange_pipeline, ExchangePipeline, ExchangeProcessor, GatewayConfig, GatewayError};
