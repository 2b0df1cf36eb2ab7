//! Proxy rules: selecting the interceptor chain and backend for an exchange.

pub mod manager;
pub mod rule;

use std::sync::Arc;

use flowgate_core::Exchange;

pub use manager::RuleManager;
pub use rule::{PathMatch, RuleKey, ServiceProxy};

/// Maps an inbound exchange to the proxy that handles it.
pub trait RuleMatcher: Send + Sync {
    /// Returns the first proxy whose rule matches, or `None` when the gateway
    /// has no route for the request.
    fn find(&self, exchange: &Exchange) -> Option<Arc<ServiceProxy>>;
}
