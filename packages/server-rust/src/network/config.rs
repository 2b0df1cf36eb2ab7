//! Network configuration types for the gateway listener.

use std::time::Duration;

/// Top-level network configuration for the gateway.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Bind address for the listener.
    pub host: String,
    /// Port to listen on. 0 means OS-assigned.
    pub port: u16,
    /// Maximum time one inbound request may take end to end.
    pub request_timeout: Duration,
    /// Largest request body the gateway will buffer.
    pub max_body_bytes: usize,
    /// How long shutdown waits for in-flight exchanges before cancelling them.
    pub drain_timeout: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 0,
            request_timeout: Duration::from_secs(60),
            max_body_bytes: 10 * 1024 * 1024,
            drain_timeout: Duration::from_secs(30),
        }
    }
}
