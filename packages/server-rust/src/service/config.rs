use std::time::Duration;

use flowgate_core::ScriptConfig;

use crate::network::NetworkConfig;

/// Gateway-level configuration.
///
/// Controls error verbosity, exchange concurrency, backend timeouts and the
/// script sandbox, plus the listener settings in [`NetworkConfig`].
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Hides internal detail (error chains, extension fields) in problem
    /// responses when set.
    pub production: bool,
    /// Maximum number of exchanges processed at once before load shedding.
    pub max_concurrent_exchanges: u32,
    /// Total time allowed for one backend call, including the body.
    pub backend_timeout: Duration,
    /// Time allowed to establish a backend connection.
    pub connect_timeout: Duration,
    /// Sandbox limits and pool size for script expressions.
    pub scripts: ScriptConfig,
    pub network: NetworkConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            production: false,
            max_concurrent_exchanges: 1000,
            backend_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            scripts: ScriptConfig::default(),
            network: NetworkConfig::default(),
        }
    }
}
