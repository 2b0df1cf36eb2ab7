use std::sync::Arc;

use arc_swap::ArcSwap;
use flowgate_core::Exchange;

use super::rule::ServiceProxy;
use super::RuleMatcher;

/// Ordered proxy table with lock-free hot replacement.
///
/// Lookups load the current table without locking; [`RuleManager::replace`]
/// swaps in a new table atomically, so in-flight exchanges keep the proxy
/// (and interceptor chain) they were matched against.
#[derive(Debug)]
pub struct RuleManager {
    proxies: ArcSwap<Vec<Arc<ServiceProxy>>>,
}

impl RuleManager {
    #[must_use]
    pub fn new(proxies: Vec<ServiceProxy>) -> Self {
        Self {
            proxies: ArcSwap::from_pointee(proxies.into_iter().map(Arc::new).collect()),
        }
    }

    /// Replaces the whole table.
    pub fn replace(&self, proxies: Vec<ServiceProxy>) {
        let count = proxies.len();
        self.proxies
            .store(Arc::new(proxies.into_iter().map(Arc::new).collect()));
        tracing::info!(proxies = count, "proxy rules replaced");
    }

    /// Snapshot of the current table, in match order.
    #[must_use]
    pub fn proxies(&self) -> Arc<Vec<Arc<ServiceProxy>>> {
        self.proxies.load_full()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.proxies.load().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.proxies.load().is_empty()
    }
}

impl Default for RuleManager {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl RuleMatcher for RuleManager {
    fn find(&self, exchange: &Exchange) -> Option<Arc<ServiceProxy>> {
        let request = exchange.request();
        self.proxies
            .load()
            .iter()
            .find(|proxy| proxy.key().matches(request))
            .cloned()
    }
}
