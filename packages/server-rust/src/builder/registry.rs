use std::sync::Arc;

use dashmap::DashMap;
use flowgate_core::Interceptor;
use parking_lot::RwLock;
use serde_json::{Map, Value as Json};

use super::leaves::{set_header_factory, set_property_factory};
use super::{BuildError, FactoryContext};

/// Creates a leaf interceptor from its definition fields (everything but
/// `type`).
pub type InterceptorFactory = Arc<
    dyn Fn(&FactoryContext, &Map<String, Json>) -> Result<Arc<dyn Interceptor>, BuildError>
        + Send
        + Sync,
>;

// ---------------------------------------------------------------------------
// InterceptorRegistry
// ---------------------------------------------------------------------------

/// Name-keyed registry of leaf interceptor factories.
///
/// Structural constructs are built directly by the
/// [`FlowBuilder`](super::FlowBuilder); every other `type` in a flow
/// definition is looked up here.
pub struct InterceptorRegistry {
    factories: DashMap<String, InterceptorFactory>,
    /// Registration order, for deterministic listings.
    order: RwLock<Vec<String>>,
}

impl InterceptorRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            factories: DashMap::new(),
            order: RwLock::new(Vec::new()),
        }
    }

    /// Creates a registry with the built-in leaves (`setHeader`,
    /// `setProperty`) registered.
    #[must_use]
    pub fn with_builtin_leaves() -> Self {
        let registry = Self::new();
        registry.register("setHeader", Arc::new(set_header_factory));
        registry.register("setProperty", Arc::new(set_property_factory));
        registry
    }

    /// Registers a factory under `name`, replacing any previous one.
    pub fn register(&self, name: impl Into<String>, factory: InterceptorFactory) {
        let name = name.into();
        if self.factories.insert(name.clone(), factory).is_some() {
            tracing::warn!(interceptor = %name, "replacing registered interceptor factory");
        } else {
            self.order.write().push(name);
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<InterceptorFactory> {
        self.factories.get(name).map(|entry| Arc::clone(entry.value()))
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.order.read().clone()
    }

    /// Builds the leaf registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::UnknownType`] if nothing is registered under
    /// `name`, or whatever the factory reports for an invalid configuration.
    pub fn create(
        &self,
        name: &str,
        context: &FactoryContext,
        config: &Map<String, Json>,
    ) -> Result<Arc<dyn Interceptor>, BuildError> {
        let factory = self
            .get(name)
            .ok_or_else(|| BuildError::UnknownType(name.to_string()))?;
        factory(context, config)
    }
}

impl Default for InterceptorRegistry {
    fn default() -> Self {
        Self::with_builtin_leaves()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use flowgate_core::{Exchange, Flows, InterceptorError, Outcome};

    use super::*;
    use crate::testing::context;

    struct Tagged(String);

    #[async_trait]
    impl Interceptor for Tagged {
        fn name(&self) -> &str {
            &self.0
        }

        fn flows(&self) -> Flows {
            Flows::REQUEST
        }

        async fn handle_request(&self, _exchange: &mut Exchange) -> Result<Outcome, InterceptorError> {
            Ok(Outcome::Continue)
        }
    }

    fn tagged(tag: &'static str) -> InterceptorFactory {
        Arc::new(move |_ctx: &FactoryContext, _config: &Map<String, Json>| {
            Ok::<_, BuildError>(Arc::new(Tagged(tag.to_string())) as Arc<dyn Interceptor>)
        })
    }

    #[test]
    fn builtin_leaves_are_registered_in_order() {
        let registry = InterceptorRegistry::with_builtin_leaves();
        assert_eq!(registry.names(), vec!["setHeader", "setProperty"]);
        assert!(registry.contains("setHeader"));
        assert!(!InterceptorRegistry::new().contains("setHeader"));
    }

    #[test]
    fn create_uses_registered_factory() {
        let registry = InterceptorRegistry::new();
        registry.register("audit", tagged("audit-v1"));

        let built = registry.create("audit", &context(), &Map::new()).unwrap();
        assert_eq!(built.name(), "audit-v1");
    }

    #[test]
    fn re_registering_replaces_without_duplicating_order() {
        let registry = InterceptorRegistry::new();
        registry.register("audit", tagged("audit-v1"));
        registry.register("audit", tagged("audit-v2"));

        assert_eq!(registry.names(), vec!["audit"]);
        let built = registry.create("audit", &context(), &Map::new()).unwrap();
        assert_eq!(built.name(), "audit-v2");
    }

    #[test]
    fn unknown_name_is_an_error() {
        let err = InterceptorRegistry::new()
            .create("nope", &context(), &Map::new())
            .err()
            .unwrap();
        assert!(matches!(err, BuildError::UnknownType(ref name) if name == "nope"));
    }
}
