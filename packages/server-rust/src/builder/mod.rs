//! Building interceptor trees from flow definitions.
//!
//! 1. **Definitions** (`definition`): serde model of proxies and flows
//! 2. **Registry** (`registry`): name-keyed factories for leaf interceptors
//! 3. **Leaves** (`leaves`): built-in `setHeader` and `setProperty`
//! 4. **Builder** (`flow`): turns definitions into shared interceptor trees,
//!    compiling every expression once up front

pub mod definition;
pub mod flow;
pub mod leaves;
pub mod registry;

use std::sync::Arc;

use flowgate_core::{ExpressionCompiler, ExpressionError, FlowController, HttpClient};

pub use flow::FlowBuilder;
pub use leaves::{HeaderTarget, SetHeader, SetProperty};
pub use registry::{InterceptorFactory, InterceptorRegistry};
pub use definition::{CaseSpec, ConstructSpec, GatewayDefinition, InterceptorSpec, PathDefinition, ProxyDefinition};

/// Configuration-time failure while building a flow.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("unknown interceptor type: {0}")]
    UnknownType(String),
    #[error(transparent)]
    Expression(#[from] ExpressionError),
    #[error("invalid {name} configuration: {reason}")]
    InvalidConfig { name: String, reason: String },
    #[error("proxy {proxy}: {source}")]
    Proxy {
        proxy: String,
        source: Box<BuildError>,
    },
}

/// Shared services handed to every factory and construct.
#[derive(Clone)]
pub struct FactoryContext {
    /// Controller the containers use for their children.
    pub controller: FlowController,
    pub compiler: ExpressionCompiler,
    /// Client used by `call` constructs.
    pub client: Arc<dyn HttpClient>,
}

impl FactoryContext {
    #[must_use]
    pub fn new(controller: FlowController, compiler: ExpressionCompiler, client: Arc<dyn HttpClient>) -> Self {
        Self {
            controller,
            compiler,
            client,
        }
    }
}
