use std::sync::Arc;

use flowgate_core::constructs::{
    AbortBlock, Call, Case, Choice, Destination, For, If, RequestBlock, ResponseBlock, Return,
};
use flowgate_core::{describe_tree, Condition, Interceptor, Language};
use http::{Method, StatusCode};
use regex::Regex;

use super::definition::{ConstructSpec, InterceptorSpec, ProxyDefinition};
use super::{BuildError, FactoryContext, InterceptorRegistry};
use crate::proxy::{PathMatch, RuleKey, ServiceProxy};

/// Turns flow definitions into interceptor trees.
///
/// Every expression and template is compiled here, so a definition that
/// builds cannot fail to compile later on the request path.
pub struct FlowBuilder {
    registry: Arc<InterceptorRegistry>,
    context: FactoryContext,
}

impl FlowBuilder {
    #[must_use]
    pub fn new(registry: Arc<InterceptorRegistry>, context: FactoryContext) -> Self {
        Self { registry, context }
    }

    /// Builds a list of sibling interceptors, in definition order.
    ///
    /// # Errors
    ///
    /// Returns the first [`BuildError`] met while building any node.
    pub fn build_flow(&self, specs: &[InterceptorSpec]) -> Result<Vec<Arc<dyn Interceptor>>, BuildError> {
        specs.iter().map(|spec| self.build(spec)).collect()
    }

    /// Builds one node and its subtree.
    ///
    /// # Errors
    ///
    /// Fails on an unknown leaf type, an expression that does not compile, or
    /// an invalid construct setting.
    pub fn build(&self, spec: &InterceptorSpec) -> Result<Arc<dyn Interceptor>, BuildError> {
        match spec {
            InterceptorSpec::Construct(construct) => self.construct(construct),
            InterceptorSpec::Plugin { name, config } => self.registry.create(name, &self.context, config),
        }
    }

    fn condition(&self, language: Language, source: &str) -> Result<Condition, BuildError> {
        Ok(Condition::new(self.context.compiler.compile(language, source)?))
    }

    fn construct(&self, spec: &ConstructSpec) -> Result<Arc<dyn Interceptor>, BuildError> {
        let controller = self.context.controller;
        let interceptor: Arc<dyn Interceptor> = match spec {
            ConstructSpec::Request { flow } => {
                Arc::new(RequestBlock::new(self.build_flow(flow)?).with_controller(controller))
            }
            ConstructSpec::Response { flow } => Arc::new(ResponseBlock::new(self.build_flow(flow)?)),
            ConstructSpec::Abort { flow } => Arc::new(AbortBlock::new(self.build_flow(flow)?)),
            ConstructSpec::If { test, language, flow } => Arc::new(
                If::new(self.condition(*language, test)?, self.build_flow(flow)?).with_controller(controller),
            ),
            ConstructSpec::For { items, language, flow } => Arc::new(
                For::new(self.context.compiler.compile(*language, items)?, self.build_flow(flow)?)
                    .with_controller(controller),
            ),
            ConstructSpec::Choose { cases, otherwise } => {
                let cases = cases
                    .iter()
                    .map(|case| {
                        Ok(Case::new(
                            self.condition(case.language, &case.test)?,
                            self.build_flow(&case.flow)?,
                        ))
                    })
                    .collect::<Result<Vec<_>, BuildError>>()?;
                let otherwise = otherwise
                    .as_deref()
                    .map(|flow| self.build_flow(flow))
                    .transpose()?;
                Arc::new(Choice::new(cases, otherwise).with_controller(controller))
            }
            ConstructSpec::Call { url, language } => Arc::new(
                Call::new(
                    self.context.compiler.compile_template(*language, url)?,
                    Arc::clone(&self.context.client),
                )
                .with_controller(controller),
            ),
            ConstructSpec::Return { status, content_type } => {
                let mut construct = Return::new();
                if let Some(code) = status {
                    let status = StatusCode::from_u16(*code).map_err(|_| BuildError::InvalidConfig {
                        name: "return".to_string(),
                        reason: format!("invalid status code {code}"),
                    })?;
                    construct = construct.with_status(status);
                }
                if let Some(content_type) = content_type {
                    construct = construct.with_content_type(content_type.clone());
                }
                Arc::new(construct)
            }
            ConstructSpec::Destination { url } => Arc::new(Destination::new(url.clone())),
        };
        Ok(interceptor)
    }

    /// Builds a routing rule and its root chain.
    ///
    /// # Errors
    ///
    /// Any failure is wrapped in [`BuildError::Proxy`] naming the proxy.
    pub fn build_proxy(&self, definition: &ProxyDefinition) -> Result<ServiceProxy, BuildError> {
        let label = definition.name.clone().unwrap_or_else(|| "<unnamed>".to_string());
        let wrap = |source: BuildError| BuildError::Proxy {
            proxy: label.clone(),
            source: Box::new(source),
        };

        let key = rule_key(definition).map_err(wrap)?;
        let name = definition.name.clone().unwrap_or_else(|| key.to_string());
        let interceptors = self.build_flow(&definition.flow).map_err(wrap)?;

        tracing::debug!(proxy = %name, rule = %key, tree = %describe_tree(&interceptors), "built proxy");
        Ok(ServiceProxy::new(name, key, definition.target.clone(), interceptors))
    }

    /// Builds every proxy, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// See [`FlowBuilder::build_proxy`].
    pub fn build_proxies(&self, definitions: &[ProxyDefinition]) -> Result<Vec<ServiceProxy>, BuildError> {
        definitions.iter().map(|d| self.build_proxy(d)).collect()
    }
}

fn rule_key(definition: &ProxyDefinition) -> Result<RuleKey, BuildError> {
    let invalid = |reason: String| BuildError::InvalidConfig {
        name: "proxy".to_string(),
        reason,
    };

    let method = definition
        .method
        .as_deref()
        .map(|m| {
            Method::from_bytes(m.to_ascii_uppercase().as_bytes())
                .map_err(|_| invalid(format!("invalid method {m:?}")))
        })
        .transpose()?;

    let path = match &definition.path {
        None => None,
        Some(path) if path.regex => Some(PathMatch::Regex(
            Regex::new(&path.uri).map_err(|e| invalid(format!("invalid path regex: {e}")))?,
        )),
        Some(path) => Some(PathMatch::Prefix(path.uri.clone())),
    };

    Ok(RuleKey {
        host: definition.host.clone(),
        method,
        path,
    })
}
