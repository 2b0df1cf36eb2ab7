use std::sync::Arc;

use async_trait::async_trait;

use crate::error::InterceptorError;
use crate::exchange::Exchange;
use crate::outcome::{Flows, Outcome};

/// A pluggable processing unit in the flow.
///
/// Instances are built once at configuration time and shared by every
/// concurrently processed exchange, so implementations must keep all
/// per-exchange state on the [`Exchange`] (properties, deferred lists), never
/// in their own fields.
///
/// `handle_response` serves both the response and the abort pass; use
/// [`Exchange::state`] to tell them apart when it matters.
#[async_trait]
pub trait Interceptor: Send + Sync {
    /// Display name used in logs and problem details.
    fn name(&self) -> &str;

    /// Phases this interceptor participates in.
    fn flows(&self) -> Flows {
        Flows::REQUEST_RESPONSE
    }

    /// Child interceptors of a container construct. Leaves have none.
    fn children(&self) -> &[Arc<dyn Interceptor>] {
        &[]
    }

    /// One-line description for diagnostics (e.g. `if (test)`).
    fn short_description(&self) -> String {
        self.name().to_string()
    }

    /// Called during the request pass.
    async fn handle_request(&self, _exchange: &mut Exchange) -> Result<Outcome, InterceptorError> {
        Ok(Outcome::Continue)
    }

    /// Called during the response and abort passes.
    async fn handle_response(&self, _exchange: &mut Exchange) -> Result<Outcome, InterceptorError> {
        Ok(Outcome::Continue)
    }
}

/// Renders an interceptor tree as an indented outline, one node per line.
#[must_use]
pub fn describe_tree(interceptors: &[Arc<dyn Interceptor>]) -> String {
    fn walk(out: &mut String, list: &[Arc<dyn Interceptor>], depth: usize) {
        for interceptor in list {
            out.push_str(&"  ".repeat(depth));
            out.push_str(&interceptor.short_description());
            out.push('\n');
            walk(out, interceptor.children(), depth + 1);
        }
    }

    let mut out = String::new();
    walk(&mut out, interceptors, 0);
    out
}
