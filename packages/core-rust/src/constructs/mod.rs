//! Built-in structural interceptors.
//!
//! Containers (`request`, `response`, `abort`, `if`, `for`, `choose`) run or
//! defer their children through the [`FlowController`]; leaves (`call`,
//! `return`, `destination`) act on the exchange directly.

mod blocks;
mod call;
mod choice;
mod conditional;
mod destination;
mod early_return;
mod for_each;

pub use blocks::{AbortBlock, RequestBlock, ResponseBlock};
pub use call::{filter_request_headers, filter_response_headers, is_hop_by_hop, Call};
pub use choice::{Case, Choice};
pub use conditional::If;
pub use destination::Destination;
pub use early_return::Return;
pub use for_each::{For, LOOP_PROPERTY};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::exchange::Exchange;
use crate::flow_controller::FlowController;
use crate::interceptor::Interceptor;
use crate::lang::ExpressionError;
use crate::outcome::{Flow, Outcome};
use crate::problem::ProblemDetails;

static NEXT_SCOPE: AtomicU64 = AtomicU64::new(1);

/// Allocates the id a conditional container marks on the exchange when it
/// takes a branch in the request pass.
fn next_scope() -> u64 {
    NEXT_SCOPE.fetch_add(1, Ordering::Relaxed)
}

/// Runs the branch a conditional container selected for `flow`.
///
/// In the request pass the branch's children are registered at their
/// positions for the later passes and the container's scope is marked, so
/// the container stays out of those passes. Otherwise the children run
/// directly in reverse.
async fn run_branch(
    controller: &FlowController,
    exchange: &mut Exchange,
    scope: u64,
    children: &[Arc<dyn Interceptor>],
    flow: Flow,
) -> Outcome {
    match flow {
        Flow::Request => {
            exchange.mark_branch_taken(scope);
            controller
                .invoke_request_handlers_registering(exchange, children)
                .await
        }
        Flow::Response | Flow::Abort => controller.invoke_response_handlers(exchange, children).await,
    }
}

/// Sets an internal-error problem for a failed expression and returns `Abort`.
fn expression_failed(
    controller: &FlowController,
    exchange: &mut Exchange,
    component: &str,
    source: &str,
    flow: Flow,
    error: &ExpressionError,
) -> Outcome {
    tracing::warn!(
        exchange = exchange.id(),
        component,
        expression = source,
        %flow,
        %error,
        "expression evaluation failed"
    );
    ProblemDetails::internal(controller.production(), component)
        .add_subtype("expression-evaluation")
        .title("Error evaluating expression.")
        .flow(flow)
        .detail(format!("Evaluating `{source}` failed."))
        .internal_field("expression", source)
        .error(error)
        .build_and_set_response(exchange);
    Outcome::Abort
}
