//! Ordered invocation of interceptor lists across the request, response and
//! abort passes.
//!
//! The controller is a pure function of the exchange and the list it is
//! handed; the only configuration it carries is the production flag used when
//! it has to synthesize an error response.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use http::StatusCode;

use crate::exchange::{Exchange, ExchangeState};
use crate::interceptor::Interceptor;
use crate::outcome::{Flow, Outcome};
use crate::problem::ProblemDetails;

/// Marker for an invocation that returned `Err` or panicked. The error
/// response has already been set on the exchange.
struct InvocationFailed;

/// The default controller runs in production mode.
#[derive(Debug, Clone, Copy)]
pub struct FlowController {
    production: bool,
}

impl Default for FlowController {
    fn default() -> Self {
        Self { production: true }
    }
}

impl FlowController {
    #[must_use]
    pub fn new(production: bool) -> Self {
        Self { production }
    }

    /// Whether error responses hide internal detail.
    #[must_use]
    pub fn production(&self) -> bool {
        self.production
    }

    // -- transport entry points ---------------------------------------------

    /// Runs the root chain's request pass.
    ///
    /// Every root interceptor that completes with `Continue`, or that does not
    /// take part in the request phase at all, is registered on the deferred
    /// response and/or abort list according to its flows, so the later passes
    /// unwind the chain in reverse.
    pub async fn run_request_pass(
        &self,
        exchange: &mut Exchange,
        root: &[Arc<dyn Interceptor>],
    ) -> Outcome {
        exchange.set_state(ExchangeState::RequestPass);
        self.request_handlers(exchange, root, true).await
    }

    /// Runs the response pass (`for_abort == false`) or the abort pass.
    ///
    /// Returns `Abort` when the response pass has to be followed by an abort
    /// pass; the abort pass itself always returns `Continue`.
    pub async fn run_response_or_abort_pass(&self, exchange: &mut Exchange, for_abort: bool) -> Outcome {
        exchange.set_state(if for_abort {
            ExchangeState::AbortPass
        } else {
            ExchangeState::ResponsePass
        });
        self.invoke_response_or_abort_handlers(exchange, for_abort).await
    }

    // -- list invocation ----------------------------------------------------

    /// Invokes `handle_request` on each request-phase interceptor in order,
    /// stopping at the first result that is not `Continue`. Nothing is
    /// registered for the later passes.
    ///
    /// Errors and panics become `Abort` with an internal-error response, and a
    /// cancelled exchange aborts before the next invocation.
    pub async fn invoke_request_handlers(
        &self,
        exchange: &mut Exchange,
        interceptors: &[Arc<dyn Interceptor>],
    ) -> Outcome {
        self.request_handlers(exchange, interceptors, false).await
    }

    /// Like [`invoke_request_handlers`](Self::invoke_request_handlers), but
    /// registers each interceptor for the response and abort passes at its
    /// position, exactly as the root pass does. Conditional containers use it
    /// so a nested branch unwinds in reverse of the order it ran in.
    pub async fn invoke_request_handlers_registering(
        &self,
        exchange: &mut Exchange,
        interceptors: &[Arc<dyn Interceptor>],
    ) -> Outcome {
        self.request_handlers(exchange, interceptors, true).await
    }

    async fn request_handlers(
        &self,
        exchange: &mut Exchange,
        interceptors: &[Arc<dyn Interceptor>],
        register: bool,
    ) -> Outcome {
        for interceptor in interceptors {
            let flows = interceptor.flows();
            if flows.handles_requests() {
                if exchange.is_cancelled() {
                    self.cancelled(exchange, interceptor.name(), Flow::Request);
                    return Outcome::Abort;
                }
                let outcome = self
                    .try_invoke(exchange, interceptor.as_ref(), Flow::Request)
                    .await
                    .unwrap_or(Outcome::Abort);
                if !outcome.is_continue() {
                    tracing::debug!(
                        exchange = exchange.id(),
                        interceptor = interceptor.name(),
                        %outcome,
                        "request handlers stopped"
                    );
                    return outcome;
                }
            }
            if !register {
                continue;
            }
            if flows.handles_responses() {
                exchange.push_deferred(Arc::clone(interceptor), false);
            }
            if flows.handles_aborts() {
                exchange.push_deferred(Arc::clone(interceptor), true);
            }
        }
        Outcome::Continue
    }

    /// Invokes `handle_response` on the interceptors taking part in the
    /// exchange's current phase, last to first, stopping at the first result
    /// that is not `Continue`. Used by containers that run their children
    /// directly in the response and abort passes.
    pub async fn invoke_response_handlers(
        &self,
        exchange: &mut Exchange,
        interceptors: &[Arc<dyn Interceptor>],
    ) -> Outcome {
        let flow = exchange.flow();
        for interceptor in interceptors.iter().rev() {
            if !interceptor.flows().contains(flow) {
                continue;
            }
            if flow != Flow::Abort && exchange.is_cancelled() {
                self.cancelled(exchange, interceptor.name(), flow);
                return Outcome::Abort;
            }
            let outcome = self
                .try_invoke(exchange, interceptor.as_ref(), flow)
                .await
                .unwrap_or(Outcome::Abort);
            if !outcome.is_continue() {
                return outcome;
            }
        }
        Outcome::Continue
    }

    /// Drains the matching deferred list and invokes `handle_response` on each
    /// entry, last-registered first.
    ///
    /// A failing entry is logged and draining continues. In the response pass
    /// an `Abort` result stops draining, and both cases make the pass report
    /// `Abort`. The abort pass invokes every entry and ignores outcomes.
    pub async fn invoke_response_or_abort_handlers(&self, exchange: &mut Exchange, for_abort: bool) -> Outcome {
        let flow = if for_abort { Flow::Abort } else { Flow::Response };
        let deferred = exchange.drain_deferred(for_abort);
        tracing::debug!(exchange = exchange.id(), %flow, count = deferred.len(), "draining deferred interceptors");

        let mut result = Outcome::Continue;
        for interceptor in &deferred {
            if !for_abort && exchange.is_cancelled() {
                self.cancelled(exchange, interceptor.name(), flow);
                return Outcome::Abort;
            }
            match self.try_invoke(exchange, interceptor.as_ref(), flow).await {
                Ok(_) if for_abort => {}
                Ok(Outcome::Continue) => {}
                Ok(Outcome::Return) => break,
                Ok(Outcome::Abort) => return Outcome::Abort,
                Err(InvocationFailed) => {
                    if !for_abort {
                        result = Outcome::Abort;
                    }
                }
            }
        }
        result
    }

    // -- single invocation --------------------------------------------------

    async fn try_invoke(
        &self,
        exchange: &mut Exchange,
        interceptor: &dyn Interceptor,
        flow: Flow,
    ) -> Result<Outcome, InvocationFailed> {
        let name = interceptor.name();
        let future = match flow {
            Flow::Request => interceptor.handle_request(exchange),
            Flow::Response | Flow::Abort => interceptor.handle_response(exchange),
        };

        match AssertUnwindSafe(future).catch_unwind().await {
            Ok(Ok(outcome)) => {
                tracing::debug!(exchange = exchange.id(), interceptor = name, %flow, %outcome, "interceptor returned");
                Ok(outcome)
            }
            Ok(Err(error)) => {
                tracing::warn!(exchange = exchange.id(), interceptor = name, %flow, %error, "interceptor failed");
                ProblemDetails::internal(self.production, name)
                    .flow(flow)
                    .detail(format!("Interceptor '{name}' failed."))
                    .error(&error)
                    .build_and_set_response(exchange);
                Err(InvocationFailed)
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(exchange = exchange.id(), interceptor = name, %flow, %message, "interceptor panicked");
                ProblemDetails::internal(self.production, name)
                    .flow(flow)
                    .detail(format!("Interceptor '{name}' panicked."))
                    .internal_field("message", message)
                    .build_and_set_response(exchange);
                Err(InvocationFailed)
            }
        }
    }

    fn cancelled(&self, exchange: &mut Exchange, name: &str, flow: Flow) {
        tracing::info!(exchange = exchange.id(), interceptor = name, %flow, "exchange cancelled, aborting pass");
        ProblemDetails::internal(self.production, name)
            .add_subtype("cancelled")
            .status(StatusCode::SERVICE_UNAVAILABLE)
            .title("Exchange cancelled.")
            .flow(flow)
            .build_and_set_response(exchange);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}
