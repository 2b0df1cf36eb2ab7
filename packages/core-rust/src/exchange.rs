//! Per-request context for one request/response cycle.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::interceptor::Interceptor;
use crate::message::{HttpMessage, Request, Response};
use crate::outcome::Flow;
use crate::value::Value;

static NEXT_EXCHANGE_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle state of an exchange.
///
/// State machine: `Created -> RequestPass -> {BackendCall -> ResponsePass} |
/// ResponsePass | AbortPass -> Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    Created,
    RequestPass,
    BackendCall,
    ResponsePass,
    AbortPass,
    Completed,
}

impl ExchangeState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::RequestPass => "request_pass",
            Self::BackendCall => "backend_call",
            Self::ResponsePass => "response_pass",
            Self::AbortPass => "abort_pass",
            Self::Completed => "completed",
        }
    }
}

/// Mutable context for one request/response cycle.
///
/// Owned by a single task from accept until the response is sent. The deferred
/// lists are appended to during the request pass by container constructs and
/// the root pass, and drained in reverse (LIFO) order during the matching later
/// pass.
pub struct Exchange {
    id: u64,
    state: ExchangeState,
    request: Request,
    response: Option<Response>,
    properties: HashMap<String, Value>,
    destinations: Vec<String>,
    deferred_response: Vec<Arc<dyn Interceptor>>,
    deferred_abort: Vec<Arc<dyn Interceptor>>,
    taken_branches: HashSet<u64>,
    cancellation: CancellationToken,
}

impl Exchange {
    /// Creates an exchange in the `Created` state around the inbound request.
    #[must_use]
    pub fn new(request: Request) -> Self {
        Self {
            id: NEXT_EXCHANGE_ID.fetch_add(1, Ordering::Relaxed),
            state: ExchangeState::Created,
            request,
            response: None,
            properties: HashMap::new(),
            destinations: Vec::new(),
            deferred_response: Vec::new(),
            deferred_abort: Vec::new(),
            taken_branches: HashSet::new(),
            cancellation: CancellationToken::new(),
        }
    }

    /// Process-unique identifier, used for log correlation.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn state(&self) -> ExchangeState {
        self.state
    }

    /// Phase implied by the current state: `Abort` during the abort pass,
    /// `Response` once the request pass is over, `Request` before that.
    #[must_use]
    pub fn flow(&self) -> Flow {
        match self.state {
            ExchangeState::Created | ExchangeState::RequestPass => Flow::Request,
            ExchangeState::AbortPass => Flow::Abort,
            ExchangeState::BackendCall | ExchangeState::ResponsePass | ExchangeState::Completed => {
                Flow::Response
            }
        }
    }

    pub fn set_state(&mut self, state: ExchangeState) {
        tracing::trace!(exchange = self.id, from = self.state.as_str(), to = state.as_str(), "state change");
        self.state = state;
    }

    // -- messages -----------------------------------------------------------

    #[must_use]
    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut Request {
        &mut self.request
    }

    pub fn set_request(&mut self, request: Request) {
        self.request = request;
    }

    #[must_use]
    pub fn response(&self) -> Option<&Response> {
        self.response.as_ref()
    }

    pub fn response_mut(&mut self) -> Option<&mut Response> {
        self.response.as_mut()
    }

    pub fn set_response(&mut self, response: Response) {
        self.response = Some(response);
    }

    /// Removes and returns the response, leaving the exchange without one.
    pub fn take_response(&mut self) -> Option<Response> {
        self.response.take()
    }

    /// The message an interceptor operates on in the given phase: the request
    /// during the request pass, otherwise the response if one exists.
    #[must_use]
    pub fn message(&self, flow: Flow) -> &dyn HttpMessage {
        match (flow, &self.response) {
            (Flow::Response | Flow::Abort, Some(response)) => response as &dyn HttpMessage,
            _ => &self.request as &dyn HttpMessage,
        }
    }

    // -- properties ---------------------------------------------------------

    #[must_use]
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    /// Sets a property, returning the previous value.
    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.properties.insert(key.into(), value.into())
    }

    pub fn remove_property(&mut self, key: &str) -> Option<Value> {
        self.properties.remove(key)
    }

    #[must_use]
    pub fn properties(&self) -> &HashMap<String, Value> {
        &self.properties
    }

    // -- destinations -------------------------------------------------------

    /// Candidate backend URLs; the first entry is used for the backend call.
    #[must_use]
    pub fn destinations(&self) -> &[String] {
        &self.destinations
    }

    pub fn destinations_mut(&mut self) -> &mut Vec<String> {
        &mut self.destinations
    }

    pub fn set_destinations(&mut self, destinations: Vec<String>) {
        self.destinations = destinations;
    }

    // -- deferred interceptors ----------------------------------------------

    /// Registers an interceptor for the later response (or abort) pass.
    /// Never invokes it.
    pub fn push_deferred(&mut self, interceptor: Arc<dyn Interceptor>, for_abort: bool) {
        if for_abort {
            self.deferred_abort.push(interceptor);
        } else {
            self.deferred_response.push(interceptor);
        }
    }

    /// Returns and clears the matching deferred list, last-registered first.
    pub fn drain_deferred(&mut self, for_abort: bool) -> Vec<Arc<dyn Interceptor>> {
        let list = if for_abort {
            &mut self.deferred_abort
        } else {
            &mut self.deferred_response
        };
        let mut drained = std::mem::take(list);
        drained.reverse();
        drained
    }

    /// Number of interceptors currently registered for the given pass.
    #[must_use]
    pub fn deferred_len(&self, for_abort: bool) -> usize {
        if for_abort {
            self.deferred_abort.len()
        } else {
            self.deferred_response.len()
        }
    }

    /// Records that the container with this scope id ran a branch in the
    /// request pass and registered that branch's children itself.
    pub fn mark_branch_taken(&mut self, scope: u64) {
        self.taken_branches.insert(scope);
    }

    #[must_use]
    pub fn branch_taken(&self, scope: u64) -> bool {
        self.taken_branches.contains(&scope)
    }

    // -- cancellation -------------------------------------------------------

    /// Replaces the cancellation token, typically with a child of the
    /// transport's shutdown token.
    pub fn set_cancellation_token(&mut self, token: CancellationToken) {
        self.cancellation = token;
    }

    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Marks the exchange as cancelled (e.g. the client disconnected).
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

impl fmt::Debug for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exchange")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("method", &self.request.method)
            .field("uri", &self.request.uri)
            .field("has_response", &self.response.is_some())
            .field("destinations", &self.destinations)
            .field("deferred_response", &self.deferred_response.len())
            .field("deferred_abort", &self.deferred_abort.len())
            .finish_non_exhaustive()
    }
}
