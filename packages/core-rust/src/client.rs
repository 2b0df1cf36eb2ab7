//! HTTP client contract used by the `call` construct and by the backend
//! dispatch step between the request and response passes.

use async_trait::async_trait;

use crate::exchange::Exchange;
use crate::message::Response;

/// Dispatches an exchange's request to its first destination.
///
/// Implementations enforce their own timeouts; a timeout is reported as
/// [`ClientError::Timeout`] and handled like any other transport failure.
/// A non-2xx status is a successful call.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends `exchange.request()` to `exchange.destinations()[0]`.
    ///
    /// # Errors
    ///
    /// Returns a [`ClientError`] when no response could be obtained.
    async fn call(&self, exchange: &mut Exchange) -> Result<Response, ClientError>;
}

/// Transport-level failure of a backend call.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("exchange has no destination")]
    NoDestination,
    #[error("invalid destination url: {url}")]
    InvalidDestination { url: String },
    #[error("could not connect to {url}: {reason}")]
    Connect { url: String, reason: String },
    #[error("backend call to {url} timed out after {timeout_ms}ms")]
    Timeout { url: String, timeout_ms: u64 },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
