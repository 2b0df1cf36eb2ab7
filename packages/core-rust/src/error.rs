//! Error raised by an interceptor invocation.
//!
//! Any `Err` returned from `handle_request`/`handle_response` is caught at the
//! flow-controller boundary and converted into an `ABORT` with an
//! internal-error problem response.

use crate::client::ClientError;
use crate::lang::ExpressionError;

#[derive(Debug, thiserror::Error)]
pub enum InterceptorError {
    #[error("expression failed: {0}")]
    Expression(#[from] ExpressionError),
    #[error("backend call failed: {0}")]
    Client(#[from] ClientError),
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}
