/// Errors returned by the exchange pipeline itself.
///
/// Failures inside the interceptor chain never surface here: they are turned
/// into problem responses on the exchange. These variants cover the cases
/// where the pipeline refused or could not run the exchange at all.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway overloaded, try again later")]
    Overloaded,
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}
