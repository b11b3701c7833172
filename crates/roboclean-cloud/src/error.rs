//! Error type for cloud REST operations.

use thiserror::Error;

/// Result type for cloud operations.
pub type CloudResult<T> = Result<T, CloudError>;

/// Error type for cloud REST operations.
#[derive(Debug, Error)]
pub enum CloudError {
    /// The backend rejected the supplied credentials. Fatal: retrying
    /// with the same credentials cannot succeed.
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    /// Network-level failure or timeout. Retryable with backoff.
    #[error("transient connection failure: {0}")]
    Transient(String),

    /// The backend answered but refused the request.
    #[error("backend error: {0}")]
    Api(String),

    /// The backend answered with a body we could not interpret.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// An operation required a session that is not established.
    #[error("not authenticated")]
    NotAuthenticated,
}

impl CloudError {
    /// Whether a retry with backoff is worthwhile.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<reqwest::Error> for CloudError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::MalformedResponse(err.to_string())
        } else {
            // Timeouts, connection failures and request build errors are
            // all worth retrying from the caller's perspective.
            Self::Transient(err.to_string())
        }
    }
}
