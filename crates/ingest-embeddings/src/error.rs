//! Embedding error types.

use thiserror::Error;

/// Errors that can occur during embedding operations.
///
/// Classified by [`EmbeddingError::is_transient`]: transient errors are
/// retried with backoff, everything else fails the batch immediately.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// The provider did not answer in time
    #[error("Embedding request timed out")]
    Timeout,

    /// The provider asked us to slow down
    #[error("Rate limit exceeded")]
    RateLimited,

    /// Transport failure or server-side error
    #[error("Transient provider error: {0}")]
    Transient(String),

    /// Credentials rejected
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Any other non-retryable provider error
    #[error("Provider error: {0}")]
    Fatal(String),

    /// Response could not be parsed or has the wrong shape
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Dimension mismatch
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Invalid provider configuration
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl EmbeddingError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EmbeddingError::Timeout | EmbeddingError::RateLimited | EmbeddingError::Transient(_)
        )
    }
}

impl From<serde_json::Error> for EmbeddingError {
    fn from(err: serde_json::Error) -> Self {
        EmbeddingError::InvalidResponse(err.to_string())
    }
}
