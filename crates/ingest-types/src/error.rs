//! Error types for the ingestion engine.

use thiserror::Error;

/// Unified error type for domain and configuration operations.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Not found error
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input error
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl IngestError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Whether this error must abort a run before any processing starts.
    pub fn is_fatal(&self) -> bool {
        matches!(self, IngestError::Config(_))
    }
}
