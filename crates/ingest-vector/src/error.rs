//! Vector index error types.

use thiserror::Error;

/// Errors that can occur during vector index operations.
#[derive(Debug, Error)]
pub enum VectorError {
    /// Generic index failure
    #[error("Index error: {0}")]
    Index(String),

    /// The named index does not exist
    #[error("Index not found: {0}")]
    IndexNotFound(String),

    /// Dimension mismatch
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Index temporarily unreachable or overloaded
    #[error("Index unavailable: {0}")]
    Unavailable(String),

    /// Operation timed out
    #[error("Index operation timed out")]
    Timeout,

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// RocksDB error
    #[error("Database error: {0}")]
    Database(#[from] rocksdb::Error),
}

impl VectorError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, VectorError::Unavailable(_) | VectorError::Timeout)
    }
}

impl From<serde_json::Error> for VectorError {
    fn from(err: serde_json::Error) -> Self {
        VectorError::Serialization(err.to_string())
    }
}
