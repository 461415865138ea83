//! Error types for the ingestion pipeline.
//!
//! Only run-level failures surface as [`PipelineError`]. Per-document
//! failures are recorded in the state store and the run summary and never
//! abort a run.

use ingest_storage::StorageError;
use ingest_types::IngestError;
use thiserror::Error;

/// Errors that abort a run before or instead of processing documents
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Invalid or inconsistent configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Embedding provider or vector index unreachable during pre-flight
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    /// State store operation failed
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// A source or lookup referenced an unknown tenant
    #[error("Tenant not found: {0}")]
    TenantNotFound(String),
}

impl PipelineError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

impl From<IngestError> for PipelineError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::NotFound(what) => PipelineError::TenantNotFound(what),
            other => PipelineError::Config(other.to_string()),
        }
    }
}
