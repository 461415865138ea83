//! Error types for fragmentation.

use thiserror::Error;

/// Errors that can occur during fragmentation.
#[derive(Debug, Error)]
pub enum FragmentError {
    /// A variant could not fragment the document
    #[error("Fragmentation failed in {fragmenter}: {reason}")]
    Failed { fragmenter: String, reason: String },

    /// Invalid fragment options
    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    /// An enricher rejected the fragments
    #[error("Enrichment failed in {enricher}: {reason}")]
    Enrichment { enricher: String, reason: String },
}

impl FragmentError {
    pub fn failed(fragmenter: &str, reason: impl Into<String>) -> Self {
        Self::Failed {
            fragmenter: fragmenter.to_string(),
            reason: reason.into(),
        }
    }
}
