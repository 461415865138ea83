//! Persisted per-document processing state.
//!
//! One record exists per (tenant, source type, source name, document id).
//! Records are created on first sighting and never silently deleted; a
//! document that disappears from its source is tombstoned instead.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Processing status of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    /// Seen but not yet attempted
    Pending,
    /// An attempt is in progress (or a previous run died mid-attempt)
    Processing,
    /// Last attempt succeeded; fingerprint is current
    Indexed,
    /// Last attempt failed; retried next run
    Failed,
    /// Removed from its source and purged from the index
    Tombstoned,
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocumentStatus::Pending => write!(f, "pending"),
            DocumentStatus::Processing => write!(f, "processing"),
            DocumentStatus::Indexed => write!(f, "indexed"),
            DocumentStatus::Failed => write!(f, "failed"),
            DocumentStatus::Tombstoned => write!(f, "tombstoned"),
        }
    }
}

/// Persisted record of a document's processing outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentState {
    /// Fingerprint of the last successfully processed content
    pub content_fingerprint: Option<String>,

    pub status: DocumentStatus,

    #[serde(with = "chrono::serde::ts_milliseconds_option", default)]
    pub last_attempt_time: Option<DateTime<Utc>>,

    #[serde(with = "chrono::serde::ts_milliseconds_option", default)]
    pub last_success_time: Option<DateTime<Utc>>,

    pub failure_reason: Option<String>,

    pub attempt_count: u32,

    /// Point ids that may currently be present in the index for this document
    #[serde(default)]
    pub fragment_ids: Vec<String>,

    /// When the document was first seen (milliseconds since epoch)
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub first_seen: DateTime<Utc>,
}

impl DocumentState {
    /// A freshly sighted document.
    pub fn new() -> Self {
        Self {
            content_fingerprint: None,
            status: DocumentStatus::Pending,
            last_attempt_time: None,
            last_success_time: None,
            failure_reason: None,
            attempt_count: 0,
            fragment_ids: Vec::new(),
            first_seen: Utc::now(),
        }
    }

    /// Reprocess iff the fingerprint differs or the last outcome was not `indexed`.
    pub fn needs_processing(&self, fingerprint: &str) -> bool {
        self.status != DocumentStatus::Indexed
            || self.content_fingerprint.as_deref() != Some(fingerprint)
    }

    /// Serialize to JSON bytes for storage
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

impl Default for DocumentState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_state_needs_processing() {
        let state = DocumentState::new();
        assert_eq!(state.status, DocumentStatus::Pending);
        assert!(state.needs_processing("abc"));
    }

    #[test]
    fn test_indexed_state_skips_same_fingerprint() {
        let mut state = DocumentState::new();
        state.status = DocumentStatus::Indexed;
        state.content_fingerprint = Some("abc".to_string());

        assert!(!state.needs_processing("abc"));
        assert!(state.needs_processing("def"));
    }

    #[test]
    fn test_failed_state_is_retried() {
        let mut state = DocumentState::new();
        state.status = DocumentStatus::Failed;
        state.content_fingerprint = Some("abc".to_string());
        assert!(state.needs_processing("abc"));

        state.status = DocumentStatus::Processing;
        assert!(state.needs_processing("abc"));
    }

    #[test]
    fn test_state_json_format() {
        let mut state = DocumentState::new();
        state.status = DocumentStatus::Indexed;
        state.fragment_ids = vec!["t1/fs/docs/A#0".to_string()];
        state.last_success_time = Some(Utc::now());

        let json = String::from_utf8(state.to_bytes().unwrap()).unwrap();
        assert!(json.contains("\"status\":\"indexed\""));
        assert!(json.contains("\"fragment_ids\":[\"t1/fs/docs/A#0\"]"));

        let decoded = DocumentState::from_bytes(json.as_bytes()).unwrap();
        assert_eq!(decoded.status, DocumentStatus::Indexed);
        assert_eq!(decoded.fragment_ids, state.fragment_ids);
        assert_eq!(
            decoded.last_success_time.map(|t| t.timestamp_millis()),
            state.last_success_time.map(|t| t.timestamp_millis())
        );
    }

    #[test]
    fn test_status_display() {
        assert_eq!(DocumentStatus::Tombstoned.to_string(), "tombstoned");
        assert_eq!(DocumentStatus::Processing.to_string(), "processing");
    }
}
