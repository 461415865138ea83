//! Ingestion run summary.
//!
//! An [`IngestionRun`] is created when orchestration starts and closed at
//! shutdown. Once closed it is immutable and appended to the run ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::document::DocumentKey;

/// Outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    /// Every seen document was skipped, indexed or removed
    Success,
    /// The run completed but some documents failed or it was cancelled
    PartialSuccess,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Success => write!(f, "success"),
            RunStatus::PartialSuccess => write!(f, "partial_success"),
        }
    }
}

/// A document that failed during the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedDocument {
    pub key: DocumentKey,
    pub reason: String,
}

/// One execution of the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionRun {
    pub run_id: String,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub started_at: DateTime<Utc>,

    #[serde(with = "chrono::serde::ts_milliseconds_option", default)]
    pub ended_at: Option<DateTime<Utc>>,

    /// Tenants covered by this run
    pub tenants: Vec<String>,

    pub documents_seen: u64,
    pub documents_skipped: u64,
    pub documents_indexed: u64,
    pub documents_failed: u64,
    /// Documents tombstoned because they disappeared from their source
    #[serde(default)]
    pub documents_removed: u64,

    /// Whether the run was cut short by cancellation or its deadline
    #[serde(default)]
    pub cancelled: bool,

    pub status: RunStatus,

    #[serde(default)]
    pub failures: Vec<FailedDocument>,
}

impl IngestionRun {
    /// Start a new run.
    pub fn new(tenants: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            run_id: Ulid::from_datetime(now.into()).to_string(),
            started_at: now,
            ended_at: None,
            tenants,
            documents_seen: 0,
            documents_skipped: 0,
            documents_indexed: 0,
            documents_failed: 0,
            documents_removed: 0,
            cancelled: false,
            status: RunStatus::Running,
            failures: Vec::new(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.ended_at.is_some()
    }

    /// Finalize the run. Closing an already closed run has no effect.
    pub fn close(&mut self) {
        if self.is_closed() {
            return;
        }
        self.ended_at = Some(Utc::now());
        self.status = if self.documents_failed == 0 && !self.cancelled {
            RunStatus::Success
        } else {
            RunStatus::PartialSuccess
        };
    }

    /// Run duration in milliseconds, once closed.
    pub fn duration_ms(&self) -> Option<i64> {
        self.ended_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }

    /// One-line human readable summary.
    pub fn summary_line(&self) -> String {
        format!(
            "run {} {}: seen={} skipped={} indexed={} failed={} removed={}",
            self.run_id,
            self.status,
            self.documents_seen,
            self.documents_skipped,
            self.documents_indexed,
            self.documents_failed,
            self.documents_removed
        )
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_run_is_running() {
        let run = IngestionRun::new(vec!["t1".to_string()]);
        assert_eq!(run.status, RunStatus::Running);
        assert!(!run.is_closed());
        assert_eq!(run.run_id.len(), 26);
    }

    #[test]
    fn test_close_success() {
        let mut run = IngestionRun::new(vec![]);
        run.documents_seen = 2;
        run.documents_indexed = 2;
        run.close();
        assert_eq!(run.status, RunStatus::Success);
        assert!(run.duration_ms().is_some());
    }

    #[test]
    fn test_close_with_failures_is_partial() {
        let mut run = IngestionRun::new(vec![]);
        run.documents_seen = 2;
        run.documents_failed = 2;
        run.close();
        assert_eq!(run.status, RunStatus::PartialSuccess);
    }

    #[test]
    fn test_close_cancelled_is_partial() {
        let mut run = IngestionRun::new(vec![]);
        run.cancelled = true;
        run.close();
        assert_eq!(run.status, RunStatus::PartialSuccess);
    }

    #[test]
    fn test_closed_run_is_immutable() {
        let mut run = IngestionRun::new(vec![]);
        run.close();
        let ended = run.ended_at;
        run.documents_failed = 3;
        run.close();
        assert_eq!(run.ended_at, ended);
        assert_eq!(run.status, RunStatus::Success);
    }

    #[test]
    fn test_summary_line() {
        let mut run = IngestionRun::new(vec!["t1".to_string()]);
        run.documents_seen = 2;
        run.documents_skipped = 2;
        run.close();
        let line = run.summary_line();
        assert!(line.contains("success"));
        assert!(line.contains("seen=2 skipped=2 indexed=0 failed=0"));
    }

    #[test]
    fn test_run_serialization_roundtrip() {
        let mut run = IngestionRun::new(vec!["t1".to_string()]);
        run.failures.push(FailedDocument {
            key: DocumentKey::new("t1", "fs", "docs", "A"),
            reason: "embedding failed".to_string(),
        });
        run.documents_failed = 1;
        run.close();

        let decoded = IngestionRun::from_bytes(&run.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.run_id, run.run_id);
        assert_eq!(decoded.failures, run.failures);
        assert_eq!(decoded.status, RunStatus::PartialSuccess);
    }
}
