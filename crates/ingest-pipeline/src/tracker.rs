//! Per-run document tracking.
//!
//! Every document seen in a run moves through a small state machine:
//!
//! ```text
//! Pending -> Skipped
//! Pending -> Fragmenting -> Vectorizing -> Publishing -> Indexed
//! Fragmenting -> Publishing              (no fragments)
//! any non-terminal phase -> Failed
//! ```
//!
//! `Skipped`, `Indexed` and `Failed` are terminal. Illegal transitions are
//! logged and ignored. Terminal outcomes are persisted through the
//! change-detection store and counted for the run summary.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use ingest_storage::ChangeDetectionStore;
use ingest_types::{DocumentKey, FailedDocument, IngestionRun};
use tracing::{debug, error, warn};

/// Processing phase of one document within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentPhase {
    Pending,
    Skipped,
    Fragmenting,
    Vectorizing,
    Publishing,
    Indexed,
    Failed,
}

impl DocumentPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DocumentPhase::Skipped | DocumentPhase::Indexed | DocumentPhase::Failed
        )
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_advance_to(self, next: DocumentPhase) -> bool {
        use DocumentPhase::*;
        matches!(
            (self, next),
            (Pending, Skipped)
                | (Pending, Fragmenting)
                | (Fragmenting, Vectorizing)
                | (Fragmenting, Publishing)
                | (Vectorizing, Publishing)
                | (Publishing, Indexed)
        ) || (next == Failed && !self.is_terminal())
    }
}

impl fmt::Display for DocumentPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DocumentPhase::Pending => "pending",
            DocumentPhase::Skipped => "skipped",
            DocumentPhase::Fragmenting => "fragmenting",
            DocumentPhase::Vectorizing => "vectorizing",
            DocumentPhase::Publishing => "publishing",
            DocumentPhase::Indexed => "indexed",
            DocumentPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
struct TrackedDocument {
    phase: DocumentPhase,
    /// This run holds the store claim for the document
    claimed: bool,
    /// Point ids that may have reached the index during this attempt
    residue: Vec<String>,
}

/// Reason recorded for documents cut off by cancellation.
pub const CANCELLED: &str = "cancelled";

/// Tracks every document of one run and records terminal outcomes.
pub struct RunTracker {
    store: Arc<ChangeDetectionStore>,
    documents: DashMap<DocumentKey, TrackedDocument>,
    failures: Mutex<Vec<FailedDocument>>,
    seen: AtomicU64,
    skipped: AtomicU64,
    indexed: AtomicU64,
    failed: AtomicU64,
    removed: AtomicU64,
}

impl RunTracker {
    pub fn new(store: Arc<ChangeDetectionStore>) -> Self {
        Self {
            store,
            documents: DashMap::new(),
            failures: Mutex::new(Vec::new()),
            seen: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            indexed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            removed: AtomicU64::new(0),
        }
    }

    /// Start tracking a document. Returns false if it was already seen in
    /// this run.
    pub fn observe(&self, key: &DocumentKey) -> bool {
        match self.documents.entry(key.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(TrackedDocument {
                    phase: DocumentPhase::Pending,
                    claimed: false,
                    residue: Vec::new(),
                });
                self.seen.fetch_add(1, Ordering::Relaxed);
                true
            }
        }
    }

    /// Record that this run holds the store claim for `key`.
    pub fn mark_claimed(&self, key: &DocumentKey) {
        if let Some(mut doc) = self.documents.get_mut(key) {
            doc.claimed = true;
        }
    }

    /// Move a document to `next`. Illegal transitions are logged and ignored.
    pub fn advance(&self, key: &DocumentKey, next: DocumentPhase) -> bool {
        let Some(mut doc) = self.documents.get_mut(key) else {
            warn!(key = %key, to = %next, "Transition for untracked document ignored");
            return false;
        };
        if !doc.phase.can_advance_to(next) {
            warn!(key = %key, from = %doc.phase, to = %next, "Illegal transition ignored");
            return false;
        }
        debug!(key = %key, from = %doc.phase, to = %next, "Document transition");
        doc.phase = next;
        true
    }

    /// Unchanged document: nothing to do this run.
    pub fn skip(&self, key: &DocumentKey) {
        if self.advance(key, DocumentPhase::Skipped) {
            self.skipped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Remember point ids about to be written for `key`.
    pub fn set_residue(&self, key: &DocumentKey, ids: &[String]) {
        if let Some(mut doc) = self.documents.get_mut(key) {
            doc.residue = ids.to_vec();
        }
    }

    /// Fail a document. Only the first failure of a document counts.
    pub fn fail(&self, key: &DocumentKey, reason: &str) {
        self.fail_with_residue(key, reason, &[]);
    }

    /// Fail a document that may have written `residue` to the index.
    pub fn fail_with_residue(&self, key: &DocumentKey, reason: &str, residue: &[String]) {
        let (claimed, mut ids) = {
            let Some(mut doc) = self.documents.get_mut(key) else {
                warn!(key = %key, "Failure for untracked document ignored");
                return;
            };
            if !doc.phase.can_advance_to(DocumentPhase::Failed) {
                debug!(key = %key, phase = %doc.phase, "Document already finished, failure ignored");
                return;
            }
            doc.phase = DocumentPhase::Failed;
            let claimed = std::mem::replace(&mut doc.claimed, false);
            (claimed, std::mem::take(&mut doc.residue))
        };

        for id in residue {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }

        self.failed.fetch_add(1, Ordering::Relaxed);
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(FailedDocument {
                key: key.clone(),
                reason: reason.to_string(),
            });
        warn!(key = %key, reason = reason, "Document failed");

        if claimed {
            if let Err(e) = self.store.complete_failure_with_residue(key, reason, &ids) {
                error!(key = %key, error = %e, "Failed to record document failure");
            }
        }
    }

    /// Record a successful publication.
    ///
    /// If the store write fails the document is failed instead; its stored
    /// status stays non-indexed so the next run retries it.
    pub fn succeed(&self, key: &DocumentKey, fingerprint: &str, point_ids: Vec<String>) {
        match self.documents.get(key) {
            Some(doc) if doc.phase == DocumentPhase::Publishing => {}
            Some(doc) => {
                warn!(key = %key, phase = %doc.phase, "Success outside publishing ignored");
                return;
            }
            None => return,
        }

        match self.store.complete_success(key, fingerprint, point_ids) {
            Ok(()) => {
                if let Some(mut doc) = self.documents.get_mut(key) {
                    doc.claimed = false;
                    doc.residue.clear();
                }
                if self.advance(key, DocumentPhase::Indexed) {
                    self.indexed.fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(e) => {
                // complete_success released the claim either way
                if let Some(mut doc) = self.documents.get_mut(key) {
                    doc.claimed = false;
                }
                self.fail(key, &format!("state store: {}", e));
            }
        }
    }

    pub fn record_removed(&self) {
        self.removed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn phase(&self, key: &DocumentKey) -> Option<DocumentPhase> {
        self.documents.get(key).map(|d| d.phase)
    }

    pub fn is_failed(&self, key: &DocumentKey) -> bool {
        self.phase(key) == Some(DocumentPhase::Failed)
    }

    /// Documents that have not reached a terminal phase.
    pub fn unfinished(&self) -> Vec<DocumentKey> {
        let mut keys: Vec<DocumentKey> = self
            .documents
            .iter()
            .filter(|entry| !entry.value().phase.is_terminal())
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        keys
    }

    /// Copy counters and failures into the run summary.
    pub fn apply_to(&self, run: &mut IngestionRun) {
        run.documents_seen = self.seen.load(Ordering::Relaxed);
        run.documents_skipped = self.skipped.load(Ordering::Relaxed);
        run.documents_indexed = self.indexed.load(Ordering::Relaxed);
        run.documents_failed = self.failed.load(Ordering::Relaxed);
        run.documents_removed = self.removed.load(Ordering::Relaxed);

        let mut failures = self
            .failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        failures.sort_by(|a, b| a.key.cmp(&b.key));
        run.failures = failures;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingest_storage::Storage;
    use ingest_types::DocumentStatus;
    use tempfile::TempDir;

    fn create_tracker() -> (RunTracker, Arc<ChangeDetectionStore>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::open(temp_dir.path()).unwrap());
        let store = Arc::new(ChangeDetectionStore::new(storage));
        (RunTracker::new(store.clone()), store, temp_dir)
    }

    fn key(id: &str) -> DocumentKey {
        DocumentKey::new("t1", "fs", "docs", id)
    }

    #[test]
    fn test_transition_table() {
        use DocumentPhase::*;
        assert!(Pending.can_advance_to(Skipped));
        assert!(Pending.can_advance_to(Fragmenting));
        assert!(Fragmenting.can_advance_to(Publishing));
        assert!(Vectorizing.can_advance_to(Failed));
        assert!(!Pending.can_advance_to(Indexed));
        assert!(!Skipped.can_advance_to(Fragmenting));
        assert!(!Indexed.can_advance_to(Failed));
        assert!(!Failed.can_advance_to(Failed));
    }

    #[test]
    fn test_observe_once() {
        let (tracker, _store, _temp) = create_tracker();
        assert!(tracker.observe(&key("A")));
        assert!(!tracker.observe(&key("A")));

        let mut run = IngestionRun::new(vec![]);
        tracker.apply_to(&mut run);
        assert_eq!(run.documents_seen, 1);
    }

    #[test]
    fn test_illegal_transition_is_ignored() {
        let (tracker, _store, _temp) = create_tracker();
        let k = key("A");
        tracker.observe(&k);
        assert!(!tracker.advance(&k, DocumentPhase::Indexed));
        assert_eq!(tracker.phase(&k), Some(DocumentPhase::Pending));
    }

    #[test]
    fn test_full_success_path() {
        let (tracker, store, _temp) = create_tracker();
        let k = key("A");
        tracker.observe(&k);
        store.begin_attempt(&k).unwrap();
        tracker.mark_claimed(&k);
        assert!(tracker.advance(&k, DocumentPhase::Fragmenting));
        assert!(tracker.advance(&k, DocumentPhase::Vectorizing));
        assert!(tracker.advance(&k, DocumentPhase::Publishing));
        tracker.succeed(&k, "fp", vec!["p0".to_string()]);

        assert_eq!(tracker.phase(&k), Some(DocumentPhase::Indexed));
        let state = store.get(&k).unwrap().unwrap();
        assert_eq!(state.status, DocumentStatus::Indexed);
        assert!(!store.is_in_flight(&k));

        let mut run = IngestionRun::new(vec![]);
        tracker.apply_to(&mut run);
        assert_eq!(run.documents_indexed, 1);
    }

    #[test]
    fn test_fail_persists_once_with_residue() {
        let (tracker, store, _temp) = create_tracker();
        let k = key("A");
        tracker.observe(&k);
        store.begin_attempt(&k).unwrap();
        tracker.mark_claimed(&k);
        tracker.advance(&k, DocumentPhase::Fragmenting);
        tracker.set_residue(&k, &["p0".to_string()]);

        tracker.fail_with_residue(&k, "upsert failed", &["p1".to_string()]);
        tracker.fail(&k, "second failure");

        let state = store.get(&k).unwrap().unwrap();
        assert_eq!(state.status, DocumentStatus::Failed);
        assert_eq!(state.failure_reason.as_deref(), Some("upsert failed"));
        assert_eq!(state.fragment_ids, vec!["p0".to_string(), "p1".to_string()]);

        let mut run = IngestionRun::new(vec![]);
        tracker.apply_to(&mut run);
        assert_eq!(run.documents_failed, 1);
        assert_eq!(run.failures.len(), 1);
        assert_eq!(run.failures[0].reason, "upsert failed");
    }

    #[test]
    fn test_unclaimed_failure_does_not_touch_store() {
        let (tracker, store, _temp) = create_tracker();
        let k = key("A");
        tracker.observe(&k);
        tracker.fail(&k, "source: unreadable");
        assert!(store.get(&k).unwrap().is_none());
        assert!(tracker.is_failed(&k));
    }

    #[test]
    fn test_unfinished() {
        let (tracker, _store, _temp) = create_tracker();
        for id in ["A", "B", "C"] {
            tracker.observe(&key(id));
        }
        tracker.skip(&key("A"));
        tracker.advance(&key("C"), DocumentPhase::Fragmenting);
        assert_eq!(tracker.unfinished(), vec![key("B"), key("C")]);
    }
}
