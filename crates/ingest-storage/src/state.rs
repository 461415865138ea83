//! Change-detection store.
//!
//! Decides whether a document must be (re)processed and records the outcome
//! of every attempt. Concurrency model:
//! - Read-modify-write of one key happens under that key's lock stripe; keys
//!   in different stripes never contend and there is no store-wide lock.
//! - `begin_attempt` claims the key until `complete_*` releases it, so one
//!   document is never attempted twice concurrently.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use dashmap::DashSet;
use ingest_types::{DocumentKey, DocumentState, DocumentStatus, SourceScope};
use serde::Serialize;
use tracing::{debug, warn};

use crate::db::Storage;
use crate::error::StorageError;
use crate::keys::StateKey;

const LOCK_STRIPES: usize = 64;

/// Number of documents per status for one tenant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: u64,
    pub processing: u64,
    pub indexed: u64,
    pub failed: u64,
    pub tombstoned: u64,
}

impl StatusCounts {
    fn record(&mut self, status: DocumentStatus) {
        match status {
            DocumentStatus::Pending => self.pending += 1,
            DocumentStatus::Processing => self.processing += 1,
            DocumentStatus::Indexed => self.indexed += 1,
            DocumentStatus::Failed => self.failed += 1,
            DocumentStatus::Tombstoned => self.tombstoned += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.pending + self.processing + self.indexed + self.failed + self.tombstoned
    }
}

/// Persistent per-document state tracking on top of [`Storage`].
pub struct ChangeDetectionStore {
    storage: Arc<Storage>,
    stripes: Vec<Mutex<()>>,
    in_flight: DashSet<DocumentKey>,
}

impl ChangeDetectionStore {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            storage,
            stripes: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
            in_flight: DashSet::new(),
        }
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    fn lock(&self, key: &DocumentKey) -> MutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let stripe = (hasher.finish() as usize) % self.stripes.len();
        // The guarded value is (); a poisoned stripe carries no broken state.
        self.stripes[stripe]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Read-modify-write one row under its stripe lock.
    fn update<F>(&self, key: &DocumentKey, f: F) -> Result<DocumentState, StorageError>
    where
        F: FnOnce(&mut DocumentState),
    {
        let _guard = self.lock(key);
        let mut state = self.storage.get_state(key)?.unwrap_or_default();
        f(&mut state);
        self.storage.put_state(key, &state)?;
        Ok(state)
    }

    /// Stored state of a document, if it was ever seen.
    pub fn get(&self, key: &DocumentKey) -> Result<Option<DocumentState>, StorageError> {
        self.storage.get_state(key)
    }

    /// True iff no record exists, the fingerprint changed, or the last
    /// outcome was anything but `indexed`.
    pub fn should_process(&self, key: &DocumentKey, fingerprint: &str) -> Result<bool, StorageError> {
        Ok(match self.storage.get_state(key)? {
            Some(state) => state.needs_processing(fingerprint),
            None => true,
        })
    }

    /// Claim the document and record the start of an attempt.
    ///
    /// Fails with [`StorageError::KeyBusy`] while another attempt holds the claim.
    pub fn begin_attempt(&self, key: &DocumentKey) -> Result<(), StorageError> {
        if !self.in_flight.insert(key.clone()) {
            return Err(StorageError::KeyBusy(key.to_string()));
        }

        let result = self.update(key, |state| {
            state.status = DocumentStatus::Processing;
            state.attempt_count += 1;
            state.last_attempt_time = Some(Utc::now());
        });

        match result {
            Ok(state) => {
                debug!(key = %key, attempt = state.attempt_count, "Began attempt");
                Ok(())
            }
            Err(e) => {
                self.in_flight.remove(key);
                Err(e)
            }
        }
    }

    /// Record a successful attempt and release the claim.
    ///
    /// `fragment_ids` replaces the stored set of point ids for the document.
    pub fn complete_success(
        &self,
        key: &DocumentKey,
        fingerprint: &str,
        fragment_ids: Vec<String>,
    ) -> Result<(), StorageError> {
        let result = self.update(key, |state| {
            let now = Utc::now();
            state.status = DocumentStatus::Indexed;
            state.content_fingerprint = Some(fingerprint.to_string());
            state.fragment_ids = fragment_ids;
            state.last_success_time = Some(now);
            state.failure_reason = None;
            if state.last_attempt_time.is_none() {
                state.last_attempt_time = Some(now);
            }
        });
        self.release(key);
        result.map(|_| ())
    }

    /// Record a failed attempt and release the claim.
    ///
    /// The previous fingerprint is kept so an unchanged document is retried.
    pub fn complete_failure(&self, key: &DocumentKey, reason: &str) -> Result<(), StorageError> {
        self.complete_failure_with_residue(key, reason, &[])
    }

    /// Record a failed attempt that may have left points in the index.
    ///
    /// `residue` is merged into the stored point id set so the next
    /// successful attempt (or a tombstone) deletes whatever was written.
    pub fn complete_failure_with_residue(
        &self,
        key: &DocumentKey,
        reason: &str,
        residue: &[String],
    ) -> Result<(), StorageError> {
        let result = self.update(key, |state| {
            state.status = DocumentStatus::Failed;
            state.failure_reason = Some(reason.to_string());
            for id in residue {
                if !state.fragment_ids.contains(id) {
                    state.fragment_ids.push(id.clone());
                }
            }
        });
        self.release(key);
        if result.is_ok() {
            debug!(key = %key, reason = reason, "Recorded failure");
        }
        result.map(|_| ())
    }

    /// Mark a removed document as tombstoned; its points are gone.
    pub fn mark_tombstoned(&self, key: &DocumentKey) -> Result<(), StorageError> {
        self.update(key, |state| {
            state.status = DocumentStatus::Tombstoned;
            state.fragment_ids.clear();
            state.failure_reason = None;
        })
        .map(|_| ())
    }

    /// Keys of the scope that were not seen this run and are not tombstoned yet.
    pub fn list_stale(
        &self,
        scope: &SourceScope,
        seen_ids: &HashSet<String>,
    ) -> Result<Vec<DocumentKey>, StorageError> {
        let rows = self
            .storage
            .states_with_prefix(&StateKey::scope_prefix(scope))?;

        Ok(rows
            .into_iter()
            .filter(|(key, state)| {
                state.status != DocumentStatus::Tombstoned && !seen_ids.contains(&key.document_id)
            })
            .map(|(key, _)| key)
            .collect())
    }

    /// Per-status document counts of one tenant.
    pub fn status_counts(&self, tenant_id: &str) -> Result<StatusCounts, StorageError> {
        let mut counts = StatusCounts::default();
        for (_, state) in self
            .storage
            .states_with_prefix(&StateKey::tenant_prefix(tenant_id))?
        {
            counts.record(state.status);
        }
        Ok(counts)
    }

    /// Whether an attempt currently holds the claim on `key`.
    pub fn is_in_flight(&self, key: &DocumentKey) -> bool {
        self.in_flight.contains(key)
    }

    fn release(&self, key: &DocumentKey) {
        if self.in_flight.remove(key).is_none() {
            warn!(key = %key, "Completed a document that held no claim");
        }
    }
}
