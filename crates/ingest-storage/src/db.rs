//! RocksDB wrapper for ingestion storage.
//!
//! Provides:
//! - Database open/close with column family setup
//! - Single-row document state reads and writes
//! - Prefix scans over a tenant or a (tenant, source) scope
//! - The append-only run ledger

use std::path::Path;

use ingest_types::{DocumentKey, DocumentState, IngestionRun};
use rocksdb::{Direction, IteratorMode, Options, DB};
use tracing::{debug, info};

use crate::column_families::{build_cf_descriptors, ALL_CF_NAMES, CF_DOCUMENT_STATE, CF_RUNS};
use crate::error::StorageError;
use crate::keys::{RunKey, StateKey};

/// Main storage interface
pub struct Storage {
    db: DB,
}

impl Storage {
    /// Open storage at the given path, creating if necessary
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        info!("Opening storage at {:?}", path);

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_background_jobs(4);

        let cf_descriptors = build_cf_descriptors();
        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        Ok(Self { db })
    }

    // ==================== Document State Methods ====================

    /// Get the state row of a document
    pub fn get_state(&self, key: &DocumentKey) -> Result<Option<DocumentState>, StorageError> {
        let cf = self
            .db
            .cf_handle(CF_DOCUMENT_STATE)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(CF_DOCUMENT_STATE.to_string()))?;

        match self.db.get_cf(&cf, StateKey::new(key).to_bytes())? {
            Some(bytes) => Ok(Some(DocumentState::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Write the state row of a document.
    ///
    /// A single put: a failed write leaves the previous row untouched.
    pub fn put_state(&self, key: &DocumentKey, state: &DocumentState) -> Result<(), StorageError> {
        let cf = self
            .db
            .cf_handle(CF_DOCUMENT_STATE)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(CF_DOCUMENT_STATE.to_string()))?;

        let bytes = state.to_bytes()?;
        self.db.put_cf(&cf, StateKey::new(key).to_bytes(), &bytes)?;

        debug!(key = %key, status = %state.status, "Stored document state");
        Ok(())
    }

    /// Scan every state row whose key starts with `prefix`.
    ///
    /// Use [`StateKey::tenant_prefix`] or [`StateKey::scope_prefix`] to build it.
    pub fn states_with_prefix(
        &self,
        prefix: &[u8],
    ) -> Result<Vec<(DocumentKey, DocumentState)>, StorageError> {
        let cf = self
            .db
            .cf_handle(CF_DOCUMENT_STATE)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(CF_DOCUMENT_STATE.to_string()))?;

        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(prefix, Direction::Forward));

        let mut results = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            let state_key = StateKey::from_bytes(&key)?;
            let state = DocumentState::from_bytes(&value)?;
            results.push((state_key.into_inner(), state));
        }

        Ok(results)
    }

    // ==================== Run Ledger Methods ====================

    /// Append a closed run to the ledger
    pub fn append_run(&self, run: &IngestionRun) -> Result<(), StorageError> {
        let cf = self
            .db
            .cf_handle(CF_RUNS)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(CF_RUNS.to_string()))?;

        let key = RunKey::from_run_id(&run.run_id, run.started_at.timestamp_millis())?;
        let bytes = run.to_bytes()?;
        self.db.put_cf(&cf, key.to_bytes(), &bytes)?;

        debug!(run_id = %run.run_id, "Appended run to ledger");
        Ok(())
    }

    /// Most recent runs, newest first
    pub fn list_runs(&self, limit: usize) -> Result<Vec<IngestionRun>, StorageError> {
        let cf = self
            .db
            .cf_handle(CF_RUNS)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(CF_RUNS.to_string()))?;

        let mut runs = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::End).take(limit) {
            let (_, value) = item?;
            runs.push(IngestionRun::from_bytes(&value)?);
        }
        Ok(runs)
    }

    /// Flush all column families to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        for cf_name in ALL_CF_NAMES {
            if let Some(cf) = self.db.cf_handle(cf_name) {
                self.db.flush_cf(&cf)?;
            }
        }
        Ok(())
    }

    /// Get storage statistics
    pub fn get_stats(&self) -> Result<StorageStats, StorageError> {
        let mut stats = StorageStats::default();

        if let Some(cf) = self.db.cf_handle(CF_DOCUMENT_STATE) {
            stats.document_count = self.count_cf_entries(cf)?;
        }
        if let Some(cf) = self.db.cf_handle(CF_RUNS) {
            stats.run_count = self.count_cf_entries(cf)?;
        }
        stats.disk_usage_bytes = self.get_disk_usage();

        Ok(stats)
    }

    fn count_cf_entries(&self, cf: &rocksdb::ColumnFamily) -> Result<u64, StorageError> {
        let mut count = 0u64;
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            item?;
            count += 1;
        }
        Ok(count)
    }

    fn get_disk_usage(&self) -> u64 {
        std::fs::read_dir(self.db.path())
            .map(|entries| {
                entries
                    .flatten()
                    .filter_map(|e| e.metadata().ok())
                    .map(|m| m.len())
                    .sum()
            })
            .unwrap_or(0)
    }
}

/// Statistics about the storage.
#[derive(Debug, Default)]
pub struct StorageStats {
    /// Number of document state rows (including tombstones)
    pub document_count: u64,
    /// Number of runs in the ledger
    pub run_count: u64,
    /// Total disk usage in bytes
    pub disk_usage_bytes: u64,
}
