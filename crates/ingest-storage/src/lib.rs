//! Storage layer for the ingestion engine.
//!
//! Provides RocksDB-backed storage with:
//! - Column family isolation for document state and the run ledger
//! - Scope-prefixed state keys for per-source scans
//! - Time-prefixed run keys for ordered ledger reads
//! - The change-detection store deciding what to (re)process

pub mod column_families;
pub mod db;
pub mod error;
pub mod keys;
pub mod state;

pub use db::{Storage, StorageStats};
pub use error::StorageError;
pub use keys::{RunKey, StateKey};
pub use state::{ChangeDetectionStore, StatusCounts};
