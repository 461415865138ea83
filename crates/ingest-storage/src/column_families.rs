//! Column family definitions for RocksDB.
//!
//! - document_state: one JSON row per document key (point reads, prefix scans)
//! - runs: append-only run ledger (compressed, time-ordered keys)

use rocksdb::{ColumnFamilyDescriptor, Options};

/// Column family name for per-document processing state
pub const CF_DOCUMENT_STATE: &str = "document_state";

/// Column family name for the run ledger
pub const CF_RUNS: &str = "runs";

/// All column family names
pub const ALL_CF_NAMES: &[&str] = &[CF_DOCUMENT_STATE, CF_RUNS];

fn runs_options() -> Options {
    let mut opts = Options::default();
    opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
    opts
}

/// Build all column family descriptors
pub fn build_cf_descriptors() -> Vec<ColumnFamilyDescriptor> {
    vec![
        ColumnFamilyDescriptor::new(CF_DOCUMENT_STATE, Options::default()),
        ColumnFamilyDescriptor::new(CF_RUNS, runs_options()),
    ]
}
