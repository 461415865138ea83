//! # ingest-types
//!
//! Shared domain types for the ingestion engine.
//!
//! This crate defines the core data structures used throughout the system:
//! - Documents: One unit of source content plus its content fingerprint
//! - Fragments: Ordered, addressable pieces of a document
//! - Document state: Persisted processing outcome per document key
//! - Tenants: Resolved logical tenants sharing one physical index
//! - Runs: Summary of one ingestion run
//! - Settings: Layered configuration
//!
//! ## Usage
//!
//! ```rust
//! use ingest_types::Document;
//!
//! let doc = Document::new("A", "filesystem", "docs", "hello");
//! assert_eq!(doc.content_fingerprint, ingest_types::fingerprint("hello"));
//! ```

pub mod config;
pub mod document;
pub mod error;
pub mod fragment;
pub mod run;
pub mod state;
pub mod tenant;

pub use config::{
    expand_home, EmbeddingSettings, FragmentationSettings, PipelineSettings, Settings,
    SourceSettings, TenantOverrideSettings, TenantSettings,
};
pub use document::{
    fingerprint, is_scope_segment, meta, normalize_content, Document, DocumentKey, SourceScope,
    SCOPE_SEPARATOR,
};
pub use error::IngestError;
pub use fragment::{fragment_id, Fragment, VectorizedFragment};
pub use run::{FailedDocument, IngestionRun, RunStatus};
pub use state::{DocumentState, DocumentStatus};
pub use tenant::{TenantContext, TenantOverrides};
