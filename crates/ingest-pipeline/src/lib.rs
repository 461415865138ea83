//! # ingest-pipeline
//!
//! Incremental, multi-tenant ingestion from document sources into vector
//! indexes.
//!
//! A run enumerates every configured [`DocumentSource`], skips documents whose
//! content fingerprint is unchanged, and pushes the rest through
//! fragmentation, vectorization and publication. Stages run concurrently and
//! are connected by bounded queues. Every processed document ends the run
//! either indexed (all of its fragments stored under deterministic ids, stale
//! ones removed) or failed with a reason recorded in the run summary.
//!
//! ## Usage
//!
//! ```ignore
//! let orchestrator = Orchestrator::new(tenants, store, provider, index, config);
//! let report = orchestrator
//!     .run(vec![TenantSource::new("acme", source)], CancellationToken::new())
//!     .await?;
//! println!("{}", report.run.summary_line());
//! ```

pub mod config;
pub mod convert;
pub mod error;
pub mod monitor;
pub mod orchestrator;
pub mod retry;
pub mod source;
pub mod tenants;
pub mod tracker;

mod stages;

pub use config::PipelineConfig;
pub use convert::{Preprocessor, Utf8Preprocessor};
pub use error::PipelineError;
pub use monitor::{MonitorSnapshot, RunMonitor, Stage, StageSnapshot};
pub use orchestrator::{Orchestrator, RunReport, TenantSource};
pub use retry::{RetryPolicy, Retryable};
pub use source::{DocumentSource, FilesystemSource, ItemBody, SourceError, SourceItem, StaticSource};
pub use tenants::TenantRegistry;
pub use tracker::{DocumentPhase, CANCELLED};

pub use tokio_util::sync::CancellationToken;
