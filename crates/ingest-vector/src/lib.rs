//! # ingest-vector
//!
//! Vector index interface for the ingestion engine.
//!
//! ## Features
//! - Async [`VectorIndex`] trait: ensure, atomic batch upsert, delete,
//!   filtered query
//! - Shared payload schema ([`fields`]) with `tenant_id` as the isolation key
//! - [`MemoryIndex`] for tests and ephemeral runs
//! - [`RocksIndex`] for persistent single-node deployments

pub mod error;
pub mod index;
pub mod memory;
pub mod point;
pub mod rocks;

pub use error::VectorError;
pub use index::VectorIndex;
pub use memory::MemoryIndex;
pub use point::{cosine_similarity, fields, IndexPoint, Payload, PayloadFilter, ScoredPoint};
pub use rocks::RocksIndex;
