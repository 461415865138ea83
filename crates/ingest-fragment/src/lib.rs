//! # ingest-fragment
//!
//! Splits documents into ordered, addressable fragments.
//!
//! Fragmentation is pluggable: every [`Fragmenter`] declares which documents
//! it handles, and the [`FragmenterRegistry`] dispatches to the first match in
//! registration order, falling back to its default variant. The registry, not
//! the variant, assigns sequence indexes and fragment ids, so fragment ids are
//! deterministic whenever a variant is a pure function of its input.
//!
//! After fragmentation, registered [`FragmentEnricher`]s may add metadata.

pub mod config;
pub mod enrich;
pub mod error;
pub mod fragmenter;
pub mod markdown;
pub mod registry;
pub mod text;

pub use config::FragmentOptions;
pub use enrich::{FragmentEnricher, MetadataPropagation};
pub use error::FragmentError;
pub use fragmenter::{FragmentDraft, Fragmenter};
pub use markdown::MarkdownFragmenter;
pub use registry::FragmenterRegistry;
pub use text::TextFragmenter;
