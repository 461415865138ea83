//! Fragmenter trait.

use std::collections::BTreeMap;

use ingest_types::Document;

use crate::config::FragmentOptions;
use crate::error::FragmentError;

/// Content and metadata of one fragment, before the registry numbers it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentDraft {
    pub content: String,
    pub metadata: BTreeMap<String, String>,
}

impl FragmentDraft {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// One fragmentation strategy.
///
/// Implementations must be deterministic: the same document content and
/// options always yield the same drafts in the same order.
pub trait Fragmenter: Send + Sync {
    /// Name used in logs and errors
    fn name(&self) -> &'static str;

    /// Whether this variant applies to the document
    fn can_handle(&self, document: &Document) -> bool;

    /// Split the document into ordered drafts. Empty content yields none.
    fn fragment(
        &self,
        document: &Document,
        options: &FragmentOptions,
    ) -> Result<Vec<FragmentDraft>, FragmentError>;
}
