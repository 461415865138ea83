//! Post-fragmentation enrichment hook.
//!
//! Enrichers run after a document has been fragmented and may attach
//! metadata to its fragments. Heavier analyses (topic labels, entities)
//! plug in here without touching the fragmenters.

use ingest_types::{Document, Fragment};

use crate::error::FragmentError;

/// Adds metadata to the fragments of one document.
pub trait FragmentEnricher: Send + Sync {
    fn name(&self) -> &'static str;

    /// Must not add, remove or reorder fragments.
    fn enrich(&self, document: &Document, fragments: &mut [Fragment]) -> Result<(), FragmentError>;
}

/// Copies selected document metadata keys into every fragment.
///
/// Keys the fragment already has are left untouched.
#[derive(Debug, Clone)]
pub struct MetadataPropagation {
    keys: Vec<String>,
}

impl MetadataPropagation {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }
}

impl FragmentEnricher for MetadataPropagation {
    fn name(&self) -> &'static str {
        "metadata_propagation"
    }

    fn enrich(&self, document: &Document, fragments: &mut [Fragment]) -> Result<(), FragmentError> {
        for key in &self.keys {
            if let Some(value) = document.metadata.get(key) {
                for fragment in fragments.iter_mut() {
                    fragment
                        .metadata
                        .entry(key.clone())
                        .or_insert_with(|| value.clone());
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingest_types::meta;
    use std::collections::BTreeMap;

    #[test]
    fn test_propagates_selected_keys() {
        let doc = Document::new("A", "fs", "docs", "x")
            .with_metadata(meta::PATH, "docs/a.md")
            .with_metadata("secret", "nope");

        let mut existing = BTreeMap::new();
        existing.insert(meta::PATH.to_string(), "kept".to_string());
        let mut fragments = vec![
            Fragment::new(&doc, 0, "x", BTreeMap::new()),
            Fragment::new(&doc, 1, "y", existing),
        ];

        MetadataPropagation::new([meta::PATH, "missing"])
            .enrich(&doc, &mut fragments)
            .unwrap();

        assert_eq!(fragments[0].metadata.get(meta::PATH).unwrap(), "docs/a.md");
        assert_eq!(fragments[1].metadata.get(meta::PATH).unwrap(), "kept");
        assert!(!fragments[0].metadata.contains_key("secret"));
        assert!(!fragments[0].metadata.contains_key("missing"));
    }
}
