//! Fragment types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::document::{Document, DocumentKey};

/// Deterministic fragment id: `{document_id}#{sequence_index}`.
pub fn fragment_id(document_id: &str, sequence_index: u32) -> String {
    format!("{}#{}", document_id, sequence_index)
}

/// One addressable, ordered piece of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    pub fragment_id: String,
    pub document_id: String,
    pub tenant_id: String,
    pub sequence_index: u32,
    pub content: String,
    pub metadata: BTreeMap<String, String>,
}

impl Fragment {
    /// Create the fragment at `sequence_index` of `document`.
    pub fn new(
        document: &Document,
        sequence_index: u32,
        content: impl Into<String>,
        metadata: BTreeMap<String, String>,
    ) -> Self {
        Self {
            fragment_id: fragment_id(&document.document_id, sequence_index),
            document_id: document.document_id.clone(),
            tenant_id: document.tenant_id.clone(),
            sequence_index,
            content: content.into(),
            metadata,
        }
    }

    /// Size used for batch byte budgets.
    pub fn byte_len(&self) -> usize {
        self.content.len()
    }
}

/// A fragment paired with its embedding vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorizedFragment {
    pub fragment: Fragment,
    pub vector: Vec<f32>,
    /// Embedding configuration that produced `vector`
    pub vector_model_id: String,
}

impl VectorizedFragment {
    pub fn new(fragment: Fragment, vector: Vec<f32>, vector_model_id: impl Into<String>) -> Self {
        Self {
            fragment,
            vector,
            vector_model_id: vector_model_id.into(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.vector.len()
    }

    /// Point id of this fragment inside the shared index.
    pub fn point_id(&self, key: &DocumentKey) -> String {
        key.point_id(&self.fragment.fragment_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragment_id_format() {
        assert_eq!(fragment_id("A", 0), "A#0");
        assert_eq!(fragment_id("docs/guide.md", 12), "docs/guide.md#12");
    }

    #[test]
    fn test_fragment_new_copies_identity() {
        let mut doc = Document::new("A", "fs", "docs", "hello world");
        doc.tenant_id = "t1".to_string();

        let frag = Fragment::new(&doc, 1, "world", BTreeMap::new());
        assert_eq!(frag.fragment_id, "A#1");
        assert_eq!(frag.document_id, "A");
        assert_eq!(frag.tenant_id, "t1");
        assert_eq!(frag.sequence_index, 1);
        assert_eq!(frag.byte_len(), 5);
    }

    #[test]
    fn test_vectorized_point_id() {
        let mut doc = Document::new("A", "fs", "docs", "hello");
        doc.tenant_id = "t1".to_string();
        let frag = Fragment::new(&doc, 0, "hello", BTreeMap::new());
        let vf = VectorizedFragment::new(frag, vec![0.0; 4], "hashing-v1");
        assert_eq!(vf.dimension(), 4);
        assert_eq!(vf.point_id(&doc.key()), "t1/fs/docs/A#0");
    }
}
