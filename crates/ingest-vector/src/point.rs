//! Index points, payload schema and filters.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Payload field names written for every point.
///
/// `tenant_id`, `document_id`, `source_type` and `source_name` are the
/// filterable fields; queries for one tenant must always filter on
/// `tenant_id`.
pub mod fields {
    pub const TENANT_ID: &str = "tenant_id";
    pub const DOCUMENT_ID: &str = "document_id";
    pub const SOURCE_TYPE: &str = "source_type";
    pub const SOURCE_NAME: &str = "source_name";
    pub const FRAGMENT_ID: &str = "fragment_id";
    pub const SEQUENCE_INDEX: &str = "sequence_index";
    pub const CONTENT: &str = "content";
    pub const VECTOR_MODEL_ID: &str = "vector_model_id";
    /// Nested object holding fragment metadata
    pub const METADATA: &str = "metadata";
}

pub type Payload = BTreeMap<String, Value>;

/// One vector with its id and payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: Payload,
}

impl IndexPoint {
    pub fn new(id: impl Into<String>, vector: Vec<f32>) -> Self {
        Self {
            id: id.into(),
            vector,
            payload: Payload::new(),
        }
    }

    pub fn with_payload(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// String payload field, if present.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}

/// A query hit.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPoint {
    pub id: String,
    /// Cosine similarity, higher is closer
    pub score: f32,
    pub payload: Payload,
}

/// Conjunction of exact-match conditions on payload fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PayloadFilter {
    must: Vec<(String, Value)>,
}

impl PayloadFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter selecting one tenant's points.
    pub fn tenant(tenant_id: &str) -> Self {
        Self::new().eq(fields::TENANT_ID, tenant_id)
    }

    /// Add an equality condition (builder pattern).
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.must.push((field.into(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.must.is_empty()
    }

    pub fn matches(&self, payload: &Payload) -> bool {
        self.must
            .iter()
            .all(|(field, value)| payload.get(field) == Some(value))
    }
}

/// Cosine similarity of two equally sized vectors; 0 when either is zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}
