//! Document and document key types.
//!
//! A [`Document`] is created by a source adapter each run and discarded after
//! fragmentation. Only its fingerprint and processing outcome persist, keyed
//! by [`DocumentKey`].

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Well-known metadata keys.
pub mod meta {
    /// MIME-like content type hint supplied by the source
    pub const CONTENT_TYPE: &str = "content_type";
    /// Set on fallback documents produced by a failed conversion
    pub const CONVERSION_ERROR: &str = "conversion_error";
    /// Tenant identity stamped by the tenant registry
    pub const TENANT_ID: &str = "tenant_id";
    /// Tenant display name stamped by the tenant registry
    pub const TENANT_NAME: &str = "tenant_name";
    /// Source-relative path of the document
    pub const PATH: &str = "path";
    /// Heading a fragment belongs to (structured text)
    pub const SECTION: &str = "section";
}

/// Normalize content before fingerprinting.
///
/// Line endings are unified to `\n`, trailing whitespace is stripped from
/// every line and leading/trailing blank lines are dropped.
pub fn normalize_content(content: &str) -> String {
    let unified = content.replace("\r\n", "\n").replace('\r', "\n");
    let lines: Vec<&str> = unified.lines().map(str::trim_end).collect();
    lines.join("\n").trim_matches('\n').to_string()
}

/// SHA-256 fingerprint (lowercase hex) of the normalized content.
pub fn fingerprint(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_content(content).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Identity of one document within one tenant's source.
///
/// This is the primary key of the persisted document state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentKey {
    pub tenant_id: String,
    pub source_type: String,
    pub source_name: String,
    pub document_id: String,
}

impl DocumentKey {
    pub fn new(
        tenant_id: impl Into<String>,
        source_type: impl Into<String>,
        source_name: impl Into<String>,
        document_id: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            source_type: source_type.into(),
            source_name: source_name.into(),
            document_id: document_id.into(),
        }
    }

    /// The (tenant, source) scope this key belongs to.
    pub fn scope(&self) -> SourceScope {
        SourceScope::new(&self.tenant_id, &self.source_type, &self.source_name)
    }

    /// Vector-index point id for one of this document's fragments.
    ///
    /// Fragment ids are only unique per document id, so the point id is
    /// scoped by tenant and source to keep the shared index collision free.
    /// The scope segments never contain [`SCOPE_SEPARATOR`] (see
    /// [`is_scope_segment`]), so only the trailing document id may.
    pub fn point_id(&self, fragment_id: &str) -> String {
        format!(
            "{}{sep}{}{sep}{}{sep}{}",
            self.tenant_id,
            self.source_type,
            self.source_name,
            fragment_id,
            sep = SCOPE_SEPARATOR
        )
    }
}

/// Separator between the segments of point ids and key strings.
pub const SCOPE_SEPARATOR: char = '/';

/// Whether `segment` is usable as a tenant id, source type or source name.
pub fn is_scope_segment(segment: &str) -> bool {
    !segment.trim().is_empty() && !segment.contains(SCOPE_SEPARATOR)
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.tenant_id, self.source_type, self.source_name, self.document_id
        )
    }
}

/// A (tenant, source type, source name) triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceScope {
    pub tenant_id: String,
    pub source_type: String,
    pub source_name: String,
}

impl SourceScope {
    pub fn new(
        tenant_id: impl Into<String>,
        source_type: impl Into<String>,
        source_name: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            source_type: source_type.into(),
            source_name: source_name.into(),
        }
    }

    /// Build the key for a document inside this scope.
    pub fn key(&self, document_id: impl Into<String>) -> DocumentKey {
        DocumentKey::new(
            &self.tenant_id,
            &self.source_type,
            &self.source_name,
            document_id,
        )
    }
}

impl fmt::Display for SourceScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.tenant_id, self.source_type, self.source_name
        )
    }
}

/// One unit of source content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Stable within its source
    pub document_id: String,
    /// Empty until stamped by the tenant registry
    pub tenant_id: String,
    pub source_type: String,
    pub source_name: String,
    pub content: String,
    /// Always `fingerprint(content)`
    pub content_fingerprint: String,
    /// Source-defined metadata, ordered by key
    pub metadata: BTreeMap<String, String>,
}

impl Document {
    /// Create an unstamped document; the fingerprint is computed here.
    pub fn new(
        document_id: impl Into<String>,
        source_type: impl Into<String>,
        source_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let content = content.into();
        Self {
            document_id: document_id.into(),
            tenant_id: String::new(),
            source_type: source_type.into(),
            source_name: source_name.into(),
            content_fingerprint: fingerprint(&content),
            content,
            metadata: BTreeMap::new(),
        }
    }

    /// Add a metadata entry (builder pattern).
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Replace the content, keeping the fingerprint in sync.
    pub fn set_content(&mut self, content: impl Into<String>) {
        self.content = content.into();
        self.content_fingerprint = fingerprint(&self.content);
    }

    /// Key of this document. Only meaningful once stamped with a tenant.
    pub fn key(&self) -> DocumentKey {
        DocumentKey::new(
            &self.tenant_id,
            &self.source_type,
            &self.source_name,
            &self.document_id,
        )
    }

    /// Content type hint, if the source supplied one.
    pub fn content_type(&self) -> Option<&str> {
        self.metadata.get(meta::CONTENT_TYPE).map(String::as_str)
    }

    /// Whether this is a fallback document from a failed conversion.
    pub fn is_fallback(&self) -> bool {
        self.metadata.contains_key(meta::CONVERSION_ERROR)
    }
}
