//! Key encoding and decoding for the storage layer.
//!
//! State keys: `{tenant}\0{source_type}\0{source_name}\0{document_id}`.
//! Components are NUL separated so any prefix ending in `\0` selects exactly
//! one tenant or one (tenant, source) scope, whatever characters the ids use.
//!
//! Run keys: `run:{started_ms:013}:{ulid}` so the ledger iterates in start order.

use ingest_types::{DocumentKey, SourceScope};
use ulid::Ulid;

use crate::error::StorageError;

const SEP: char = '\0';

/// Key of one document state row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateKey(pub DocumentKey);

impl StateKey {
    pub fn new(key: &DocumentKey) -> Self {
        Self(key.clone())
    }

    /// Encode key to bytes for storage
    pub fn to_bytes(&self) -> Vec<u8> {
        let k = &self.0;
        format!(
            "{}{SEP}{}{SEP}{}{SEP}{}",
            k.tenant_id, k.source_type, k.source_name, k.document_id
        )
        .into_bytes()
    }

    /// Decode key from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let s = std::str::from_utf8(bytes)
            .map_err(|e| StorageError::Key(format!("Invalid UTF-8: {}", e)))?;

        let parts: Vec<&str> = s.splitn(4, SEP).collect();
        if parts.len() != 4 {
            return Err(StorageError::Key(format!(
                "Invalid state key format: {:?}",
                s
            )));
        }

        Ok(Self(DocumentKey::new(parts[0], parts[1], parts[2], parts[3])))
    }

    pub fn into_inner(self) -> DocumentKey {
        self.0
    }

    /// Prefix selecting every document of one tenant
    pub fn tenant_prefix(tenant_id: &str) -> Vec<u8> {
        format!("{}{SEP}", tenant_id).into_bytes()
    }

    /// Prefix selecting every document of one (tenant, source) scope
    pub fn scope_prefix(scope: &SourceScope) -> Vec<u8> {
        format!(
            "{}{SEP}{}{SEP}{}{SEP}",
            scope.tenant_id, scope.source_type, scope.source_name
        )
        .into_bytes()
    }
}

/// Key for run ledger entries
/// Format: run:{started_ms:013}:{ulid}
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunKey {
    pub started_ms: i64,
    pub ulid: Ulid,
}

impl RunKey {
    pub fn new(started_ms: i64, ulid: Ulid) -> Self {
        Self { started_ms, ulid }
    }

    /// Build the key from a run id (the run's ULID string)
    pub fn from_run_id(run_id: &str, started_ms: i64) -> Result<Self, StorageError> {
        let ulid: Ulid = run_id
            .parse()
            .map_err(|e| StorageError::Key(format!("Invalid run_id ULID: {}", e)))?;
        Ok(Self { started_ms, ulid })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("run:{:013}:{}", self.started_ms, self.ulid).into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let s = std::str::from_utf8(bytes)
            .map_err(|e| StorageError::Key(format!("Invalid UTF-8: {}", e)))?;

        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 3 || parts[0] != "run" {
            return Err(StorageError::Key(format!("Invalid run key format: {}", s)));
        }

        let started_ms: i64 = parts[1]
            .parse()
            .map_err(|e| StorageError::Key(format!("Invalid timestamp: {}", e)))?;
        let ulid: Ulid = parts[2]
            .parse()
            .map_err(|e| StorageError::Key(format!("Invalid ULID: {}", e)))?;

        Ok(Self { started_ms, ulid })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_key_roundtrip_with_slashes() {
        let key = DocumentKey::new("t1", "filesystem", "docs", "guides/setup.md");
        let decoded = StateKey::from_bytes(&StateKey::new(&key).to_bytes()).unwrap();
        assert_eq!(decoded.into_inner(), key);
    }

    #[test]
    fn test_scope_prefix_does_not_match_sibling_source() {
        let docs = SourceScope::new("t1", "filesystem", "docs");
        let in_docs = StateKey::new(&docs.key("A")).to_bytes();
        let in_docs2 = StateKey::new(&SourceScope::new("t1", "filesystem", "docs2").key("A"))
            .to_bytes();

        let prefix = StateKey::scope_prefix(&docs);
        assert!(in_docs.starts_with(&prefix));
        assert!(!in_docs2.starts_with(&prefix));
    }

    #[test]
    fn test_tenant_prefix_does_not_match_longer_tenant() {
        let t1 = StateKey::new(&DocumentKey::new("t1", "fs", "docs", "A")).to_bytes();
        let t10 = StateKey::new(&DocumentKey::new("t10", "fs", "docs", "A")).to_bytes();
        let prefix = StateKey::tenant_prefix("t1");
        assert!(t1.starts_with(&prefix));
        assert!(!t10.starts_with(&prefix));
    }

    #[test]
    fn test_run_key_order() {
        let k1 = RunKey::new(1000, Ulid::new());
        let k2 = RunKey::new(2000, Ulid::new());
        assert!(k1.to_bytes() < k2.to_bytes());

        let decoded = RunKey::from_bytes(&k2.to_bytes()).unwrap();
        assert_eq!(decoded, k2);
    }

    #[test]
    fn test_run_key_rejects_garbage() {
        assert!(RunKey::from_bytes(b"evt:1:2").is_err());
        assert!(RunKey::from_run_id("not-a-ulid", 0).is_err());
    }
}
