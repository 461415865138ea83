//! Resolved tenant context.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Tenant settings after merging global defaults with tenant overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantOverrides {
    /// Word budget per fragment
    pub max_fragment_words: usize,
    /// Words repeated at the start of the next fragment
    pub overlap_words: usize,
    /// Metadata stamped onto every document of the tenant
    pub metadata: BTreeMap<String, String>,
}

/// One logical tenant ("project") writing into the shared physical index.
///
/// Resolved once per run and passed explicitly through every call boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantContext {
    pub tenant_id: String,
    pub display_name: String,
    /// Physical index shared by all tenants; partitioned by `tenant_id` payload
    pub index_name: String,
    pub overrides: TenantOverrides,
}

impl TenantContext {
    pub fn new(
        tenant_id: impl Into<String>,
        display_name: impl Into<String>,
        index_name: impl Into<String>,
        overrides: TenantOverrides,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            display_name: display_name.into(),
            index_name: index_name.into(),
            overrides,
        }
    }
}
