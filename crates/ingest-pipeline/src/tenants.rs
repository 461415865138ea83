//! Tenant registry.
//!
//! Resolves the configured tenants once per run into read-only
//! [`TenantContext`] values and stamps documents with their tenant identity.
//! The registry is an ordinary value passed to whoever needs it.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use ingest_fragment::FragmentOptions;
use ingest_types::{
    is_scope_segment, meta, Document, Settings, TenantContext, TenantOverrides, SCOPE_SEPARATOR,
};
use tracing::{debug, info};

use crate::error::PipelineError;

/// Resolved tenants, in configuration order.
#[derive(Debug, Clone)]
pub struct TenantRegistry {
    tenants: Vec<Arc<TenantContext>>,
}

impl TenantRegistry {
    /// Merge global defaults with every tenant's overrides.
    ///
    /// Fails on duplicate, empty or separator-bearing tenant ids, an empty
    /// index name, invalid
    /// fragment sizing, or when no tenant is configured.
    pub fn resolve(settings: &Settings) -> Result<Self, PipelineError> {
        if settings.tenants.is_empty() {
            return Err(PipelineError::config("no tenants configured"));
        }

        let mut seen = HashSet::new();
        let mut tenants = Vec::with_capacity(settings.tenants.len());

        for tenant in &settings.tenants {
            let tenant_id = tenant.id.trim();
            if tenant_id.is_empty() {
                return Err(PipelineError::config("tenant id must not be empty"));
            }
            if !is_scope_segment(tenant_id) {
                return Err(PipelineError::Config(format!(
                    "tenant id {} must not contain '{}'",
                    tenant_id, SCOPE_SEPARATOR
                )));
            }
            if !seen.insert(tenant_id.to_string()) {
                return Err(PipelineError::Config(format!(
                    "duplicate tenant id: {}",
                    tenant_id
                )));
            }

            let index_name = tenant
                .index_name
                .clone()
                .unwrap_or_else(|| settings.index_name.clone());
            if index_name.trim().is_empty() {
                return Err(PipelineError::Config(format!(
                    "tenant {} has an empty index name",
                    tenant_id
                )));
            }

            let max_words = tenant
                .overrides
                .max_words
                .unwrap_or(settings.fragmentation.max_words);
            let overlap_words = tenant
                .overrides
                .overlap_words
                .unwrap_or(settings.fragmentation.overlap_words);
            FragmentOptions::new(max_words, overlap_words)
                .validate()
                .map_err(|e| PipelineError::Config(format!("tenant {}: {}", tenant_id, e)))?;

            let mut metadata = settings.metadata.clone();
            metadata.extend(tenant.metadata.clone());

            let display_name = tenant
                .display_name
                .clone()
                .unwrap_or_else(|| tenant_id.to_string());

            debug!(tenant = tenant_id, index = %index_name, max_words, overlap_words, "Resolved tenant");
            tenants.push(Arc::new(TenantContext::new(
                tenant_id,
                display_name,
                index_name,
                TenantOverrides {
                    max_fragment_words: max_words,
                    overlap_words,
                    metadata,
                },
            )));
        }

        info!(count = tenants.len(), "Resolved tenants");
        Ok(Self { tenants })
    }

    pub fn get(&self, tenant_id: &str) -> Result<&Arc<TenantContext>, PipelineError> {
        self.tenants
            .iter()
            .find(|t| t.tenant_id == tenant_id)
            .ok_or_else(|| PipelineError::TenantNotFound(tenant_id.to_string()))
    }

    pub fn tenants(&self) -> &[Arc<TenantContext>] {
        &self.tenants
    }

    pub fn len(&self) -> usize {
        self.tenants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty()
    }

    /// Distinct physical index names across all tenants.
    pub fn index_names(&self) -> BTreeSet<String> {
        self.tenants.iter().map(|t| t.index_name.clone()).collect()
    }

    /// Attach tenant identity to a document.
    ///
    /// Source metadata always wins over stamped keys, so stamping twice is
    /// the same as stamping once.
    pub fn stamp(&self, mut document: Document, tenant_id: &str) -> Result<Document, PipelineError> {
        let tenant = self.get(tenant_id)?;

        document.tenant_id = tenant.tenant_id.clone();
        document
            .metadata
            .entry(meta::TENANT_ID.to_string())
            .or_insert_with(|| tenant.tenant_id.clone());
        document
            .metadata
            .entry(meta::TENANT_NAME.to_string())
            .or_insert_with(|| tenant.display_name.clone());
        for (key, value) in &tenant.overrides.metadata {
            document
                .metadata
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        Ok(document)
    }
}
