//! Fragmenter registry.
//!
//! Variants are consulted in registration order; the first whose
//! `can_handle` accepts the document wins. The default variant handles
//! everything else and is also the fallback when a variant fails.

use std::sync::Arc;

use ingest_types::{meta, Document, Fragment};
use tracing::{debug, warn};

use crate::config::FragmentOptions;
use crate::enrich::{FragmentEnricher, MetadataPropagation};
use crate::error::FragmentError;
use crate::fragmenter::Fragmenter;
use crate::markdown::MarkdownFragmenter;
use crate::text::TextFragmenter;

/// Registry of fragmentation strategies plus the enrichment chain.
pub struct FragmenterRegistry {
    fragmenters: Vec<Arc<dyn Fragmenter>>,
    default: Arc<dyn Fragmenter>,
    enrichers: Vec<Arc<dyn FragmentEnricher>>,
}

impl FragmenterRegistry {
    /// Registry with only a default variant.
    pub fn new(default: impl Fragmenter + 'static) -> Self {
        Self {
            fragmenters: Vec::new(),
            default: Arc::new(default),
            enrichers: Vec::new(),
        }
    }

    /// Markdown before plain text, with path and tenant metadata propagated.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new(TextFragmenter::new());
        registry.register(MarkdownFragmenter::new());
        registry.add_enricher(MetadataPropagation::new([
            meta::PATH,
            meta::TENANT_NAME,
            meta::CONTENT_TYPE,
        ]));
        registry
    }

    /// Register a variant after all previously registered ones.
    pub fn register(&mut self, fragmenter: impl Fragmenter + 'static) {
        self.fragmenters.push(Arc::new(fragmenter));
    }

    pub fn add_enricher(&mut self, enricher: impl FragmentEnricher + 'static) {
        self.enrichers.push(Arc::new(enricher));
    }

    /// The variant that will handle `document`.
    pub fn select(&self, document: &Document) -> Arc<dyn Fragmenter> {
        self.fragmenters
            .iter()
            .find(|f| f.can_handle(document))
            .cloned()
            .unwrap_or_else(|| self.default.clone())
    }

    /// Fragment a document and number its fragments `0..n`.
    ///
    /// A failing variant degrades to the default; only a failure of the
    /// default (or of an enricher) fails the document.
    pub fn fragment(
        &self,
        document: &Document,
        options: &FragmentOptions,
    ) -> Result<Vec<Fragment>, FragmentError> {
        let chosen = self.select(document);

        let drafts = match chosen.fragment(document, options) {
            Ok(drafts) => drafts,
            Err(e) if !Arc::ptr_eq(&chosen, &self.default) => {
                warn!(
                    document_id = %document.document_id,
                    fragmenter = chosen.name(),
                    error = %e,
                    "Fragmenter failed, falling back to default"
                );
                self.default.fragment(document, options)?
            }
            Err(e) => return Err(e),
        };

        let mut fragments: Vec<Fragment> = drafts
            .into_iter()
            .enumerate()
            .map(|(i, draft)| Fragment::new(document, i as u32, draft.content, draft.metadata))
            .collect();

        for enricher in &self.enrichers {
            enricher
                .enrich(document, &mut fragments)
                .map_err(|e| match e {
                    FragmentError::Enrichment { .. } => e,
                    other => FragmentError::Enrichment {
                        enricher: enricher.name().to_string(),
                        reason: other.to_string(),
                    },
                })?;
        }

        debug!(
            document_id = %document.document_id,
            fragmenter = chosen.name(),
            count = fragments.len(),
            "Fragmented document"
        );
        Ok(fragments)
    }
}

impl Default for FragmenterRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
