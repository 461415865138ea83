//! End-to-end test infrastructure for the ingestion engine.
//!
//! Provides a shared [`TestHarness`] (temp state store plus an in-memory
//! index) and scripted fakes: an embedding provider that can be slowed or
//! poisoned, an index that records every write and can refuse some of
//! them, and a source that counts
//! how far it has been enumerated.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;

use ingest_embeddings::{Embedding, EmbeddingError, EmbeddingProvider, HashEmbedder};
use ingest_pipeline::{
    DocumentSource, Orchestrator, PipelineConfig, SourceError, SourceItem, StaticSource,
    TenantRegistry,
};
use ingest_storage::{ChangeDetectionStore, Storage};
use ingest_types::{DocumentKey, DocumentState, Settings, TenantSettings};
use ingest_vector::{
    fields, IndexPoint, MemoryIndex, PayloadFilter, ScoredPoint, VectorError, VectorIndex,
};

/// Physical index every test tenant shares.
pub const INDEX: &str = "documents";

/// Source type of [`static_source`].
pub const SOURCE_TYPE: &str = "static";

/// Vector dimension used throughout the tests.
pub const DIMENSION: usize = 16;

/// Shared test harness for E2E tests.
pub struct TestHarness {
    /// Keeps temp dir alive for the lifetime of the harness
    pub _temp_dir: tempfile::TempDir,
    pub storage: Arc<Storage>,
    pub store: Arc<ChangeDetectionStore>,
    pub index: Arc<RecordingIndex>,
}

impl TestHarness {
    /// Create a harness with a fresh state store and an in-memory index.
    pub fn new() -> Self {
        Self::with_index(RecordingIndex::new())
    }

    pub fn with_index(index: RecordingIndex) -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let storage =
            Arc::new(Storage::open(temp_dir.path()).expect("Failed to open test storage"));
        Self {
            _temp_dir: temp_dir,
            store: Arc::new(ChangeDetectionStore::new(storage.clone())),
            storage,
            index: Arc::new(index),
        }
    }

    pub fn orchestrator(
        &self,
        tenants: TenantRegistry,
        provider: Arc<dyn EmbeddingProvider>,
        config: PipelineConfig,
    ) -> Orchestrator {
        Orchestrator::new(
            tenants,
            self.store.clone(),
            provider,
            self.index.clone(),
            config,
        )
    }

    /// Persisted state of a document.
    pub fn state(&self, key: &DocumentKey) -> Option<DocumentState> {
        self.store.get(key).expect("Failed to read document state")
    }

    /// Ids of all points of a tenant, sorted.
    pub fn point_ids(&self, tenant_id: &str) -> Vec<String> {
        self.points(tenant_id).into_iter().map(|p| p.id).collect()
    }

    /// All points of a tenant, ordered by id.
    pub fn points(&self, tenant_id: &str) -> Vec<IndexPoint> {
        let filter = PayloadFilter::tenant(tenant_id);
        self.index
            .inner
            .points(INDEX)
            .unwrap_or_default()
            .into_iter()
            .filter(|p| filter.matches(&p.payload))
            .collect()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry of tenants sharing [`INDEX`], with default fragmentation.
pub fn tenants(ids: &[&str]) -> TenantRegistry {
    TenantRegistry::resolve(&settings(ids)).expect("Failed to resolve tenants")
}

/// Registry whose tenants fragment into `max_words`-word pieces.
pub fn tenants_with_fragment_words(ids: &[&str], max_words: usize) -> TenantRegistry {
    let mut settings = settings(ids);
    for tenant in &mut settings.tenants {
        tenant.overrides.max_words = Some(max_words);
        tenant.overrides.overlap_words = Some(0);
    }
    TenantRegistry::resolve(&settings).expect("Failed to resolve tenants")
}

fn settings(ids: &[&str]) -> Settings {
    Settings {
        index_name: INDEX.to_string(),
        tenants: ids.iter().map(|id| TenantSettings::new(*id)).collect(),
        ..Default::default()
    }
}

/// Small batches, short linger and millisecond backoff.
pub fn fast_config() -> PipelineConfig {
    PipelineConfig::default()
        .with_batch_linger(Duration::from_millis(2))
        .with_retries(2, Duration::from_millis(1))
        .with_drain_timeout(Duration::from_millis(200))
}

/// Static source of text documents.
pub fn static_source(name: &str, docs: &[(&str, &str)]) -> StaticSource {
    docs.iter().fold(StaticSource::new(SOURCE_TYPE, name), |source, (id, text)| {
        source.with_text(*id, *text)
    })
}

/// Key of a document of a [`static_source`].
pub fn key(tenant_id: &str, source_name: &str, document_id: &str) -> DocumentKey {
    DocumentKey::new(tenant_id, SOURCE_TYPE, source_name, document_id)
}

/// Hashing embedder that can be slowed down or made to fail.
pub struct ScriptedEmbedder {
    inner: HashEmbedder,
    delay: Option<Duration>,
    poison: Option<String>,
    calls: AtomicUsize,
    texts: AtomicUsize,
}

impl ScriptedEmbedder {
    pub fn new() -> Self {
        Self {
            inner: HashEmbedder::new(DIMENSION).expect("Failed to create embedder"),
            delay: None,
            poison: None,
            calls: AtomicUsize::new(0),
            texts: AtomicUsize::new(0),
        }
    }

    /// Sleep this long in every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail permanently on any batch containing `marker`.
    pub fn failing_on(mut self, marker: impl Into<String>) -> Self {
        self.poison = Some(marker.into());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Texts embedded successfully.
    pub fn texts_embedded(&self) -> usize {
        self.texts.load(Ordering::SeqCst)
    }

    /// Clear both counters.
    pub fn reset(&self) {
        self.calls.store(0, Ordering::SeqCst);
        self.texts.store(0, Ordering::SeqCst);
    }
}

impl Default for ScriptedEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingProvider for ScriptedEmbedder {
    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(marker) = &self.poison {
            if texts.iter().any(|t| t.contains(marker.as_str())) {
                return Err(EmbeddingError::Fatal(format!("refused input {}", marker)));
            }
        }
        let embeddings = self.inner.embed(texts).await?;
        self.texts.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(embeddings)
    }

    async fn health_check(&self) -> Result<(), EmbeddingError> {
        Ok(())
    }
}

/// In-memory index that records writes and can slow down or refuse them.
pub struct RecordingIndex {
    pub inner: MemoryIndex,
    upsert_delay: Option<Duration>,
    refuse_upserts_with: Mutex<Option<String>>,
    refuse_deletes: AtomicBool,
    upserts: AtomicUsize,
    points_written: AtomicUsize,
    deleted: Mutex<Vec<String>>,
    enumerated: Option<Arc<AtomicUsize>>,
    max_backlog: AtomicUsize,
}

impl RecordingIndex {
    pub fn new() -> Self {
        Self {
            inner: MemoryIndex::new(),
            upsert_delay: None,
            refuse_upserts_with: Mutex::new(None),
            refuse_deletes: AtomicBool::new(false),
            upserts: AtomicUsize::new(0),
            points_written: AtomicUsize::new(0),
            deleted: Mutex::new(Vec::new()),
            enumerated: None,
            max_backlog: AtomicUsize::new(0),
        }
    }

    pub fn with_upsert_delay(mut self, delay: Duration) -> Self {
        self.upsert_delay = Some(delay);
        self
    }

    /// Track how far ahead of publication `counter` (items pulled from a
    /// [`CountingSource`]) gets, assuming one point per document.
    pub fn with_pull_counter(mut self, counter: Arc<AtomicUsize>) -> Self {
        self.enumerated = Some(counter);
        self
    }

    /// Reject every upsert carrying a point whose content contains `marker`.
    /// Nothing of a rejected upsert is written.
    pub fn refuse_upserts_containing(&self, marker: &str) {
        if let Ok(mut refuse) = self.refuse_upserts_with.lock() {
            *refuse = Some(marker.to_string());
        }
    }

    /// Reject every delete while `refuse` is set.
    pub fn refuse_deletes(&self, refuse: bool) {
        self.refuse_deletes.store(refuse, Ordering::SeqCst);
    }

    pub fn accept_all(&self) {
        if let Ok(mut refuse) = self.refuse_upserts_with.lock() {
            *refuse = None;
        }
        self.refuse_deletes(false);
    }

    pub fn upserts(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    pub fn points_written(&self) -> usize {
        self.points_written.load(Ordering::SeqCst)
    }

    /// Ids passed to accepted `delete` calls, in call order.
    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().map(|d| d.clone()).unwrap_or_default()
    }

    /// Largest observed gap between enumerated and published documents.
    pub fn max_backlog(&self) -> usize {
        self.max_backlog.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.upserts.store(0, Ordering::SeqCst);
        self.points_written.store(0, Ordering::SeqCst);
        if let Ok(mut deleted) = self.deleted.lock() {
            deleted.clear();
        }
    }
}

impl Default for RecordingIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorIndex for RecordingIndex {
    async fn ensure_index(&self, name: &str, dimension: usize) -> Result<(), VectorError> {
        self.inner.ensure_index(name, dimension).await
    }

    async fn upsert(&self, name: &str, points: Vec<IndexPoint>) -> Result<(), VectorError> {
        if let Some(counter) = &self.enumerated {
            let backlog = counter
                .load(Ordering::SeqCst)
                .saturating_sub(self.points_written.load(Ordering::SeqCst));
            self.max_backlog.fetch_max(backlog, Ordering::SeqCst);
        }
        if let Some(delay) = self.upsert_delay {
            tokio::time::sleep(delay).await;
        }
        let refused = self
            .refuse_upserts_with
            .lock()
            .map(|marker| marker.clone())
            .unwrap_or_default();
        if let Some(marker) = refused {
            let hit = points.iter().any(|p| {
                p.payload_str(fields::CONTENT)
                    .is_some_and(|content| content.contains(marker.as_str()))
            });
            if hit {
                return Err(VectorError::Index(format!("write refused: {}", marker)));
            }
        }
        let count = points.len();
        self.inner.upsert(name, points).await?;
        self.upserts.fetch_add(1, Ordering::SeqCst);
        self.points_written.fetch_add(count, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, name: &str, ids: &[String]) -> Result<usize, VectorError> {
        if self.refuse_deletes.load(Ordering::SeqCst) {
            return Err(VectorError::Index("delete refused".to_string()));
        }
        if let Ok(mut deleted) = self.deleted.lock() {
            deleted.extend(ids.iter().cloned());
        }
        self.inner.delete(name, ids).await
    }

    async fn query(
        &self,
        name: &str,
        vector: &[f32],
        filter: &PayloadFilter,
        limit: usize,
    ) -> Result<Vec<ScoredPoint>, VectorError> {
        self.inner.query(name, vector, filter, limit).await
    }

    async fn count(&self, name: &str, filter: &PayloadFilter) -> Result<usize, VectorError> {
        self.inner.count(name, filter).await
    }

    async fn get(&self, name: &str, id: &str) -> Result<Option<IndexPoint>, VectorError> {
        self.inner.get(name, id).await
    }
}

/// Source that counts how many items have been pulled from it.
pub struct CountingSource {
    inner: StaticSource,
    pulled: Arc<AtomicUsize>,
}

impl CountingSource {
    pub fn new(inner: StaticSource) -> Self {
        Self {
            inner,
            pulled: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn counter(&self) -> Arc<AtomicUsize> {
        self.pulled.clone()
    }
}

impl DocumentSource for CountingSource {
    fn source_type(&self) -> &str {
        self.inner.source_type()
    }

    fn source_name(&self) -> &str {
        self.inner.source_name()
    }

    fn items(&self) -> BoxStream<'_, Result<SourceItem, SourceError>> {
        let pulled = self.pulled.clone();
        self.inner
            .items()
            .inspect(move |_| {
                pulled.fetch_add(1, Ordering::SeqCst);
            })
            .boxed()
    }
}

/// Tenant of a point.
pub fn point_tenant(point: &IndexPoint) -> Option<&str> {
    point.payload_str(fields::TENANT_ID)
}
