//! Run orchestration.
//!
//! The orchestrator wires the stages together for one run:
//! 1. Pre-flight: provider health check and index creation. Failures here
//!    abort the run before anything is written.
//! 2. Spawn every stage and feed the intake with the configured sources.
//! 3. Wait for the stages to drain. Cancellation (external or run deadline)
//!    stops the intake; in-flight work gets `drain_timeout` before the
//!    remaining tasks are aborted.
//! 4. Fail every unfinished document, close the run and append it to the
//!    run ledger.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use ingest_embeddings::EmbeddingProvider;
use ingest_fragment::FragmenterRegistry;
use ingest_storage::ChangeDetectionStore;
use ingest_types::{is_scope_segment, IngestionRun, SCOPE_SEPARATOR};
use ingest_vector::VectorIndex;
use serde::Serialize;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::PipelineConfig;
use crate::convert::{Preprocessor, Utf8Preprocessor};
use crate::error::PipelineError;
use crate::monitor::{MonitorSnapshot, RunMonitor};
use crate::source::DocumentSource;
use crate::stages::assemble::assembler;
use crate::stages::fragment::fragment_worker;
use crate::stages::intake::Intake;
use crate::stages::publish::{publish_worker, Publisher};
use crate::stages::vectorize::{batcher, embed_worker, BatchLimits, EmbedBatch, Embedder};
use crate::stages::{shared, DocumentJob, FragmentJob, ReadyDocument, StageContext, VectorJob};
use crate::tenants::TenantRegistry;
use crate::tracker::{RunTracker, CANCELLED};

/// A document source bound to the tenant it belongs to.
#[derive(Clone)]
pub struct TenantSource {
    pub tenant_id: String,
    pub source: Arc<dyn DocumentSource>,
}

impl TenantSource {
    pub fn new(tenant_id: impl Into<String>, source: impl DocumentSource + 'static) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            source: Arc::new(source),
        }
    }

    pub fn shared(tenant_id: impl Into<String>, source: Arc<dyn DocumentSource>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            source,
        }
    }
}

/// Closed run summary plus the stage counters of the run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run: IngestionRun,
    pub monitor: MonitorSnapshot,
}

/// Coordinates one ingestion run at a time.
pub struct Orchestrator {
    tenants: Arc<TenantRegistry>,
    store: Arc<ChangeDetectionStore>,
    provider: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    fragmenters: Arc<FragmenterRegistry>,
    preprocessor: Arc<dyn Preprocessor>,
    config: PipelineConfig,
}

impl Orchestrator {
    pub fn new(
        tenants: TenantRegistry,
        store: Arc<ChangeDetectionStore>,
        provider: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            tenants: Arc::new(tenants),
            store,
            provider,
            index,
            fragmenters: Arc::new(FragmenterRegistry::with_defaults()),
            preprocessor: Arc::new(Utf8Preprocessor::new()),
            config,
        }
    }

    /// Replace the default fragmenter registry.
    pub fn with_fragmenters(mut self, fragmenters: FragmenterRegistry) -> Self {
        self.fragmenters = Arc::new(fragmenters);
        self
    }

    /// Replace the default UTF-8 preprocessor.
    pub fn with_preprocessor(mut self, preprocessor: impl Preprocessor + 'static) -> Self {
        self.preprocessor = Arc::new(preprocessor);
        self
    }

    pub fn tenants(&self) -> &TenantRegistry {
        &self.tenants
    }

    pub fn store(&self) -> &Arc<ChangeDetectionStore> {
        &self.store
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Check the provider and make sure every tenant's index exists with the
    /// provider's dimension.
    pub async fn preflight(&self) -> Result<(), PipelineError> {
        let timeout = self.config.embed_timeout;
        match tokio::time::timeout(timeout, self.provider.health_check()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(PipelineError::Connectivity(format!(
                    "embedding provider {}: {}",
                    self.provider.model_id(),
                    e
                )))
            }
            Err(_) => {
                return Err(PipelineError::Connectivity(format!(
                    "embedding provider {}: health check timed out",
                    self.provider.model_id()
                )))
            }
        }

        self.index
            .health_check()
            .await
            .map_err(|e| PipelineError::Connectivity(format!("vector index: {}", e)))?;

        let dimension = self.provider.dimension();
        for name in self.tenants.index_names() {
            self.index
                .ensure_index(&name, dimension)
                .await
                .map_err(|e| PipelineError::Connectivity(format!("index {}: {}", name, e)))?;
        }

        info!(
            model = self.provider.model_id(),
            dimension,
            "Pre-flight checks passed"
        );
        Ok(())
    }

    /// Execute one run over `sources`.
    ///
    /// Only configuration and pre-flight failures are returned as errors;
    /// per-document failures end up in the returned run summary.
    pub async fn run(
        &self,
        sources: Vec<TenantSource>,
        cancel: CancellationToken,
    ) -> Result<RunReport, PipelineError> {
        self.config.validate()?;

        let mut tenant_ids: Vec<String> = Vec::new();
        for source in &sources {
            self.tenants.get(&source.tenant_id)?;
            let source_type = source.source.source_type();
            let source_name = source.source.source_name();
            if !is_scope_segment(source_type) || !is_scope_segment(source_name) {
                return Err(PipelineError::Config(format!(
                    "source {}/{} of tenant {}: type and name must be non-empty and free of '{}'",
                    source_type, source_name, source.tenant_id, SCOPE_SEPARATOR
                )));
            }
            if !tenant_ids.contains(&source.tenant_id) {
                tenant_ids.push(source.tenant_id.clone());
            }
        }

        self.preflight().await?;

        let mut run = IngestionRun::new(tenant_ids);
        info!(run_id = %run.run_id, sources = sources.len(), "Starting ingestion run");

        let run_cancel = cancel.child_token();
        let tracker = Arc::new(RunTracker::new(self.store.clone()));
        let monitor = Arc::new(RunMonitor::new());
        let ctx = StageContext {
            tracker: tracker.clone(),
            monitor: monitor.clone(),
            cancel: run_cancel.clone(),
        };
        let config = &self.config;

        let (doc_tx, doc_rx) = mpsc::channel::<DocumentJob>(config.document_queue_capacity);
        let (frag_tx, frag_rx) = mpsc::channel::<FragmentJob>(config.fragment_queue_capacity);
        let (batch_tx, batch_rx) = mpsc::channel::<EmbedBatch>(config.embed_workers.max(1));
        let (vec_tx, vec_rx) = mpsc::channel::<VectorJob>(config.vector_queue_capacity);
        let (ready_tx, ready_rx) = mpsc::channel::<ReadyDocument>(config.publish_queue_capacity);

        let mut handles = Vec::new();

        // Fragmentation
        let doc_rx = shared(doc_rx);
        for worker_id in 0..config.fragment_workers {
            handles.push(tokio::spawn(fragment_worker(
                worker_id,
                doc_rx.clone(),
                frag_tx.clone(),
                ready_tx.clone(),
                self.fragmenters.clone(),
                ctx.clone(),
            )));
        }
        drop(frag_tx);

        // Vectorization
        let limits = BatchLimits {
            max_size: config.embed_batch_size,
            max_bytes: config.embed_batch_bytes,
            linger: config.batch_linger,
        };
        handles.push(tokio::spawn(batcher(
            frag_rx,
            batch_tx,
            limits,
            tracker.clone(),
        )));

        let embedder = Arc::new(Embedder {
            provider: self.provider.clone(),
            in_flight: Arc::new(Semaphore::new(config.max_in_flight)),
            policy: config.embed_retry(),
        });
        let batch_rx = shared(batch_rx);
        for worker_id in 0..config.embed_workers {
            handles.push(tokio::spawn(embed_worker(
                worker_id,
                batch_rx.clone(),
                vec_tx.clone(),
                embedder.clone(),
                ctx.clone(),
            )));
        }
        drop(vec_tx);

        // Assembly
        handles.push(tokio::spawn(assembler(
            vec_rx,
            ready_tx,
            tracker.clone(),
            run_cancel.clone(),
        )));

        // Publication
        let publisher = Arc::new(Publisher {
            index: self.index.clone(),
            store: self.store.clone(),
            policy: config.publish_retry(),
            max_points: config.publish_batch_points,
        });
        let ready_rx = shared(ready_rx);
        for worker_id in 0..config.publish_workers {
            handles.push(tokio::spawn(publish_worker(
                worker_id,
                ready_rx.clone(),
                publisher.clone(),
                ctx.clone(),
            )));
        }

        // Intake last, so every consumer is ready
        let intake = Intake {
            tenants: self.tenants.clone(),
            store: self.store.clone(),
            index: self.index.clone(),
            preprocessor: self.preprocessor.clone(),
            policy: config.publish_retry(),
            tombstone_removed: config.tombstone_removed,
            ctx: ctx.clone(),
        };
        handles.push(tokio::spawn(intake.run(sources, doc_tx)));

        let deadline_task = config.run_deadline.map(|deadline| {
            let token = run_cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(deadline) => {
                        warn!(deadline_secs = deadline.as_secs(), "Run deadline reached, cancelling");
                        token.cancel();
                    }
                    _ = token.cancelled() => {}
                }
            })
        });

        let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();
        let mut all = Box::pin(join_all(handles));
        let results = tokio::select! {
            results = &mut all => results,
            _ = drain_window(&run_cancel, config.drain_timeout) => {
                warn!(
                    drain_timeout_ms = config.drain_timeout.as_millis() as u64,
                    "Drain timeout reached, aborting stages"
                );
                for abort in &aborts {
                    abort.abort();
                }
                all.await
            }
        };
        let was_cancelled = run_cancel.is_cancelled();
        if let Some(task) = deadline_task {
            task.abort();
        }

        for result in results {
            if let Err(e) = result {
                if e.is_panic() {
                    error!(error = %e, "Stage task panicked");
                }
            }
        }

        let reason = if was_cancelled {
            CANCELLED
        } else {
            "incomplete: pipeline stopped before completion"
        };
        let unfinished = tracker.unfinished();
        if !unfinished.is_empty() {
            warn!(count = unfinished.len(), reason, "Failing unfinished documents");
        }
        for key in unfinished {
            tracker.fail(&key, reason);
        }

        tracker.apply_to(&mut run);
        run.cancelled = was_cancelled;
        run.close();

        if let Err(e) = self.store.storage().append_run(&run) {
            error!(run_id = %run.run_id, error = %e, "Failed to append run to ledger");
        }

        let snapshot = monitor.snapshot();
        info!(
            run_id = %run.run_id,
            status = %run.status,
            seen = run.documents_seen,
            skipped = run.documents_skipped,
            indexed = run.documents_indexed,
            failed = run.documents_failed,
            removed = run.documents_removed,
            cancelled = run.cancelled,
            duration_ms = run.duration_ms().unwrap_or_default(),
            "Ingestion run finished"
        );
        info!(stages = ?snapshot, "Stage counters");

        Ok(RunReport {
            run,
            monitor: snapshot,
        })
    }
}

/// Resolves `drain_timeout` after the token is cancelled.
async fn drain_window(token: &CancellationToken, drain_timeout: Duration) {
    token.cancelled().await;
    tokio::time::sleep(drain_timeout).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use ingest_embeddings::{Embedding, EmbeddingError, HashEmbedder};
    use ingest_storage::Storage;
    use ingest_types::{DocumentStatus, RunStatus, Settings, TenantSettings};
    use ingest_vector::{MemoryIndex, PayloadFilter};
    use tempfile::TempDir;

    use crate::source::StaticSource;

    struct Fixture {
        store: Arc<ChangeDetectionStore>,
        index: Arc<MemoryIndex>,
        _temp: TempDir,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let storage = Arc::new(Storage::open(temp.path()).unwrap());
        Fixture {
            store: Arc::new(ChangeDetectionStore::new(storage)),
            index: Arc::new(MemoryIndex::new()),
            _temp: temp,
        }
    }

    fn registry() -> TenantRegistry {
        let settings = Settings {
            tenants: vec![TenantSettings::new("t1")],
            ..Default::default()
        };
        TenantRegistry::resolve(&settings).unwrap()
    }

    fn config() -> PipelineConfig {
        PipelineConfig::default()
            .with_batch_linger(Duration::from_millis(1))
            .with_retries(1, Duration::from_millis(1))
    }

    fn orchestrator(f: &Fixture, provider: Arc<dyn EmbeddingProvider>) -> Orchestrator {
        Orchestrator::new(registry(), f.store.clone(), provider, f.index.clone(), config())
    }

    fn source() -> TenantSource {
        TenantSource::new(
            "t1",
            StaticSource::new("static", "notes")
                .with_text("A", "alpha beta gamma")
                .with_text("B", "delta epsilon"),
        )
    }

    struct Unreachable;

    #[async_trait]
    impl EmbeddingProvider for Unreachable {
        fn model_id(&self) -> &str {
            "unreachable"
        }
        fn dimension(&self) -> usize {
            8
        }
        async fn embed(&self, _texts: &[String]) -> Result<Vec<Embedding>, EmbeddingError> {
            Err(EmbeddingError::Transient("connection refused".into()))
        }
    }

    struct FailOnce {
        inner: HashEmbedder,
        failed: AtomicBool,
    }

    #[async_trait]
    impl EmbeddingProvider for FailOnce {
        fn model_id(&self) -> &str {
            self.inner.model_id()
        }
        fn dimension(&self) -> usize {
            self.inner.dimension()
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>, EmbeddingError> {
            if texts.len() > 1 || self.failed.swap(true, Ordering::SeqCst) {
                self.inner.embed(texts).await
            } else {
                Err(EmbeddingError::RateLimited)
            }
        }
        async fn health_check(&self) -> Result<(), EmbeddingError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_run_indexes_then_skips() {
        let f = fixture();
        let orch = orchestrator(&f, Arc::new(HashEmbedder::new(8).unwrap()));

        let first = orch
            .run(vec![source()], CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(first.run.status, RunStatus::Success);
        assert_eq!(first.run.documents_seen, 2);
        assert_eq!(first.run.documents_indexed, 2);
        assert_eq!(first.monitor.publish.items_ok, 2);
        assert_eq!(
            f.index
                .count("documents", &PayloadFilter::tenant("t1"))
                .await
                .unwrap(),
            2
        );

        let second = orch
            .run(vec![source()], CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(second.run.documents_skipped, 2);
        assert_eq!(second.run.documents_indexed, 0);

        let runs = f.store.storage().list_runs(10).unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].run_id, second.run.run_id);
    }

    #[tokio::test]
    async fn test_preflight_failure_is_fatal() {
        let f = fixture();
        let orch = orchestrator(&f, Arc::new(Unreachable));

        let result = orch.run(vec![source()], CancellationToken::new()).await;
        assert!(matches!(result, Err(PipelineError::Connectivity(_))));
        assert!(f.store.storage().list_runs(10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_config_is_fatal() {
        let f = fixture();
        let orch = Orchestrator::new(
            registry(),
            f.store.clone(),
            Arc::new(HashEmbedder::new(8).unwrap()),
            f.index.clone(),
            config().with_queue_capacity(0),
        );

        let result = orch.run(vec![source()], CancellationToken::new()).await;
        assert!(matches!(result, Err(PipelineError::Config(_))));
        assert!(f.store.storage().list_runs(10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_source_name_with_separator_is_rejected() {
        let f = fixture();
        let orch = orchestrator(&f, Arc::new(HashEmbedder::new(8).unwrap()));
        let bad = TenantSource::new(
            "t1",
            StaticSource::new("static", "team/notes").with_text("A", "alpha"),
        );

        let result = orch.run(vec![bad], CancellationToken::new()).await;
        assert!(matches!(result, Err(PipelineError::Config(_))));
        assert!(f.index.points("documents").unwrap_or_default().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_tenant_is_rejected() {
        let f = fixture();
        let orch = orchestrator(&f, Arc::new(HashEmbedder::new(8).unwrap()));
        let bad = TenantSource::new("t9", StaticSource::new("static", "notes"));

        let result = orch.run(vec![bad], CancellationToken::new()).await;
        assert!(matches!(result, Err(PipelineError::TenantNotFound(_))));
    }

    #[tokio::test]
    async fn test_transient_embedding_error_is_retried() {
        let f = fixture();
        let provider = Arc::new(FailOnce {
            inner: HashEmbedder::new(8).unwrap(),
            failed: AtomicBool::new(false),
        });
        let orch = orchestrator(&f, provider);
        let single = TenantSource::new(
            "t1",
            StaticSource::new("static", "notes").with_text("A", "alpha"),
        );

        let report = orch.run(vec![single], CancellationToken::new()).await.unwrap();
        assert_eq!(report.run.documents_indexed, 1);
        assert_eq!(report.monitor.vectorize.retries, 1);
    }

    #[tokio::test]
    async fn test_empty_document_removes_old_points() {
        let f = fixture();
        let orch = orchestrator(&f, Arc::new(HashEmbedder::new(8).unwrap()));

        orch.run(vec![source()], CancellationToken::new())
            .await
            .unwrap();
        let emptied = TenantSource::new(
            "t1",
            StaticSource::new("static", "notes")
                .with_text("A", "   ")
                .with_text("B", "delta epsilon"),
        );
        let report = orch
            .run(vec![emptied], CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.run.documents_indexed, 1);
        let key = ingest_types::DocumentKey::new("t1", "static", "notes", "A");
        let state = f.store.get(&key).unwrap().unwrap();
        assert_eq!(state.status, DocumentStatus::Indexed);
        assert!(state.fragment_ids.is_empty());
        assert!(f
            .index
            .get("documents", "t1/static/notes/A#0")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_pre_cancelled_run_records_nothing_indexed() {
        let f = fixture();
        let orch = orchestrator(&f, Arc::new(HashEmbedder::new(8).unwrap()));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = orch.run(vec![source()], cancel).await.unwrap();
        assert!(report.run.cancelled);
        assert_eq!(report.run.status, RunStatus::PartialSuccess);
        assert_eq!(report.run.documents_indexed, 0);
    }
}
