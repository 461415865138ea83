//! Vectorization stage.
//!
//! A single batcher groups fragments into embedding batches bounded by
//! count and bytes, waiting at most `linger` for a partial batch to fill.
//! Embed workers take whole batches; a semaphore bounds provider calls in
//! flight independently of the worker count.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ingest_embeddings::{Embedding, EmbeddingError, EmbeddingProvider};
use ingest_types::{DocumentKey, VectorizedFragment};
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};

use crate::monitor::Stage;
use crate::retry::RetryPolicy;
use crate::stages::{recv_shared, FragmentJob, SharedReceiver, StageContext, VectorJob};
use crate::tracker::RunTracker;

/// Limits of one embedding batch.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BatchLimits {
    pub max_size: usize,
    pub max_bytes: usize,
    pub linger: Duration,
}

/// Fragments sent to the provider in one call.
#[derive(Default)]
pub(crate) struct EmbedBatch {
    pub jobs: Vec<FragmentJob>,
    pub bytes: usize,
}

impl EmbedBatch {
    fn push(&mut self, job: FragmentJob) {
        self.bytes += job.byte_len();
        self.jobs.push(job);
    }

    fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    fn len(&self) -> usize {
        self.jobs.len()
    }
}

/// Group fragments into batches.
///
/// A fragment that would push a non-empty batch over the byte budget is
/// carried into the next batch. Fragments of documents that already failed
/// are dropped.
pub(crate) async fn batcher(
    mut rx: mpsc::Receiver<FragmentJob>,
    tx: mpsc::Sender<EmbedBatch>,
    limits: BatchLimits,
    tracker: Arc<RunTracker>,
) {
    let mut batch = EmbedBatch::default();
    let mut deadline = tokio::time::Instant::now();
    let mut batches_sent = 0usize;

    loop {
        let next = if batch.is_empty() {
            rx.recv().await
        } else {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(next) => next,
                Err(_) => {
                    // Linger expired
                    batches_sent += 1;
                    if !forward(&tx, std::mem::take(&mut batch), &tracker).await {
                        break;
                    }
                    continue;
                }
            }
        };

        let Some(job) = next else {
            break;
        };
        if tracker.is_failed(&job.doc.key) {
            continue;
        }

        if !batch.is_empty() && batch.bytes + job.byte_len() > limits.max_bytes {
            batches_sent += 1;
            if !forward(&tx, std::mem::take(&mut batch), &tracker).await {
                break;
            }
        }
        if batch.is_empty() {
            deadline = tokio::time::Instant::now() + limits.linger;
        }
        batch.push(job);

        if batch.len() >= limits.max_size || batch.bytes >= limits.max_bytes {
            batches_sent += 1;
            if !forward(&tx, std::mem::take(&mut batch), &tracker).await {
                break;
            }
        }
    }

    if !batch.is_empty() {
        batches_sent += 1;
        forward(&tx, batch, &tracker).await;
    }
    info!(batches_sent, "Batcher finished");
}

/// Hand a batch to the embed workers. If they are gone, every document in
/// the batch fails.
async fn forward(tx: &mpsc::Sender<EmbedBatch>, batch: EmbedBatch, tracker: &RunTracker) -> bool {
    match tx.send(batch).await {
        Ok(()) => true,
        Err(mpsc::error::SendError(batch)) => {
            let keys: BTreeSet<&DocumentKey> = batch.jobs.iter().map(|j| &j.doc.key).collect();
            for key in keys {
                tracker.fail(key, "vectorization stage stopped");
            }
            false
        }
    }
}

/// Provider access shared by all embed workers.
pub(crate) struct Embedder {
    pub provider: Arc<dyn EmbeddingProvider>,
    pub in_flight: Arc<Semaphore>,
    pub policy: RetryPolicy,
}

/// Check a provider response against the batch it answers.
pub(crate) fn validate_embeddings(
    embeddings: Vec<Embedding>,
    expected_count: usize,
    dimension: usize,
) -> Result<Vec<Embedding>, EmbeddingError> {
    if embeddings.len() != expected_count {
        return Err(EmbeddingError::InvalidResponse(format!(
            "expected {} vectors, got {}",
            expected_count,
            embeddings.len()
        )));
    }
    if let Some(bad) = embeddings.iter().find(|e| e.dimension() != dimension) {
        return Err(EmbeddingError::DimensionMismatch {
            expected: dimension,
            actual: bad.dimension(),
        });
    }
    Ok(embeddings)
}

pub(crate) async fn embed_worker(
    worker_id: usize,
    rx: SharedReceiver<EmbedBatch>,
    tx: mpsc::Sender<VectorJob>,
    embedder: Arc<Embedder>,
    ctx: StageContext,
) {
    let stats = ctx.monitor.stage(Stage::Vectorize);
    let model_id = embedder.provider.model_id().to_string();
    let dimension = embedder.provider.dimension();

    while let Some(batch) = recv_shared(&rx).await {
        let jobs: Vec<FragmentJob> = batch
            .jobs
            .into_iter()
            .filter(|job| !ctx.tracker.is_failed(&job.doc.key))
            .collect();
        if jobs.is_empty() {
            continue;
        }

        let texts: Vec<String> = jobs.iter().map(|j| j.fragment.content.clone()).collect();
        let started = Instant::now();

        let result = {
            let Ok(_permit) = embedder.in_flight.acquire().await else {
                break;
            };
            embedder
                .policy
                .call("embed", stats, &ctx.cancel, || embedder.provider.embed(&texts))
                .await
        };
        let result = result.and_then(|e| validate_embeddings(e, jobs.len(), dimension));

        match result {
            Ok(embeddings) => {
                stats.record_batch(jobs.len() as u64, 0, started.elapsed());
                debug!(worker_id, count = jobs.len(), "Embedded batch");
                for (job, embedding) in jobs.into_iter().zip(embeddings) {
                    let vectorized = VectorizedFragment::new(
                        job.fragment,
                        embedding.into_values(),
                        model_id.clone(),
                    );
                    let out = VectorJob {
                        doc: job.doc,
                        fragment: vectorized,
                    };
                    if let Err(e) = tx.send(out).await {
                        ctx.tracker.fail(&e.0.doc.key, "assembly stage stopped");
                    }
                }
            }
            Err(e) => {
                stats.record_batch(0, jobs.len() as u64, started.elapsed());
                let reason = format!("vectorization: {}", e);
                let keys: BTreeSet<&DocumentKey> = jobs.iter().map(|j| &j.doc.key).collect();
                warn!(worker_id, fragments = jobs.len(), documents = keys.len(), error = %e, "Embedding batch failed");
                for key in keys {
                    ctx.tracker.fail(key, &reason);
                }
            }
        }
    }

    info!(worker_id, "Embed worker finished");
}
