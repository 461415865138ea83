//! Fragmentation stage.

use std::sync::Arc;
use std::time::Instant;

use ingest_fragment::{FragmentOptions, FragmenterRegistry};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::monitor::Stage;
use crate::stages::{
    recv_shared, DocumentHandle, DocumentJob, FragmentJob, ReadyDocument, SharedReceiver,
    StageContext,
};
use crate::tracker::DocumentPhase;

/// Fragment documents with their tenant's sizing and fan the fragments out.
///
/// Documents without fragments skip vectorization and go straight to the
/// publish-ready queue so their old points still get removed.
pub(crate) async fn fragment_worker(
    worker_id: usize,
    rx: SharedReceiver<DocumentJob>,
    fragment_tx: mpsc::Sender<FragmentJob>,
    ready_tx: mpsc::Sender<ReadyDocument>,
    registry: Arc<FragmenterRegistry>,
    ctx: StageContext,
) {
    let stats = ctx.monitor.stage(Stage::Fragment);
    let mut processed = 0usize;

    while let Some(job) = recv_shared(&rx).await {
        let key = job.document.key();
        if !ctx.tracker.advance(&key, DocumentPhase::Fragmenting) {
            continue;
        }

        let started = Instant::now();
        let options = FragmentOptions::from(&job.tenant.overrides);
        let fragments = match registry.fragment(&job.document, &options) {
            Ok(fragments) => {
                stats.record_batch(1, 0, started.elapsed());
                fragments
            }
            Err(e) => {
                stats.record_batch(0, 1, started.elapsed());
                ctx.tracker.fail(&key, &format!("fragmentation: {}", e));
                continue;
            }
        };
        processed += 1;

        let handle = Arc::new(DocumentHandle {
            key,
            fingerprint: job.document.content_fingerprint,
            index_name: job.tenant.index_name.clone(),
            fragment_count: fragments.len(),
        });
        debug!(worker_id, key = %handle.key, fragments = handle.fragment_count, "Fragmented");

        if fragments.is_empty() {
            ctx.tracker.advance(&handle.key, DocumentPhase::Publishing);
            let ready = ReadyDocument {
                doc: handle.clone(),
                fragments: Vec::new(),
            };
            if ready_tx.send(ready).await.is_err() {
                ctx.tracker.fail(&handle.key, "publication stage stopped");
            }
            continue;
        }

        ctx.tracker.advance(&handle.key, DocumentPhase::Vectorizing);
        for fragment in fragments {
            let job = FragmentJob {
                doc: handle.clone(),
                fragment,
            };
            if fragment_tx.send(job).await.is_err() {
                ctx.tracker.fail(&handle.key, "vectorization stage stopped");
                break;
            }
        }
    }

    info!(worker_id, processed, "Fragment worker finished");
}
