//! Document assembly.
//!
//! Vectorized fragments arrive in any order and interleaved across
//! documents. A document is released to publication only once all of its
//! fragments are present, sorted by `sequence_index`.

use std::collections::HashMap;
use std::sync::Arc;

use ingest_types::DocumentKey;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::stages::{ReadyDocument, VectorJob};
use crate::tracker::{DocumentPhase, RunTracker, CANCELLED};

pub(crate) async fn assembler(
    mut rx: mpsc::Receiver<VectorJob>,
    tx: mpsc::Sender<ReadyDocument>,
    tracker: Arc<RunTracker>,
    cancel: CancellationToken,
) {
    let mut pending: HashMap<DocumentKey, ReadyDocument> = HashMap::new();
    let mut released = 0usize;

    while let Some(job) = rx.recv().await {
        let key = job.doc.key.clone();
        if tracker.is_failed(&key) {
            pending.remove(&key);
            continue;
        }

        let entry = pending.entry(key.clone()).or_insert_with(|| ReadyDocument {
            doc: job.doc.clone(),
            fragments: Vec::with_capacity(job.doc.fragment_count),
        });
        entry.fragments.push(job.fragment);
        if entry.fragments.len() < entry.doc.fragment_count {
            continue;
        }

        let Some(mut ready) = pending.remove(&key) else {
            continue;
        };
        ready
            .fragments
            .sort_by_key(|f| f.fragment.sequence_index);
        if !tracker.advance(&key, DocumentPhase::Publishing) {
            continue;
        }
        released += 1;
        if tx.send(ready).await.is_err() {
            tracker.fail(&key, "publication stage stopped");
        }
    }

    let reason = if cancel.is_cancelled() {
        CANCELLED
    } else {
        "incomplete: fragments missing after vectorization"
    };
    for key in pending.into_keys() {
        if !tracker.is_failed(&key) {
            warn!(key = %key, "Document left incomplete");
            tracker.fail(&key, reason);
        }
    }
    info!(released, "Assembler finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use ingest_storage::{ChangeDetectionStore, Storage};
    use ingest_types::{Document, Fragment, VectorizedFragment};
    use tempfile::TempDir;

    use crate::stages::DocumentHandle;

    fn handle(doc: &Document, count: usize) -> Arc<DocumentHandle> {
        Arc::new(DocumentHandle {
            key: doc.key(),
            fingerprint: doc.content_fingerprint.clone(),
            index_name: "documents".to_string(),
            fragment_count: count,
        })
    }

    fn vjob(doc: &Document, handle: &Arc<DocumentHandle>, seq: u32) -> VectorJob {
        let fragment = Fragment::new(doc, seq, format!("part {}", seq), BTreeMap::new());
        VectorJob {
            doc: handle.clone(),
            fragment: VectorizedFragment::new(fragment, vec![1.0], "m"),
        }
    }

    #[tokio::test]
    async fn test_releases_complete_documents_in_order() {
        let temp_dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::open(temp_dir.path()).unwrap());
        let tracker = Arc::new(RunTracker::new(Arc::new(ChangeDetectionStore::new(storage))));

        let mut a = Document::new("A", "fs", "docs", "a");
        a.tenant_id = "t1".into();
        let mut b = Document::new("B", "fs", "docs", "b");
        b.tenant_id = "t1".into();
        let ha = handle(&a, 3);
        let hb = handle(&b, 2);
        for key in [&ha.key, &hb.key] {
            tracker.observe(key);
            tracker.advance(key, DocumentPhase::Fragmenting);
            tracker.advance(key, DocumentPhase::Vectorizing);
        }

        let (in_tx, in_rx) = mpsc::channel(16);
        let (out_tx, mut out_rx) = mpsc::channel(16);
        let task = tokio::spawn(assembler(
            in_rx,
            out_tx,
            tracker.clone(),
            CancellationToken::new(),
        ));

        in_tx.send(vjob(&a, &ha, 2)).await.unwrap();
        in_tx.send(vjob(&b, &hb, 1)).await.unwrap();
        in_tx.send(vjob(&a, &ha, 0)).await.unwrap();
        in_tx.send(vjob(&b, &hb, 0)).await.unwrap();
        drop(in_tx);
        task.await.unwrap();

        let first = out_rx.recv().await.unwrap();
        assert_eq!(first.doc.key.document_id, "B");
        let seqs: Vec<u32> = first
            .fragments
            .iter()
            .map(|f| f.fragment.sequence_index)
            .collect();
        assert_eq!(seqs, vec![0, 1]);
        assert!(out_rx.recv().await.is_none());

        // A never received fragment 1
        assert!(tracker.is_failed(&ha.key));
        assert_eq!(tracker.phase(&hb.key), Some(DocumentPhase::Publishing));
    }
}
