//! Publication stage.
//!
//! Publish workers batch ready documents up to a point budget and write each
//! batch with one atomic upsert per physical index. A document's points
//! always travel in a single upsert, so a failed write leaves either all of
//! its new points or none of them in the index. After a successful write
//! every document's stale points (previous id set minus new id set) are
//! deleted and the outcome is recorded in the state store.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use ingest_storage::ChangeDetectionStore;
use ingest_types::DocumentKey;
use ingest_vector::{fields, IndexPoint, VectorIndex};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::monitor::Stage;
use crate::retry::RetryPolicy;
use crate::stages::{recv_shared, DocumentHandle, ReadyDocument, SharedReceiver, StageContext};

/// Build the index points of a ready document.
pub(crate) fn build_points(ready: &ReadyDocument) -> Vec<IndexPoint> {
    let key = &ready.doc.key;
    ready
        .fragments
        .iter()
        .map(|vf| {
            let fragment = &vf.fragment;
            let metadata: serde_json::Map<String, Value> = fragment
                .metadata
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();

            IndexPoint::new(vf.point_id(key), vf.vector.clone())
                .with_payload(fields::TENANT_ID, key.tenant_id.as_str())
                .with_payload(fields::DOCUMENT_ID, key.document_id.as_str())
                .with_payload(fields::SOURCE_TYPE, key.source_type.as_str())
                .with_payload(fields::SOURCE_NAME, key.source_name.as_str())
                .with_payload(fields::FRAGMENT_ID, fragment.fragment_id.as_str())
                .with_payload(fields::SEQUENCE_INDEX, fragment.sequence_index)
                .with_payload(fields::CONTENT, fragment.content.as_str())
                .with_payload(fields::VECTOR_MODEL_ID, vf.vector_model_id.as_str())
                .with_payload(fields::METADATA, Value::Object(metadata))
        })
        .collect()
}

/// Index access shared by all publish workers.
pub(crate) struct Publisher {
    pub index: Arc<dyn VectorIndex>,
    pub store: Arc<ChangeDetectionStore>,
    pub policy: RetryPolicy,
    pub max_points: usize,
}

impl Publisher {
    /// Publish a batch, grouped by physical index.
    async fn publish(&self, batch: Vec<ReadyDocument>, ctx: &StageContext) {
        let mut groups: BTreeMap<String, Vec<ReadyDocument>> = BTreeMap::new();
        for ready in batch {
            groups
                .entry(ready.doc.index_name.clone())
                .or_default()
                .push(ready);
        }
        for (index_name, docs) in groups {
            self.publish_group(&index_name, docs, ctx).await;
        }
    }

    async fn publish_group(&self, index_name: &str, docs: Vec<ReadyDocument>, ctx: &StageContext) {
        for chunk in split_by_points(docs, self.max_points) {
            self.publish_chunk(index_name, chunk, ctx).await;
        }
    }

    /// Write whole documents with one upsert, then clean up stale points.
    async fn publish_chunk(&self, index_name: &str, docs: Vec<ReadyDocument>, ctx: &StageContext) {
        let stats = ctx.monitor.stage(Stage::Publish);
        let started = Instant::now();

        let mut points = Vec::new();
        let mut planned: Vec<(Arc<DocumentHandle>, Vec<String>)> = Vec::with_capacity(docs.len());
        for ready in docs {
            let doc_points = build_points(&ready);
            let ids: Vec<String> = doc_points.iter().map(|p| p.id.clone()).collect();
            ctx.tracker.set_residue(&ready.doc.key, &ids);
            points.extend(doc_points);
            planned.push((ready.doc, ids));
        }

        if !points.is_empty() {
            let written = self
                .policy
                .call("upsert", stats, &ctx.cancel, || {
                    self.index.upsert(index_name, points.clone())
                })
                .await;
            if let Err(e) = written {
                let reason = format!("publication: {}", e);
                warn!(index = index_name, documents = planned.len(), error = %e, "Upsert failed");
                for (doc, ids) in &planned {
                    ctx.tracker.fail_with_residue(&doc.key, &reason, ids);
                }
                stats.record_batch(0, planned.len() as u64, started.elapsed());
                return;
            }
        }

        let mut ok = 0u64;
        let mut failed = 0u64;
        for (doc, ids) in planned {
            match self.remove_stale(index_name, &doc.key, &ids, ctx).await {
                Ok(removed) => {
                    debug!(key = %doc.key, points = ids.len(), removed, "Published document");
                    ctx.tracker.succeed(&doc.key, &doc.fingerprint, ids);
                }
                Err(reason) => ctx.tracker.fail_with_residue(&doc.key, &reason, &ids),
            }
            if ctx.tracker.is_failed(&doc.key) {
                failed += 1;
            } else {
                ok += 1;
            }
        }
        stats.record_batch(ok, failed, started.elapsed());
    }

    /// Delete points of the previous attempt that the new one did not write.
    async fn remove_stale(
        &self,
        index_name: &str,
        key: &DocumentKey,
        new_ids: &[String],
        ctx: &StageContext,
    ) -> Result<usize, String> {
        let previous = self
            .store
            .get(key)
            .map_err(|e| format!("state store: {}", e))?
            .map(|state| state.fragment_ids)
            .unwrap_or_default();

        let keep: HashSet<&String> = new_ids.iter().collect();
        let stale: Vec<String> = previous
            .into_iter()
            .filter(|id| !keep.contains(id))
            .collect();
        if stale.is_empty() {
            return Ok(0);
        }

        let stats = ctx.monitor.stage(Stage::Publish);
        self.policy
            .call("delete", stats, &ctx.cancel, || {
                self.index.delete(index_name, &stale)
            })
            .await
            .map_err(|e| format!("publication: stale point delete failed: {}", e))
    }
}

/// Group documents into upserts of at most `max_points` points.
///
/// A document is never split: one larger than the budget gets an upsert of
/// its own.
pub(crate) fn split_by_points(
    docs: Vec<ReadyDocument>,
    max_points: usize,
) -> Vec<Vec<ReadyDocument>> {
    let mut chunks = Vec::new();
    let mut chunk: Vec<ReadyDocument> = Vec::new();
    let mut chunk_points = 0usize;
    for ready in docs {
        let count = ready.point_count();
        if !chunk.is_empty() && chunk_points + count > max_points {
            chunks.push(std::mem::take(&mut chunk));
            chunk_points = 0;
        }
        chunk_points += count;
        chunk.push(ready);
    }
    if !chunk.is_empty() {
        chunks.push(chunk);
    }
    chunks
}

pub(crate) async fn publish_worker(
    worker_id: usize,
    rx: SharedReceiver<ReadyDocument>,
    publisher: Arc<Publisher>,
    ctx: StageContext,
) {
    let mut carry: Option<ReadyDocument> = None;
    let mut batches = 0usize;

    loop {
        let first = match carry.take() {
            Some(doc) => doc,
            None => match recv_shared(&rx).await {
                Some(doc) => doc,
                None => break,
            },
        };

        let mut points = first.point_count();
        let mut batch = vec![first];
        // Top up without waiting; a busy lock means another worker is idle
        if let Ok(mut guard) = rx.try_lock() {
            while points < publisher.max_points {
                match guard.try_recv() {
                    Ok(doc) if points + doc.point_count() > publisher.max_points => {
                        carry = Some(doc);
                        break;
                    }
                    Ok(doc) => {
                        points += doc.point_count();
                        batch.push(doc);
                    }
                    Err(_) => break,
                }
            }
        }

        batches += 1;
        debug!(worker_id, documents = batch.len(), points, "Publishing batch");
        publisher.publish(batch, &ctx).await;
    }

    info!(worker_id, batches, "Publish worker finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use ingest_types::{meta, Document, Fragment, VectorizedFragment};

    fn ready(document_id: &str, points: u32) -> ReadyDocument {
        let mut doc = Document::new(document_id, "static", "notes", "body");
        doc.tenant_id = "t1".into();
        let fragments = (0..points)
            .map(|i| {
                let fragment = Fragment::new(&doc, i, "body", BTreeMap::new());
                VectorizedFragment::new(fragment, vec![1.0, 0.0], "hashing-v1/2")
            })
            .collect();
        ReadyDocument {
            doc: Arc::new(DocumentHandle {
                key: doc.key(),
                fingerprint: doc.content_fingerprint.clone(),
                index_name: "documents".into(),
                fragment_count: points as usize,
            }),
            fragments,
        }
    }

    fn chunk_sizes(chunks: &[Vec<ReadyDocument>]) -> Vec<Vec<usize>> {
        chunks
            .iter()
            .map(|c| c.iter().map(ReadyDocument::point_count).collect())
            .collect()
    }

    #[test]
    fn test_split_keeps_documents_whole() {
        let chunks = split_by_points(vec![ready("A", 1), ready("B", 1), ready("C", 1)], 2);
        assert_eq!(chunk_sizes(&chunks), vec![vec![1, 1], vec![1]]);
    }

    #[test]
    fn test_oversized_document_gets_its_own_upsert() {
        let chunks = split_by_points(vec![ready("A", 1), ready("B", 5), ready("C", 0)], 2);
        assert_eq!(chunk_sizes(&chunks), vec![vec![1], vec![5], vec![0]]);
        assert_eq!(build_points(&chunks[1][0]).len(), 5);
    }

    #[test]
    fn test_point_payload() {
        let mut doc = Document::new("A", "filesystem", "docs", "hello world");
        doc.tenant_id = "t1".into();
        let mut metadata = BTreeMap::new();
        metadata.insert(meta::PATH.to_string(), "/srv/A".to_string());
        let fragment = Fragment::new(&doc, 0, "hello world", metadata);

        let ready = ReadyDocument {
            doc: Arc::new(DocumentHandle {
                key: doc.key(),
                fingerprint: doc.content_fingerprint.clone(),
                index_name: "documents".into(),
                fragment_count: 1,
            }),
            fragments: vec![VectorizedFragment::new(fragment, vec![0.6, 0.8], "hashing-v1/2")],
        };

        let points = build_points(&ready);
        assert_eq!(points.len(), 1);
        let point = &points[0];
        assert_eq!(point.id, "t1/filesystem/docs/A#0");
        assert_eq!(point.vector, vec![0.6, 0.8]);
        assert_eq!(point.payload_str(fields::TENANT_ID), Some("t1"));
        assert_eq!(point.payload_str(fields::DOCUMENT_ID), Some("A"));
        assert_eq!(point.payload_str(fields::SOURCE_TYPE), Some("filesystem"));
        assert_eq!(point.payload_str(fields::SOURCE_NAME), Some("docs"));
        assert_eq!(point.payload_str(fields::FRAGMENT_ID), Some("A#0"));
        assert_eq!(point.payload[fields::SEQUENCE_INDEX], 0);
        assert_eq!(point.payload_str(fields::CONTENT), Some("hello world"));
        assert_eq!(point.payload_str(fields::VECTOR_MODEL_ID), Some("hashing-v1/2"));
        assert_eq!(point.payload[fields::METADATA][meta::PATH], "/srv/A");
    }
}
