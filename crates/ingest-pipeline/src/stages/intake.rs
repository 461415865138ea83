//! Intake: sources to the document queue.
//!
//! For every (tenant, source) pair the intake enumerates the source,
//! converts and stamps each item, consults the change-detection store and
//! claims changed documents before queueing them. Once a source has been
//! enumerated completely, documents it no longer yields are tombstoned.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use ingest_storage::ChangeDetectionStore;
use ingest_types::{Document, DocumentKey, SourceScope, TenantContext};
use ingest_vector::VectorIndex;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::convert::Preprocessor;
use crate::monitor::{Stage, StageStats};
use crate::orchestrator::TenantSource;
use crate::retry::RetryPolicy;
use crate::stages::{DocumentJob, StageContext};
use crate::tenants::TenantRegistry;
use crate::tracker::CANCELLED;

pub(crate) struct Intake {
    pub tenants: Arc<TenantRegistry>,
    pub store: Arc<ChangeDetectionStore>,
    pub index: Arc<dyn VectorIndex>,
    pub preprocessor: Arc<dyn Preprocessor>,
    pub policy: RetryPolicy,
    pub tombstone_removed: bool,
    pub ctx: StageContext,
}

impl Intake {
    /// Feed every source in order; the document queue closes on return.
    pub async fn run(self, sources: Vec<TenantSource>, tx: mpsc::Sender<DocumentJob>) {
        for source in &sources {
            if self.ctx.cancel.is_cancelled() {
                info!("Intake stopped by cancellation");
                break;
            }
            self.ingest_source(source, &tx).await;
        }
    }

    async fn ingest_source(&self, entry: &TenantSource, tx: &mpsc::Sender<DocumentJob>) {
        let tenant = match self.tenants.get(&entry.tenant_id) {
            Ok(tenant) => tenant.clone(),
            Err(e) => {
                error!(error = %e, "Source skipped");
                return;
            }
        };
        let source = &entry.source;
        let scope = SourceScope::new(
            &tenant.tenant_id,
            source.source_type(),
            source.source_name(),
        );
        info!(scope = %scope, "Ingesting source");

        let mut seen_ids = HashSet::new();
        let mut anonymous_errors = 0usize;
        let mut complete = true;
        let mut items = source.items();

        loop {
            let next = tokio::select! {
                biased;
                _ = self.ctx.cancel.cancelled() => {
                    complete = false;
                    break;
                }
                next = items.next() => next,
            };
            let Some(next) = next else {
                break;
            };

            match next {
                Ok(item) => {
                    seen_ids.insert(item.document_id.clone());
                    let document =
                        self.preprocessor
                            .convert(&scope.source_type, &scope.source_name, item);
                    let document = match self.tenants.stamp(document, &tenant.tenant_id) {
                        Ok(document) => document,
                        Err(e) => {
                            error!(scope = %scope, error = %e, "Failed to stamp document");
                            continue;
                        }
                    };
                    if !self.admit(document, &tenant, tx).await {
                        complete = false;
                        break;
                    }
                }
                Err(e) => match e.document_id() {
                    Some(document_id) => {
                        seen_ids.insert(document_id.to_string());
                        let key = scope.key(document_id);
                        if self.ctx.tracker.observe(&key) {
                            self.ctx.tracker.fail(&key, &format!("source: {}", e));
                        }
                    }
                    None => {
                        anonymous_errors += 1;
                        warn!(scope = %scope, error = %e, "Source enumeration error");
                    }
                },
            }
        }

        info!(scope = %scope, seen = seen_ids.len(), complete, "Source enumerated");
        if !complete {
            info!(scope = %scope, "Source interrupted, removal detection skipped");
            return;
        }
        if anonymous_errors > 0 {
            warn!(scope = %scope, errors = anonymous_errors, "Source reported errors, removal detection skipped");
            return;
        }
        if self.tombstone_removed {
            self.tombstone(&scope, &tenant.index_name, &seen_ids).await;
        }
    }

    /// Decide what happens to one document. Returns false once intake must stop.
    async fn admit(
        &self,
        document: Document,
        tenant: &Arc<TenantContext>,
        tx: &mpsc::Sender<DocumentJob>,
    ) -> bool {
        let tracker = &self.ctx.tracker;
        let key = document.key();
        if !tracker.observe(&key) {
            warn!(key = %key, "Duplicate document id in source, ignored");
            return true;
        }

        match self
            .store
            .should_process(&key, &document.content_fingerprint)
        {
            Ok(false) => {
                tracker.skip(&key);
                return true;
            }
            Ok(true) => {}
            Err(e) => {
                tracker.fail(&key, &format!("state store: {}", e));
                return true;
            }
        }

        if let Err(e) = self.store.begin_attempt(&key) {
            tracker.fail(&key, &format!("state store: {}", e));
            return true;
        }
        tracker.mark_claimed(&key);

        let job = DocumentJob {
            document,
            tenant: tenant.clone(),
        };
        tokio::select! {
            biased;
            _ = self.ctx.cancel.cancelled() => {
                tracker.fail(&key, CANCELLED);
                false
            }
            sent = tx.send(job) => {
                if sent.is_err() {
                    tracker.fail(&key, "fragmentation stage stopped");
                    false
                } else {
                    true
                }
            }
        }
    }

    /// Tombstone documents of `scope` that were not seen in this run.
    async fn tombstone(&self, scope: &SourceScope, index_name: &str, seen_ids: &HashSet<String>) {
        let stale = match self.store.list_stale(scope, seen_ids) {
            Ok(stale) => stale,
            Err(e) => {
                warn!(scope = %scope, error = %e, "Failed to list removed documents");
                return;
            }
        };
        if stale.is_empty() {
            return;
        }

        let stats = self.ctx.monitor.stage(Stage::Tombstone);
        for key in stale {
            if self.ctx.cancel.is_cancelled() {
                break;
            }
            if self.store.is_in_flight(&key) {
                continue;
            }

            let started = Instant::now();
            match self.remove(index_name, &key, stats).await {
                Ok(points) => {
                    stats.record_batch(1, 0, started.elapsed());
                    self.ctx.tracker.record_removed();
                    info!(key = %key, points, "Tombstoned removed document");
                }
                Err(reason) => {
                    stats.record_batch(0, 1, started.elapsed());
                    warn!(key = %key, reason = %reason, "Failed to tombstone removed document");
                }
            }
        }
    }

    async fn remove(
        &self,
        index_name: &str,
        key: &DocumentKey,
        stats: &StageStats,
    ) -> Result<usize, String> {
        let ids = self
            .store
            .get(key)
            .map_err(|e| format!("state store: {}", e))?
            .map(|state| state.fragment_ids)
            .unwrap_or_default();

        let removed = if ids.is_empty() {
            0
        } else {
            self.policy
                .call("delete", stats, &self.ctx.cancel, || {
                    self.index.delete(index_name, &ids)
                })
                .await
                .map_err(|e| e.to_string())?
        };

        self.store
            .mark_tombstoned(key)
            .map_err(|e| format!("state store: {}", e))?;
        Ok(removed)
    }
}
