//! Pipeline stages.
//!
//! Stages are coupled by bounded `tokio::sync::mpsc` queues:
//!
//! ```text
//! intake -> [documents] -> fragment workers -> [fragments] -> batcher
//!        -> [batches] -> embed workers -> [vectors] -> assembler
//!        -> [ready documents] -> publish workers
//! ```
//!
//! A full queue suspends its producer, which is the only backpressure
//! mechanism. Worker pools share one receiver behind an async mutex, and a
//! stage ends once its input queue is closed and drained.

pub(crate) mod assemble;
pub(crate) mod fragment;
pub(crate) mod intake;
pub(crate) mod publish;
pub(crate) mod vectorize;

use std::sync::Arc;

use ingest_types::{Document, DocumentKey, Fragment, TenantContext, VectorizedFragment};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::monitor::RunMonitor;
use crate::tracker::RunTracker;

/// Receiver shared by the workers of one pool.
pub(crate) type SharedReceiver<T> = Arc<Mutex<mpsc::Receiver<T>>>;

pub(crate) fn shared<T>(rx: mpsc::Receiver<T>) -> SharedReceiver<T> {
    Arc::new(Mutex::new(rx))
}

/// Take the next item; the lock is only held while waiting.
pub(crate) async fn recv_shared<T>(rx: &SharedReceiver<T>) -> Option<T> {
    rx.lock().await.recv().await
}

/// State shared by every stage of one run.
#[derive(Clone)]
pub(crate) struct StageContext {
    pub tracker: Arc<RunTracker>,
    pub monitor: Arc<RunMonitor>,
    pub cancel: CancellationToken,
}

/// A claimed document on its way to fragmentation.
pub(crate) struct DocumentJob {
    pub document: Document,
    pub tenant: Arc<TenantContext>,
}

/// What later stages need to know about a document once it is fragmented.
#[derive(Debug)]
pub(crate) struct DocumentHandle {
    pub key: DocumentKey,
    pub fingerprint: String,
    pub index_name: String,
    pub fragment_count: usize,
}

/// One fragment waiting for its vector.
pub(crate) struct FragmentJob {
    pub doc: Arc<DocumentHandle>,
    pub fragment: Fragment,
}

impl FragmentJob {
    pub fn byte_len(&self) -> usize {
        self.fragment.byte_len()
    }
}

/// One fragment with its vector.
pub(crate) struct VectorJob {
    pub doc: Arc<DocumentHandle>,
    pub fragment: VectorizedFragment,
}

/// A document whose fragments are all vectorized, ordered by sequence.
pub(crate) struct ReadyDocument {
    pub doc: Arc<DocumentHandle>,
    pub fragments: Vec<VectorizedFragment>,
}

impl ReadyDocument {
    pub fn point_count(&self) -> usize {
        self.fragments.len()
    }
}
