use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use threadline_core::observer::OperationObserver;
use threadline_core::{CachePage, CommentId, PendingOperation, TxHash};
use tokio::sync::watch;

use crate::config::CacheConfig;
use crate::engine::{Placement, ReconcileReport, ReconciliationEngine};

pub type Snapshot = Option<Arc<CachePage>>;

struct Inner {
    engine: Mutex<ReconciliationEngine>,
    snapshots: watch::Sender<Snapshot>,
}

/// Shared, cloneable access to one reconciliation engine.
///
/// Each change to the tree is published to subscribers as a new snapshot.
#[derive(Clone)]
pub struct CacheHandle {
    inner: Arc<Inner>,
}

impl CacheHandle {
    pub fn new(config: CacheConfig) -> Self {
        let (snapshots, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                engine: Mutex::new(ReconciliationEngine::new(config)),
                snapshots,
            }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.inner.snapshots.subscribe()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.engine().snapshot()
    }

    pub fn unindexed(&self) -> Vec<PendingOperation> {
        self.engine().unindexed()
    }

    pub fn insert_optimistic(&self, op: &PendingOperation) -> Placement {
        self.update(|engine| engine.insert_optimistic(op))
    }

    pub fn reconcile(&self, fresh: CachePage) -> ReconcileReport {
        self.update(|engine| engine.reconcile(fresh))
    }

    pub fn reconcile_json(&self, body: &[u8]) -> ReconcileReport {
        self.update(|engine| engine.reconcile_json(body))
    }

    pub fn mark_error(&self, op: &PendingOperation) -> bool {
        self.update(|engine| engine.mark_error(op))
    }

    pub fn mark_success(&self, op: &PendingOperation) -> bool {
        self.update(|engine| engine.mark_success(op))
    }

    pub fn settle(&self, op: &PendingOperation) -> bool {
        self.update(|engine| engine.settle(op))
    }

    pub fn remove_by_tx_hash(&self, tx_hash: TxHash) -> bool {
        self.update(|engine| engine.remove_by_tx_hash(tx_hash))
    }

    pub fn dismiss(&self, fingerprint: CommentId) -> bool {
        self.update(|engine| engine.dismiss(fingerprint))
    }

    fn engine(&self) -> MutexGuard<'_, ReconciliationEngine> {
        self.inner
            .engine
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn update<T>(&self, edit: impl FnOnce(&mut ReconciliationEngine) -> T) -> T {
        let mut engine = self.engine();
        let out = edit(&mut engine);
        let next = engine.snapshot();
        self.inner.snapshots.send_if_modified(|current| {
            let changed = match (current.as_ref(), next.as_ref()) {
                (Some(a), Some(b)) => !Arc::ptr_eq(a, b),
                (None, None) => false,
                _ => true,
            };
            if changed {
                *current = next;
            }
            changed
        });
        out
    }
}

impl OperationObserver for CacheHandle {
    fn operation_created(&self, op: &PendingOperation) {
        self.insert_optimistic(op);
    }

    fn operation_progressed(&self, op: &PendingOperation) {
        self.settle(op);
    }

    fn operation_settled(&self, op: &PendingOperation) {
        self.settle(op);
    }
}
