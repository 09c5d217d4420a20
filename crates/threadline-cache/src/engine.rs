use std::sync::Arc;

use threadline_core::{
    CachePage, CommentId, CommentRow, OperationKind, OperationState, PendingKind,
    PendingOperation, RowIdentity, TxHash,
};
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::error::CacheConsistencyError;
use crate::placement::{
    apply_overlay, check_tree, is_other_listing, overlay_indexed, pending_kind, place_row,
    refresh_marker, unix_now,
};

pub use crate::placement::Placement;

/// Outcome counts of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Operations the indexer now reports; dropped from the unindexed set.
    pub indexed: usize,
    /// Operations re-applied onto the fresh tree.
    pub reinserted: usize,
    /// Operations whose optimistic row the fresh tree already holds.
    pub retained: usize,
    /// Operations kept tracked but not placeable this pass.
    pub skipped: usize,
    /// The fresh page was rejected and the cache left untouched.
    pub rejected: bool,
}

#[derive(Debug, Clone)]
struct Tracked {
    op: PendingOperation,
    /// Creation time given to the synthesized row; stable across passes.
    created_at: u64,
}

impl Tracked {
    fn matches(&self, fingerprint: CommentId, kind: PendingKind) -> bool {
        self.op.fingerprint == fingerprint && pending_kind(self.op.kind) == kind
    }
}

/// Owns the cached tree and the set of operations the indexer has not yet
/// reported.
///
/// Every mutation clones the current tree, edits the clone, validates it and
/// swaps it in; readers holding an earlier snapshot are unaffected.
#[derive(Debug, Clone)]
pub struct ReconciliationEngine {
    config: CacheConfig,
    snapshot: Option<Arc<CachePage>>,
    unindexed: Vec<Tracked>,
}

impl ReconciliationEngine {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            snapshot: None,
            unindexed: Vec::new(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Current tree, or `None` before the first fetch.
    pub fn snapshot(&self) -> Option<Arc<CachePage>> {
        self.snapshot.clone()
    }

    /// Unindexed operations, oldest first.
    pub fn unindexed(&self) -> Vec<PendingOperation> {
        self.unindexed.iter().map(|t| t.op.clone()).collect()
    }

    pub fn is_tracked(&self, fingerprint: CommentId) -> bool {
        self.unindexed.iter().any(|t| t.op.fingerprint == fingerprint)
    }

    /// Records `op` and shows it in the tree: a synthesized row for posts, an
    /// overlay for edits and deletes.
    ///
    /// Posts the indexer already reports and root posts for another listing
    /// are not tracked.
    pub fn insert_optimistic(&mut self, op: &PendingOperation) -> Placement {
        if op.kind == OperationKind::Post {
            if let Some(tree) = &self.snapshot {
                if tree.contains_identity(RowIdentity::Confirmed(op.fingerprint)) {
                    debug!(fingerprint = %op.fingerprint, "already indexed, not tracking");
                    return Placement::AlreadyIndexed;
                }
            }
            if is_other_listing(&self.config, op) {
                debug!(fingerprint = %op.fingerprint, "post for another listing, not tracking");
                return Placement::OtherListing;
            }
        }

        let created_at = self.track(op);
        let placement = self.place(op, created_at);
        debug!(
            fingerprint = %op.fingerprint,
            kind = op.kind.as_str(),
            placement = ?placement,
            "optimistic write recorded"
        );
        placement
    }

    /// Replaces the tree with `fresh` and re-applies every operation the
    /// indexer does not report yet.
    pub fn reconcile(&mut self, fresh: CachePage) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let mut tree = fresh;
        if let Err(err) = check_tree(&tree, self.config.max_depth) {
            warn!(error = %err, "rejecting malformed page");
            report.rejected = true;
            return report;
        }
        let trimmed = tree.trim_all_to_limit();
        if trimmed > 0 {
            debug!(trimmed, "fresh page exceeded its limits");
        }

        let now = unix_now();
        let mut remaining = Vec::with_capacity(self.unindexed.len());
        for tracked in &self.unindexed {
            let op = &tracked.op;
            let keep = match op.kind {
                OperationKind::Post => {
                    if tree.contains_identity(RowIdentity::Confirmed(op.fingerprint)) {
                        report.indexed += 1;
                        false
                    } else if tree.contains_identity(RowIdentity::Optimistic(op.fingerprint)) {
                        report.retained += 1;
                        true
                    } else {
                        match place_row(&self.config, &mut tree, op, tracked.created_at) {
                            Placement::Inserted => report.reinserted += 1,
                            _ => report.skipped += 1,
                        }
                        true
                    }
                }
                OperationKind::Edit | OperationKind::Delete => {
                    if overlay_indexed(&tree, op) {
                        report.indexed += 1;
                        false
                    } else {
                        match apply_overlay(&mut tree, op, now) {
                            Placement::Overlaid => report.reinserted += 1,
                            _ => report.skipped += 1,
                        }
                        true
                    }
                }
            };
            if keep {
                remaining.push(tracked.clone());
            }
        }

        if let Err(err) = check_tree(&tree, self.config.max_depth) {
            warn!(error = %err, "reconciled tree is inconsistent, keeping previous snapshot");
            return ReconcileReport {
                rejected: true,
                ..ReconcileReport::default()
            };
        }
        self.unindexed = remaining;
        self.publish(tree);
        debug!(
            indexed = report.indexed,
            reinserted = report.reinserted,
            retained = report.retained,
            skipped = report.skipped,
            "reconciled"
        );
        report
    }

    /// Decodes an indexer JSON body and reconciles it. Undecodable bodies are
    /// logged and leave the cache untouched.
    pub fn reconcile_json(&mut self, body: &[u8]) -> ReconcileReport {
        match serde_json::from_slice::<CachePage>(body) {
            Ok(page) => self.reconcile(page),
            Err(err) => {
                let err = CacheConsistencyError::Decode(err.to_string());
                warn!(error = %err, "skipping undecodable page");
                ReconcileReport {
                    rejected: true,
                    ..ReconcileReport::default()
                }
            }
        }
    }

    /// Shows the failure on the operation's row. The row stays.
    pub fn mark_error(&mut self, op: &PendingOperation) -> bool {
        self.refresh(op)
    }

    /// Shows the operation's row as confirmed until the indexer reports it.
    pub fn mark_success(&mut self, op: &PendingOperation) -> bool {
        self.refresh(op)
    }

    /// Records a progress or terminal update for a tracked operation.
    pub fn settle(&mut self, op: &PendingOperation) -> bool {
        match op.state {
            OperationState::Error { .. } => self.mark_error(op),
            OperationState::Success => self.mark_success(op),
            OperationState::Pending => self.refresh(op),
        }
    }

    /// Drops the optimistic row of the post whose transaction is `tx_hash`.
    /// The operation stays tracked so a later refetch can still settle it.
    ///
    /// For hosts that hide a write once it is mined instead of showing it as
    /// confirmed; the observer path never calls it.
    pub fn remove_by_tx_hash(&mut self, tx_hash: TxHash) -> bool {
        let Some(fingerprint) = self
            .unindexed
            .iter()
            .find(|t| t.op.kind == OperationKind::Post && t.op.tx_hash == Some(tx_hash))
            .map(|t| t.op.fingerprint)
        else {
            return false;
        };
        self.mutate(|tree| {
            tree.remove_where(&|row: &CommentRow| {
                row.id == fingerprint && row.is_optimistic()
            }) > 0
        })
        .unwrap_or(false)
    }

    /// Forgets every operation with `fingerprint` and removes its optimistic
    /// rows and overlay markers.
    pub fn dismiss(&mut self, fingerprint: CommentId) -> bool {
        let before = self.unindexed.len();
        self.unindexed.retain(|t| t.op.fingerprint != fingerprint);
        let forgot = before != self.unindexed.len();

        let cleared = self
            .mutate(|tree| {
                let removed = tree.remove_where(&|row: &CommentRow| {
                    row.id == fingerprint && row.is_optimistic()
                });
                let unmarked = match tree.find_row_mut(fingerprint) {
                    Some(row) if row.pending.is_some() => {
                        row.pending = None;
                        true
                    }
                    _ => false,
                };
                removed > 0 || unmarked
            })
            .unwrap_or(false);
        forgot || cleared
    }

    fn track(&mut self, op: &PendingOperation) -> u64 {
        let kind = pending_kind(op.kind);
        match self
            .unindexed
            .iter_mut()
            .find(|t| t.matches(op.fingerprint, kind))
        {
            Some(existing) => {
                existing.op = op.clone();
                existing.created_at
            }
            None => {
                let created_at = unix_now();
                self.unindexed.push(Tracked {
                    op: op.clone(),
                    created_at,
                });
                created_at
            }
        }
    }

    fn place(&mut self, op: &PendingOperation, created_at: u64) -> Placement {
        if self.snapshot.is_none() {
            return Placement::Uninitialized;
        }
        let config = self.config.clone();
        let placed = self.mutate(|tree| match op.kind {
            OperationKind::Post => place_row(&config, tree, op, created_at),
            OperationKind::Edit | OperationKind::Delete => apply_overlay(tree, op, unix_now()),
        });
        placed.unwrap_or(Placement::Rejected)
    }

    fn refresh(&mut self, op: &PendingOperation) -> bool {
        let kind = pending_kind(op.kind);
        match self
            .unindexed
            .iter_mut()
            .find(|t| t.matches(op.fingerprint, kind))
        {
            Some(tracked) => tracked.op = op.clone(),
            None => return false,
        }
        self.mutate(|tree| refresh_marker(tree, op)).unwrap_or(false)
    }

    /// Copy-on-write edit of the current tree. Returns `None` when there is
    /// no tree yet or the edited tree fails validation.
    fn mutate<T>(&mut self, edit: impl FnOnce(&mut CachePage) -> T) -> Option<T> {
        let current = self.snapshot.as_ref()?;
        let mut tree = CachePage::clone(current);
        let out = edit(&mut tree);
        match check_tree(&tree, self.config.max_depth) {
            Ok(()) => {
                self.publish(tree);
                Some(out)
            }
            Err(err) => {
                warn!(error = %err, "discarding inconsistent cache edit");
                None
            }
        }
    }

    /// Swaps in `tree` unless it equals the current snapshot, so an edit that
    /// changed nothing keeps the same `Arc`.
    fn publish(&mut self, tree: CachePage) {
        if self.snapshot.as_deref() != Some(&tree) {
            self.snapshot = Some(Arc::new(tree));
        }
    }
}
