//! Pure tree edits used by the reconciliation engine.

use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};

use threadline_core::{
    CachePage, CommentRow, OperationKind, OperationState, PendingKind, PendingMarker,
    PendingOperation, RowIdentity, RowStatus,
};

use crate::config::{CacheConfig, IndexerMode};
use crate::error::CacheConsistencyError;

/// Where an operation ended up after a placement attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// A synthesized row was put at the head of its page.
    Inserted,
    /// An edit or delete was applied to an existing row.
    Overlaid,
    /// The indexer already reports the row.
    AlreadyIndexed,
    /// No page has been fetched yet.
    Uninitialized,
    /// The reply's parent is not in the cached tree.
    ParentMissing,
    /// The edited or deleted row is not in the cached tree.
    SubjectMissing,
    /// A root-level post aimed at a different target.
    OtherListing,
    /// The reply would nest deeper than the cache allows.
    TooDeep,
    /// The edited tree failed validation and was discarded.
    Rejected,
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

pub fn pending_kind(kind: OperationKind) -> PendingKind {
    match kind {
        OperationKind::Post => PendingKind::Insert,
        OperationKind::Edit => PendingKind::Edit,
        OperationKind::Delete => PendingKind::Delete,
    }
}

/// Display state for a row carrying `op`.
pub fn status_for(op: &PendingOperation) -> RowStatus {
    match &op.state {
        OperationState::Pending => RowStatus::Pending,
        OperationState::Success => RowStatus::Confirmed,
        OperationState::Error { error } => RowStatus::Error {
            message: error.message.clone(),
            timed_out: error.is_timeout(),
        },
    }
}

pub fn marker_for(op: &PendingOperation) -> PendingMarker {
    PendingMarker {
        kind: pending_kind(op.kind),
        chain_id: op.chain_id,
        tx_hash: op.tx_hash,
        status: status_for(op),
    }
}

/// Builds the optimistic row for a new post: fingerprint as id, the fields
/// known at submit time and no reactions.
///
/// `level` is the depth of the page the row goes into. Rows on the deepest
/// allowed level get no reply page.
pub fn synthesize_row(
    config: &CacheConfig,
    op: &PendingOperation,
    created_at: u64,
    level: usize,
) -> CommentRow {
    let payload = &op.payload;
    CommentRow {
        id: op.fingerprint,
        author: payload.author,
        author_profile: op.resolved_author_profile.clone(),
        app: payload.app,
        channel_id: payload.channel_id,
        content: payload.content.clone(),
        target_uri: payload.target_uri.clone(),
        parent_id: payload.parent_reference(),
        metadata: payload.metadata.clone(),
        created_at,
        deleted_at: None,
        reaction_counts: Default::default(),
        replies: match config.indexer_mode {
            IndexerMode::Nested if level < config.max_depth => {
                Some(CachePage::empty(config.reply_limit()))
            }
            _ => None,
        },
        pending: Some(marker_for(op)),
    }
}

/// Whether `op` is a root-level post for a listing other than the cached one.
pub fn is_other_listing(config: &CacheConfig, op: &PendingOperation) -> bool {
    if op.kind != OperationKind::Post || !op.payload.parent_reference().is_zero() {
        return false;
    }
    match (config.target_uri.as_deref(), op.payload.target_uri.as_deref()) {
        (Some(listing), Some(target)) => listing != target,
        _ => false,
    }
}

/// Places the optimistic row for a new post, replacing any earlier optimistic
/// row with the same fingerprint.
///
/// A reply whose page would sit below `max_depth` is not placed and leaves
/// the tree untouched.
pub fn place_row(
    config: &CacheConfig,
    page: &mut CachePage,
    op: &PendingOperation,
    created_at: u64,
) -> Placement {
    let fingerprint = op.fingerprint;
    if page.contains_identity(RowIdentity::Confirmed(fingerprint)) {
        return Placement::AlreadyIndexed;
    }
    if is_other_listing(config, op) {
        return Placement::OtherListing;
    }

    let parent = op.payload.parent_reference();
    let nested = !parent.is_zero() && config.indexer_mode == IndexerMode::Nested;
    let level = if nested {
        match page.path_to(parent) {
            Some(path) => path.len() + 1,
            None => return Placement::ParentMissing,
        }
    } else {
        1
    };
    if level > config.max_depth {
        return Placement::TooDeep;
    }

    page.remove_where(&|row: &CommentRow| row.id == fingerprint && row.is_optimistic());
    let row = synthesize_row(config, op, created_at, level);

    let target = if nested {
        match page.find_row_mut(parent) {
            Some(parent_row) => parent_row
                .replies
                .get_or_insert_with(|| CachePage::empty(config.reply_limit())),
            None => return Placement::ParentMissing,
        }
    } else {
        page
    };
    target.results.insert(0, row);
    target.trim_to_limit();
    Placement::Inserted
}

/// Applies an edit or delete to the row it targets.
///
/// Optimistic rows keep their insert marker so they stay identifiable as
/// unindexed.
pub fn apply_overlay(page: &mut CachePage, op: &PendingOperation, now: u64) -> Placement {
    let Some(row) = page.find_row_mut(op.fingerprint) else {
        return Placement::SubjectMissing;
    };
    match op.kind {
        OperationKind::Edit => row.content = op.payload.content.clone(),
        OperationKind::Delete => {
            row.deleted_at.get_or_insert(now);
        }
        OperationKind::Post => return Placement::SubjectMissing,
    }
    if row.is_optimistic() {
        if let Some(marker) = row.pending.as_mut() {
            marker.status = status_for(op);
        }
    } else {
        row.pending = Some(marker_for(op));
    }
    Placement::Overlaid
}

/// Whether an indexer page already reflects an edit or delete.
///
/// A missing row counts as deleted: indexers may drop deleted comments.
pub fn overlay_indexed(page: &CachePage, op: &PendingOperation) -> bool {
    match (op.kind, page.find_row(op.fingerprint)) {
        (OperationKind::Edit, Some(row)) => {
            row.pending.is_none() && row.content == op.payload.content
        }
        (OperationKind::Delete, Some(row)) => row.pending.is_none() && row.deleted_at.is_some(),
        (OperationKind::Delete, None) => true,
        _ => false,
    }
}

/// Updates the marker a row carries for `op` (status and tx hash). An
/// optimistic post also picks up the author profile once it is resolved.
pub fn refresh_marker(page: &mut CachePage, op: &PendingOperation) -> bool {
    let kind = pending_kind(op.kind);
    let Some(row) = page.find_row_mut(op.fingerprint) else {
        return false;
    };
    let Some(marker) = row.pending.as_mut().filter(|marker| marker.kind == kind) else {
        return false;
    };
    marker.status = status_for(op);
    marker.tx_hash = op.tx_hash;
    if kind == PendingKind::Insert && op.resolved_author_profile.is_some() {
        row.author_profile = op.resolved_author_profile.clone();
    }
    true
}

/// Rejects trees nested beyond `max_depth` or holding a row id twice.
pub fn check_tree(page: &CachePage, max_depth: usize) -> Result<(), CacheConsistencyError> {
    let depth = page.depth();
    if depth > max_depth {
        return Err(CacheConsistencyError::TooDeep {
            depth,
            max: max_depth,
        });
    }

    let mut seen = HashSet::new();
    let mut duplicate = None;
    page.for_each_page(&mut |p: &CachePage| {
        for row in &p.results {
            if !seen.insert(row.id) && duplicate.is_none() {
                duplicate = Some(row.id);
            }
        }
    });
    match duplicate {
        Some(id) => Err(CacheConsistencyError::DuplicateRow(id)),
        None => Ok(()),
    }
}
