use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::operation::{AuthorProfile, MetadataEntry};
use crate::types::{Address, ChainId, CommentId, TxHash};

/// Cursor pagination block attached to every page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    /// Maximum rows the page may hold after reconciliation.
    pub limit: usize,
    #[serde(default)]
    pub has_next: bool,
    #[serde(default)]
    pub has_previous: bool,
    #[serde(default)]
    pub start_cursor: Option<String>,
    #[serde(default)]
    pub end_cursor: Option<String>,
}

impl Pagination {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit,
            has_next: false,
            has_previous: false,
            start_cursor: None,
            end_cursor: None,
        }
    }
}

/// Which local write a pending marker stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PendingKind {
    /// Row synthesized locally; not yet reported by the indexer.
    Insert,
    /// Indexed row whose content was replaced locally.
    Edit,
    /// Indexed row hidden locally pending deletion.
    Delete,
}

/// Display state of a locally written row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum RowStatus {
    Pending,
    /// Mined; waiting for the indexer to report the row.
    Confirmed,
    Error {
        message: String,
        /// Confirmation window expired; the tx may still land.
        timed_out: bool,
    },
}

/// Marker attached to rows that carry a local, not-yet-indexed write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingMarker {
    pub kind: PendingKind,
    pub chain_id: ChainId,
    #[serde(default)]
    pub tx_hash: Option<TxHash>,
    pub status: RowStatus,
}

/// Identity of a row as reconciliation sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowIdentity {
    Confirmed(CommentId),
    Optimistic(CommentId),
}

impl RowIdentity {
    pub fn id(self) -> CommentId {
        match self {
            Self::Confirmed(id) | Self::Optimistic(id) => id,
        }
    }
}

/// One comment row; reply containers own a nested page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentRow {
    pub id: CommentId,
    pub author: Address,
    #[serde(default)]
    pub author_profile: Option<AuthorProfile>,
    #[serde(default)]
    pub app: Address,
    #[serde(default)]
    pub channel_id: u64,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub target_uri: Option<String>,
    #[serde(default)]
    pub parent_id: CommentId,
    #[serde(default)]
    pub metadata: Vec<MetadataEntry>,
    #[serde(default)]
    pub created_at: u64,
    #[serde(default)]
    pub deleted_at: Option<u64>,
    #[serde(default)]
    pub reaction_counts: BTreeMap<String, u64>,
    /// Absent in flat indexing mode.
    #[serde(default)]
    pub replies: Option<CachePage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<PendingMarker>,
}

impl CommentRow {
    pub fn identity(&self) -> RowIdentity {
        match &self.pending {
            Some(marker) if marker.kind == PendingKind::Insert => RowIdentity::Optimistic(self.id),
            _ => RowIdentity::Confirmed(self.id),
        }
    }

    pub fn is_optimistic(&self) -> bool {
        matches!(self.identity(), RowIdentity::Optimistic(_))
    }
}

/// One page of rows, most-recent-first at the root listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachePage {
    pub results: Vec<CommentRow>,
    pub pagination: Pagination,
}

impl CachePage {
    /// Creates an empty page holding at most `limit` rows.
    pub fn empty(limit: usize) -> Self {
        Self {
            results: Vec::new(),
            pagination: Pagination::with_limit(limit),
        }
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Drops rows from the tail until the page fits its limit.
    ///
    /// Returns the number of rows dropped.
    pub fn trim_to_limit(&mut self) -> usize {
        let limit = self.pagination.limit;
        let dropped = self.results.len().saturating_sub(limit);
        self.results.truncate(limit);
        dropped
    }

    /// Applies `trim_to_limit` to this page and every nested reply page.
    pub fn trim_all_to_limit(&mut self) -> usize {
        let mut dropped = self.trim_to_limit();
        for row in &mut self.results {
            if let Some(replies) = row.replies.as_mut() {
                dropped += replies.trim_all_to_limit();
            }
        }
        dropped
    }

    /// Index path from this page down to the first row with `id`.
    pub fn path_to(&self, id: CommentId) -> Option<Vec<usize>> {
        for (index, row) in self.results.iter().enumerate() {
            if row.id == id {
                return Some(vec![index]);
            }
            if let Some(mut path) = row.replies.as_ref().and_then(|r| r.path_to(id)) {
                path.insert(0, index);
                return Some(path);
            }
        }
        None
    }

    pub fn row_at_path_mut(&mut self, path: &[usize]) -> Option<&mut CommentRow> {
        let (first, rest) = path.split_first()?;
        let row = self.results.get_mut(*first)?;
        if rest.is_empty() {
            return Some(row);
        }
        row.replies.as_mut()?.row_at_path_mut(rest)
    }

    /// Finds the first row with `id` anywhere in the tree.
    pub fn find_row(&self, id: CommentId) -> Option<&CommentRow> {
        self.results.iter().find_map(|row| {
            if row.id == id {
                Some(row)
            } else {
                row.replies.as_ref().and_then(|r| r.find_row(id))
            }
        })
    }

    pub fn find_row_mut(&mut self, id: CommentId) -> Option<&mut CommentRow> {
        let path = self.path_to(id)?;
        self.row_at_path_mut(&path)
    }

    /// Whether any page in the tree holds a row with this identity.
    pub fn contains_identity(&self, identity: RowIdentity) -> bool {
        self.results.iter().any(|row| {
            row.identity() == identity
                || row
                    .replies
                    .as_ref()
                    .is_some_and(|r| r.contains_identity(identity))
        })
    }

    /// Removes every row in the tree matching `predicate`.
    pub fn remove_where(&mut self, predicate: &impl Fn(&CommentRow) -> bool) -> usize {
        let before = self.results.len();
        self.results.retain(|row| !predicate(row));
        let mut removed = before - self.results.len();
        for row in &mut self.results {
            if let Some(replies) = row.replies.as_mut() {
                removed += replies.remove_where(predicate);
            }
        }
        removed
    }

    /// Visits this page and every nested page depth-first.
    pub fn for_each_page<'a>(&'a self, visit: &mut impl FnMut(&'a CachePage)) {
        visit(self);
        for row in &self.results {
            if let Some(replies) = row.replies.as_ref() {
                replies.for_each_page(visit);
            }
        }
    }

    /// Maximum nesting depth; a page without reply pages has depth 1.
    pub fn depth(&self) -> usize {
        1 + self
            .results
            .iter()
            .filter_map(|row| row.replies.as_ref().map(CachePage::depth))
            .max()
            .unwrap_or(0)
    }
}
