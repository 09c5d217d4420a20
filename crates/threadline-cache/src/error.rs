use thiserror::Error;
use threadline_core::CommentId;

/// Structural problem found in a cache tree. The offending pass is skipped.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheConsistencyError {
    #[error("page nesting depth {depth} exceeds {max}")]
    TooDeep { depth: usize, max: usize },
    #[error("row {0} appears more than once")]
    DuplicateRow(CommentId),
    #[error("undecodable page: {0}")]
    Decode(String),
}
