use thiserror::Error;

/// Shared lightweight error type for core primitive parsing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Invalid caller input or malformed primitive value.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    /// Hex decoding failure.
    #[error("decode error: {0}")]
    Decode(&'static str),
}

/// Rejections raised while preparing a write, before any operation exists.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("comment content is empty")]
    EmptyContent,
    #[error("comment content exceeds {max} bytes")]
    ContentTooLong { max: usize },
    #[error("author address is missing")]
    MissingAuthor,
    #[error("a new comment needs a target uri or a parent id")]
    MissingTarget,
    #[error("a comment cannot have both a target uri and a parent id")]
    ConflictingTarget,
    #[error("{0} requires the id of an existing comment")]
    MissingSubject(&'static str),
    #[error("new comments cannot reference an existing comment id")]
    UnexpectedSubject,
    #[error("submission mode {0} requires a relay")]
    RelayUnavailable(&'static str),
    #[error("operation is still in flight")]
    StillInFlight,
}

/// Illegal lifecycle transition on a pending operation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("operation already settled in stage {0}")]
    AlreadyTerminal(&'static str),
    #[error("cannot move from {from} to {to}")]
    Illegal {
        from: &'static str,
        to: &'static str,
    },
}
