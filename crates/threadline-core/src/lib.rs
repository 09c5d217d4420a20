//! Core threadline primitives shared across crates.
//!
//! Includes fixed-size identifiers, the pending-operation record and its
//! lifecycle, the tree-shaped cache page model, fingerprint derivation, and
//! base errors.

pub mod error;
pub mod fingerprint;
pub mod hash;
pub mod observer;
pub mod operation;
pub mod page;
pub mod types;
pub mod validate;

pub use operation::{
    AuthorProfile, CommentPayload, FailureCause, MetadataEntry, OperationKind, OperationState,
    PendingOperation, RejectReason, Stage, SubmissionFailure, SubmissionMode,
};
pub use page::{
    CachePage, CommentRow, Pagination, PendingKind, PendingMarker, RowIdentity, RowStatus,
};
pub use types::{Address, ChainId, CommentId, Signature, TxHash};
