//! Submission pipeline for optimistic comment writes.
//!
//! Drives a validated [`threadline_core::PendingOperation`] through chain
//! alignment, signing, broadcast and confirmation against pluggable wallet,
//! relay and receipt collaborators.

pub mod error;
pub mod memory;
pub mod pipeline;
pub mod profile;
pub mod remote;
pub mod request;

pub use error::RemoteError;
pub use pipeline::{SubmitOptions, SubmitRequest, Submitter, SubmitterConfig};
pub use profile::CachedProfileResolver;
pub use remote::{ProfileResolver, ReceiptWatcher, Relay, Wallet};
pub use request::{
    ContractCall, Receipt, ReceiptStatus, RelayRequest, RelayResponse, RelaySubmission,
    TypedDataDomain, TypedDataRequest,
};
