//! Optimistic cache reconciliation.
//!
//! Keeps a tree-shaped page of comments consistent with in-flight writes:
//! optimistic rows are synthesized on submit, survive indexer refetches until
//! the indexer reports them, and are marked (never silently dropped) when a
//! write fails.

pub mod config;
pub mod engine;
pub mod error;
pub mod handle;
pub mod placement;

pub use config::{CacheConfig, IndexerMode};
pub use engine::{Placement, ReconcileReport, ReconciliationEngine};
pub use error::CacheConsistencyError;
pub use handle::CacheHandle;
