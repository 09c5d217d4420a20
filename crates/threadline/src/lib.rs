//! Threadline client facade.
//!
//! Loads configuration, installs logging, and wires the submission pipeline
//! to the reconciling cache, with HTTP relay and indexer collaborators and a
//! background refetch loop.

pub mod client;
pub mod config;
pub mod http;
pub mod logging;
pub mod refetch;

pub use client::{Client, ClientBuilder, ClientError};
pub use config::{BackoffKind, ThreadlineConfig};
pub use http::{HttpError, HttpIndexer, HttpRelay};
pub use logging::{init_logging, ActivityEntry, ActivityLog, ActivityLogLayer, LoggingError};
pub use refetch::{InMemoryIndexer, IndexerQuery, IndexerSource, RefetchService};

pub use threadline_cache as cache;
pub use threadline_core as core;
pub use threadline_submit as submit;
pub use threadline_task as task;
