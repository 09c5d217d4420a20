//! Cancellable, retrying execution of fallible async actions.
//!
//! The executor is free of domain knowledge: callers hand it a closure that
//! produces one attempt, a retry policy, and a cancellation handle.

pub mod cancel;
pub mod executor;
pub mod policy;

pub use cancel::{Cancellation, Cancelled};
pub use executor::{run, run_classified, RunError, RunOptions};
pub use policy::{Backoff, RetryPolicy};
