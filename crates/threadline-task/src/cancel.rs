use std::sync::{Arc, OnceLock};

use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Raised when an action observes its cancellation handle.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("operation cancelled{}", .reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
pub struct Cancelled {
    pub reason: Option<String>,
}

/// Shared cancellation handle. Clones observe the same signal; the first
/// reason supplied wins.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    token: CancellationToken,
    reason: Arc<OnceLock<String>>,
}

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an existing token, for callers that already own one.
    pub fn from_token(token: CancellationToken) -> Self {
        Self {
            token,
            reason: Arc::default(),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn cancel_with(&self, reason: impl Into<String>) {
        let _ = self.reason.set(reason.into());
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<String> {
        self.reason.get().cloned()
    }

    pub fn error(&self) -> Cancelled {
        Cancelled {
            reason: self.reason(),
        }
    }

    /// Returns `Err(Cancelled)` once cancellation has been requested.
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(self.error())
        } else {
            Ok(())
        }
    }

    /// Resolves when cancellation is requested.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}
