use thiserror::Error;
use threadline_core::{FailureCause, RejectReason, SubmissionFailure};
use threadline_task::{Cancelled, RunError};

/// Failure reported by a wallet, relay, receipt watcher, or profile source.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request timed out")]
    Timeout,
    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },
    /// Definitive rejection by the chain or by the relay on its behalf.
    #[error("rejected ({reason}): {message}")]
    Rejected {
        reason: RejectReason,
        message: String,
    },
    #[error("user rejected the request")]
    UserRejected,
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

impl RemoteError {
    /// Transport-level failures are worth another attempt; rejections are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout => true,
            Self::Server { status, .. } => *status >= 500,
            Self::Rejected { .. }
            | Self::UserRejected
            | Self::InvalidResponse(_)
            | Self::Cancelled(_) => false,
        }
    }

    /// Classifies the error as the terminal failure of an operation.
    /// `via_relay` attributes service failures to the relay.
    pub fn to_failure(&self, via_relay: bool) -> SubmissionFailure {
        let service = if via_relay {
            FailureCause::Relay
        } else {
            FailureCause::Transport
        };
        let cause = match self {
            Self::Transport(_) | Self::Timeout | Self::InvalidResponse(_) => service,
            Self::Server { .. } => service,
            Self::Rejected { reason, .. } => FailureCause::ChainRejected(*reason),
            Self::UserRejected => FailureCause::UserRejected,
            Self::Cancelled(_) => FailureCause::Cancelled,
        };
        SubmissionFailure::new(cause, self.to_string())
    }
}

/// Converts an executor outcome into an operation failure.
pub(crate) fn run_failure(err: RunError<RemoteError>, via_relay: bool) -> SubmissionFailure {
    match err {
        RunError::Cancelled(cancelled) => {
            SubmissionFailure::new(FailureCause::Cancelled, cancelled.to_string())
        }
        RunError::Failed { error, .. } => error.to_failure(via_relay),
    }
}

#[cfg(test)]
mod tests {
    use super::{run_failure, RemoteError};
    use threadline_core::{FailureCause, RejectReason};
    use threadline_task::{Cancelled, RunError};

    #[test]
    fn only_transport_failures_are_retryable() {
        assert!(RemoteError::Transport("reset".into()).is_retryable());
        assert!(RemoteError::Timeout.is_retryable());
        assert!(RemoteError::Server {
            status: 503,
            message: "busy".into()
        }
        .is_retryable());
        assert!(!RemoteError::Server {
            status: 400,
            message: "bad".into()
        }
        .is_retryable());
        assert!(!RemoteError::UserRejected.is_retryable());
        assert!(!RemoteError::Rejected {
            reason: RejectReason::StaleNonce,
            message: "nonce too low".into()
        }
        .is_retryable());
    }

    #[test]
    fn failures_keep_rejection_reason() {
        let failure = RemoteError::Rejected {
            reason: RejectReason::InsufficientFee,
            message: "underpriced".into(),
        }
        .to_failure(false);
        assert_eq!(
            failure.cause,
            FailureCause::ChainRejected(RejectReason::InsufficientFee)
        );
        assert_eq!(failure.message, "rejected (insufficient fee): underpriced");

        assert_eq!(
            RemoteError::Timeout.to_failure(true).cause,
            FailureCause::Relay
        );
        assert_eq!(
            RemoteError::Timeout.to_failure(false).cause,
            FailureCause::Transport
        );
    }

    #[test]
    fn executor_cancellation_maps_to_cancelled_cause() {
        let failure = run_failure(
            RunError::Cancelled(Cancelled {
                reason: Some("closed".into()),
            }),
            true,
        );
        assert_eq!(failure.cause, FailureCause::Cancelled);
        assert_eq!(failure.message, "operation cancelled: closed");
    }
}
