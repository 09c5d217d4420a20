use std::future::Future;

use thiserror::Error;

use crate::cancel::{Cancellation, Cancelled};
use crate::policy::RetryPolicy;

/// Policy and cancellation handle for one executor run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub policy: RetryPolicy,
    pub cancellation: Cancellation,
}

impl RunOptions {
    pub fn new(policy: RetryPolicy, cancellation: Cancellation) -> Self {
        Self {
            policy,
            cancellation,
        }
    }
}

#[derive(Debug, Error)]
pub enum RunError<E> {
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
    /// Most recent failure once the retry budget is spent or the error was
    /// classified as not worth retrying.
    #[error("failed after {attempts} attempt(s): {error}")]
    Failed { error: E, attempts: u32 },
}

impl<E> RunError<E> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    pub fn into_failure(self) -> Option<E> {
        match self {
            Self::Cancelled(_) => None,
            Self::Failed { error, .. } => Some(error),
        }
    }
}

/// Runs `action` under `options`, retrying every failure.
pub async fn run<T, E, F, Fut>(action: F, options: &RunOptions) -> Result<T, RunError<E>>
where
    F: FnMut(Cancellation) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    run_classified(action, options, |_: &E| true).await
}

/// Runs `action` under `options`, retrying only failures for which
/// `should_retry` returns true.
///
/// Cancellation is checked before every attempt and every wait. A running
/// attempt is never pre-empted; it receives the handle and must observe it.
pub async fn run_classified<T, E, F, Fut, C>(
    mut action: F,
    options: &RunOptions,
    mut should_retry: C,
) -> Result<T, RunError<E>>
where
    F: FnMut(Cancellation) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: FnMut(&E) -> bool,
{
    let cancel = &options.cancellation;
    let mut attempts: u32 = 0;
    loop {
        cancel.check()?;
        attempts = attempts.saturating_add(1);
        let error = match action(cancel.clone()).await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        cancel.check()?;
        if attempts > options.policy.retries || !should_retry(&error) {
            return Err(RunError::Failed { error, attempts });
        }

        if let Some(delay) = options.policy.backoff.delay_for(attempts - 1) {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancel.error().into()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
