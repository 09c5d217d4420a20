use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Growth factor applied per retry by [`Backoff::Exponential`].
pub const EXPONENTIAL_FACTOR: u64 = 2;

/// Wait schedule between failed attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Backoff {
    None,
    Constant {
        #[serde(rename = "delayMs")]
        delay_ms: u64,
    },
    Exponential {
        #[serde(rename = "delayMs")]
        delay_ms: u64,
    },
}

impl Backoff {
    /// Wait before retry number `retry` (0 for the first retry), or `None`
    /// when no wait applies.
    pub fn delay_for(&self, retry: u32) -> Option<Duration> {
        match *self {
            Self::None => None,
            Self::Constant { delay_ms } => Some(Duration::from_millis(delay_ms)),
            Self::Exponential { delay_ms } => {
                let factor = EXPONENTIAL_FACTOR
                    .checked_pow(retry)
                    .unwrap_or(u64::MAX);
                Some(Duration::from_millis(delay_ms.saturating_mul(factor)))
            }
        }
    }
}

/// Bounded retry budget plus its wait schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt; `0` means try once.
    pub retries: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(3, Duration::from_millis(500))
    }
}

impl RetryPolicy {
    /// Single attempt, no retry.
    pub fn none() -> Self {
        Self {
            retries: 0,
            backoff: Backoff::None,
        }
    }

    pub fn constant(retries: u32, delay: Duration) -> Self {
        Self {
            retries,
            backoff: Backoff::Constant {
                delay_ms: duration_ms(delay),
            },
        }
    }

    pub fn exponential(retries: u32, delay: Duration) -> Self {
        Self {
            retries,
            backoff: Backoff::Exponential {
                delay_ms: duration_ms(delay),
            },
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }
}

fn duration_ms(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}
