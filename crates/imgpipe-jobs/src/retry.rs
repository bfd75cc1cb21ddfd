use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponential delay between attempts.
///
/// The delay after attempt `n` (1 based) failed is
/// `base_delay_ms * multiplier^(n - 1)`. Uncapped and without jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    pub base_delay_ms: u64,
    pub multiplier: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 500,
            multiplier: 2,
        }
    }
}

impl BackoffPolicy {
    pub fn exponential(base: Duration, multiplier: u32) -> Self {
        Self {
            base_delay_ms: base.as_millis().min(u64::MAX as u128) as u64,
            multiplier,
        }
    }

    /// Delay before the retry that follows failed attempt `attempt`
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = (self.multiplier as u64).saturating_pow(exponent);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }
}

/// What happens to a job record once it completes successfully.
/// Terminally failed records are always retained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Retention {
    #[default]
    DiscardOnSuccess,
    Keep,
}

/// Per-job delivery options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobOptions {
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
    pub retention: Retention,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffPolicy::default(),
            retention: Retention::DiscardOnSuccess,
        }
    }
}

impl JobOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n.max(1);
        self
    }

    pub fn backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn retention(mut self, retention: Retention) -> Self {
        self.retention = retention;
        self
    }
}
