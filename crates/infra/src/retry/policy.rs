//! Retry policy: attempt budget and backoff curve, expressed as data.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Largest attempt budget a policy accepts.
///
/// `validate` additionally requires the curve to fit in `u64` milliseconds up
/// to the budget, where it is still strictly increasing.
pub const MAX_ATTEMPTS_LIMIT: u32 = 32;

/// Backoff curve for retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// `base * 2^n`
    #[default]
    Exponential,
    /// `base * (n + 1)`
    Linear,
}

impl std::str::FromStr for BackoffStrategy {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exponential" => Ok(Self::Exponential),
            "linear" => Ok(Self::Linear),
            other => Err(PolicyError::UnknownStrategy(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PolicyError {
    #[error("max_attempts must be between 1 and {MAX_ATTEMPTS_LIMIT}, got {0}")]
    MaxAttempts(u32),
    #[error("base_delay must be at least 1ms")]
    ZeroBaseDelay,
    #[error("backoff after {max_attempts} attempts overflows with base_delay {base_delay:?}")]
    DelayOverflow {
        max_attempts: u32,
        base_delay: Duration,
    },
    #[error("jitter must be within [0, 1), got {0}")]
    Jitter(f64),
    #[error("unknown backoff strategy: {0}")]
    UnknownStrategy(String),
}

/// Retry policy configuration.
///
/// Immutable data: the same policy can drive the in-process retry scheduler or
/// be handed to a managed queue that supports declarative attempts/backoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Failed attempts after which a task is dead-lettered.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Backoff curve.
    pub strategy: BackoffStrategy,
    /// Jitter factor in [0, 1). Bounded so the curve stays strictly increasing.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            strategy: BackoffStrategy::Exponential,
            jitter: 0.0,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with exponential backoff and no jitter.
    pub fn exponential(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            strategy: BackoffStrategy::Exponential,
            jitter: 0.0,
        }
    }

    /// Create a policy with linear backoff and no jitter.
    pub fn linear(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            strategy: BackoffStrategy::Linear,
            jitter: 0.0,
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.max_attempts == 0 || self.max_attempts > MAX_ATTEMPTS_LIMIT {
            return Err(PolicyError::MaxAttempts(self.max_attempts));
        }
        if self.base_delay.as_millis() == 0 {
            return Err(PolicyError::ZeroBaseDelay);
        }
        // `backoff` peeks one step ahead, so the curve must fit up to here.
        if self.checked_raw_ms(self.max_attempts).is_none() {
            return Err(PolicyError::DelayOverflow {
                max_attempts: self.max_attempts,
                base_delay: self.base_delay,
            });
        }
        if !(0.0..1.0).contains(&self.jitter) {
            return Err(PolicyError::Jitter(self.jitter));
        }
        Ok(())
    }

    /// Delay before the next attempt, given the number of prior failed
    /// attempts (zero-based: the first failure uses `backoff(0)`).
    pub fn backoff(&self, attempt_count: u32) -> Duration {
        let delay_ms = self.raw_ms(attempt_count);

        // Jitter stays below the gap to the next step of the curve.
        let jitter_ms = if self.jitter > 0.0 {
            let gap = self.raw_ms(attempt_count.saturating_add(1)) - delay_ms;
            // Simple deterministic "jitter" based on attempt
            let pseudo_random = ((attempt_count as f64 * 17.0) % 100.0) / 100.0;
            (gap as f64 * self.jitter * pseudo_random) as u64
        } else {
            0
        };

        Duration::from_millis(delay_ms.saturating_add(jitter_ms))
    }

    /// Check if another attempt is allowed after `attempt_count` failures.
    pub fn should_retry(&self, attempt_count: u32) -> bool {
        attempt_count < self.max_attempts
    }

    fn raw_ms(&self, n: u32) -> u64 {
        self.checked_raw_ms(n).unwrap_or(u64::MAX)
    }

    fn checked_raw_ms(&self, n: u32) -> Option<u64> {
        let base_ms = u64::try_from(self.base_delay.as_millis()).ok()?;
        match self.strategy {
            BackoffStrategy::Exponential => base_ms.checked_mul(1u64.checked_shl(n)?),
            BackoffStrategy::Linear => base_ms.checked_mul(u64::from(n) + 1),
        }
    }
}
