//! Reconnect backoff for pipeline threads.
//!
//! Infrastructure failures (queue or store unreachable) are not task
//! failures: they never touch `attempt_count`. The thread that hit one waits
//! with a capped exponential delay and tries again.

use std::time::Duration;

const INITIAL_DELAY: Duration = Duration::from_millis(100);
const MAX_DELAY: Duration = Duration::from_secs(5);

/// Consecutive-failure counter with capped exponential delay.
#[derive(Debug, Clone, Default)]
pub struct ReconnectBackoff {
    failures: u32,
}

impl ReconnectBackoff {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a failure and return how long to wait before retrying.
    pub fn on_failure(&mut self) -> Duration {
        let exp = self.failures.min(16);
        self.failures = self.failures.saturating_add(1);
        INITIAL_DELAY.saturating_mul(1 << exp).min(MAX_DELAY)
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures
    }
}
