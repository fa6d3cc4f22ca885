//! Retry decision for a failed attempt.

use std::time::Duration;

use chrono::{DateTime, Utc};

use relayq_core::Task;

use super::policy::{PolicyError, RetryPolicy};
use crate::dead_letter::DeadLetterEntry;

/// Outcome of a failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// Run the task again after `delay`. `task.attempt_count` is already incremented.
    Requeue { task: Task, delay: Duration },
    /// Retry budget exhausted.
    DeadLetter(DeadLetterEntry),
}

/// Turns failed attempts into requeue-or-dead-letter decisions.
///
/// One state machine parameterised by `max_attempts`; there is a single
/// logical retry path, not one queue per retry tier.
#[derive(Debug, Clone)]
pub struct RetryScheduler {
    policy: RetryPolicy,
}

impl RetryScheduler {
    pub fn new(policy: RetryPolicy) -> Result<Self, PolicyError> {
        policy.validate()?;
        Ok(Self { policy })
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Count the failure on `task` and decide what happens next.
    ///
    /// The delay is `backoff(n)` where `n` is the number of failed attempts
    /// *before* this one, so the first failure waits `base_delay`. `now`
    /// stamps the dead-letter entry if the budget is exhausted.
    pub fn decide(
        &self,
        mut task: Task,
        failure_reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> RetryDecision {
        let prior_failures = task.attempt_count;
        let failures = task.record_failure();

        if self.policy.should_retry(failures) {
            RetryDecision::Requeue {
                task,
                delay: self.policy.backoff(prior_failures),
            }
        } else {
            RetryDecision::DeadLetter(DeadLetterEntry::new(task, failure_reason, now))
        }
    }
}
