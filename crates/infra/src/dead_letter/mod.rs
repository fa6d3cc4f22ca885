//! Dead-letter sink: terminal storage for tasks that exhausted their retries.
//!
//! Every push also lands in an alert outbox. The [`DeadLetterNotifier`] drains
//! the outbox on its own thread, so a slow or failing alert transport never
//! holds up a worker.

pub mod alert;
pub mod notifier;

#[cfg(feature = "redis")]
pub mod redis_list;

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use relayq_core::{Task, TaskId};

use crate::error::InfraError;

pub use alert::{AlertDispatcher, AlertError, AlertMessage, LoggingAlertDispatcher};
pub use notifier::DeadLetterNotifier;

#[cfg(feature = "redis")]
pub use redis_list::RedisDeadLetterSink;

/// Entry in the dead-letter queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    /// The task as it was on its last attempt, payload untouched.
    pub task: Task,
    pub final_attempt_count: u32,
    pub failure_reason: String,
    pub dead_lettered_at: DateTime<Utc>,
}

impl DeadLetterEntry {
    pub fn new(
        task: Task,
        failure_reason: impl Into<String>,
        dead_lettered_at: DateTime<Utc>,
    ) -> Self {
        Self {
            final_attempt_count: task.attempt_count,
            task,
            failure_reason: failure_reason.into(),
            dead_lettered_at,
        }
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task.id
    }
}

/// Append-only dead-letter storage with an alert outbox.
pub trait DeadLetterSink: Send + Sync {
    /// Durably append `entry` and queue it for alerting.
    fn push(&self, entry: &DeadLetterEntry) -> Result<(), InfraError>;

    /// Block up to `timeout` for the next entry awaiting an alert.
    /// Each pushed entry is handed out once.
    fn next_alert(&self, timeout: Duration) -> Result<Option<DeadLetterEntry>, InfraError>;

    /// Oldest entries first, at most `limit`.
    fn list(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, InfraError>;

    fn len(&self) -> Result<usize, InfraError>;

    fn is_empty(&self) -> Result<bool, InfraError> {
        Ok(self.len()? == 0)
    }

    /// Remove the entry for `task_id` and return its task with a fresh
    /// attempt budget, ready to be enqueued again.
    fn replay(&self, task_id: &TaskId) -> Result<Option<Task>, InfraError>;
}

impl<T> DeadLetterSink for Arc<T>
where
    T: DeadLetterSink + ?Sized,
{
    fn push(&self, entry: &DeadLetterEntry) -> Result<(), InfraError> {
        (**self).push(entry)
    }

    fn next_alert(&self, timeout: Duration) -> Result<Option<DeadLetterEntry>, InfraError> {
        (**self).next_alert(timeout)
    }

    fn list(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, InfraError> {
        (**self).list(limit)
    }

    fn len(&self) -> Result<usize, InfraError> {
        (**self).len()
    }

    fn replay(&self, task_id: &TaskId) -> Result<Option<Task>, InfraError> {
        (**self).replay(task_id)
    }
}

#[derive(Debug, Default)]
struct Lists {
    entries: Vec<DeadLetterEntry>,
    outbox: VecDeque<DeadLetterEntry>,
}

/// In-memory dead-letter sink for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryDeadLetterSink {
    lists: Mutex<Lists>,
    alert_ready: Condvar,
}

impl InMemoryDeadLetterSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Lists>, InfraError> {
        self.lists
            .lock()
            .map_err(|_| InfraError::Poisoned("dead-letter sink"))
    }
}

impl DeadLetterSink for InMemoryDeadLetterSink {
    fn push(&self, entry: &DeadLetterEntry) -> Result<(), InfraError> {
        let mut lists = self.lock()?;
        lists.entries.push(entry.clone());
        lists.outbox.push_back(entry.clone());
        self.alert_ready.notify_one();
        Ok(())
    }

    fn next_alert(&self, timeout: Duration) -> Result<Option<DeadLetterEntry>, InfraError> {
        let deadline = Instant::now() + timeout;
        let mut lists = self.lock()?;
        loop {
            if let Some(entry) = lists.outbox.pop_front() {
                return Ok(Some(entry));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            let (guard, _) = self
                .alert_ready
                .wait_timeout(lists, remaining)
                .map_err(|_| InfraError::Poisoned("dead-letter sink"))?;
            lists = guard;
        }
    }

    fn list(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, InfraError> {
        Ok(self.lock()?.entries.iter().take(limit).cloned().collect())
    }

    fn len(&self) -> Result<usize, InfraError> {
        Ok(self.lock()?.entries.len())
    }

    fn replay(&self, task_id: &TaskId) -> Result<Option<Task>, InfraError> {
        let mut lists = self.lock()?;
        let Some(pos) = lists.entries.iter().position(|e| &e.task.id == task_id) else {
            return Ok(None);
        };
        let entry = lists.entries.remove(pos);
        Ok(Some(entry.task.with_attempt_count(0)))
    }
}
