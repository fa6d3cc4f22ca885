//! Progress store: which steps of a task have already committed.
//!
//! The record for a task is created lazily by the first `mark_completed`,
//! removed by `clear` when the task completes or is dead-lettered, and also
//! expires on its own after a TTL so abandoned tasks do not leak records.
//!
//! Ordering contract: a step is marked only strictly after its side effect
//! committed. A crash between the commit and the mark re-executes that one
//! step on redelivery; that window is accepted, not closed.

#[cfg(feature = "redis")]
pub mod redis_set;

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use relayq_core::clock::saturating_add;
use relayq_core::{Clock, SystemClock, TaskId};

use crate::error::InfraError;

#[cfg(feature = "redis")]
pub use redis_set::RedisProgressStore;

/// Per-task set of committed step names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub task_id: TaskId,
    pub completed_steps: BTreeSet<String>,
    pub expires_at: DateTime<Utc>,
}

/// Durable store of step completion, keyed by task id.
///
/// Implementations must tolerate concurrent marks for the same task id; the
/// completed set only ever grows (set union) until `clear`.
pub trait ProgressStore: Send + Sync {
    fn has_completed(&self, task_id: &TaskId, step: &str) -> Result<bool, InfraError>;

    /// Record `step` as committed and push the record's expiry to `now + ttl`.
    fn mark_completed(&self, task_id: &TaskId, step: &str, ttl: Duration)
    -> Result<(), InfraError>;

    fn clear(&self, task_id: &TaskId) -> Result<(), InfraError>;

    /// All steps recorded for `task_id` (empty if none or expired).
    fn completed_steps(&self, task_id: &TaskId) -> Result<BTreeSet<String>, InfraError>;
}

impl<T> ProgressStore for Arc<T>
where
    T: ProgressStore + ?Sized,
{
    fn has_completed(&self, task_id: &TaskId, step: &str) -> Result<bool, InfraError> {
        (**self).has_completed(task_id, step)
    }

    fn mark_completed(
        &self,
        task_id: &TaskId,
        step: &str,
        ttl: Duration,
    ) -> Result<(), InfraError> {
        (**self).mark_completed(task_id, step, ttl)
    }

    fn clear(&self, task_id: &TaskId) -> Result<(), InfraError> {
        (**self).clear(task_id)
    }

    fn completed_steps(&self, task_id: &TaskId) -> Result<BTreeSet<String>, InfraError> {
        (**self).completed_steps(task_id)
    }
}

#[derive(Debug, Default)]
struct Records {
    by_task: HashMap<TaskId, ProgressRecord>,
    /// Earliest time the next write sweeps out expired records.
    next_sweep: Option<DateTime<Utc>>,
}

/// In-memory progress store for tests/dev.
///
/// Expiry is evaluated lazily against the injected clock on every read.
/// Writes sweep expired records out at most once per TTL; `purge_expired`
/// does the same on demand.
#[derive(Debug)]
pub struct InMemoryProgressStore {
    records: RwLock<Records>,
    clock: Arc<dyn Clock>,
}

impl InMemoryProgressStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: RwLock::new(Records::default()),
            clock,
        }
    }

    /// Live record for `task_id`, if any.
    pub fn get(&self, task_id: &TaskId) -> Result<Option<ProgressRecord>, InfraError> {
        let now = self.clock.now();
        let records = self.read()?;
        Ok(records
            .by_task
            .get(task_id)
            .filter(|r| r.expires_at > now)
            .cloned())
    }

    /// Number of live records.
    pub fn len(&self) -> Result<usize, InfraError> {
        let now = self.clock.now();
        Ok(self
            .read()?
            .by_task
            .values()
            .filter(|r| r.expires_at > now)
            .count())
    }

    pub fn is_empty(&self) -> Result<bool, InfraError> {
        Ok(self.len()? == 0)
    }

    /// Remove expired records; returns how many were dropped.
    pub fn purge_expired(&self) -> Result<usize, InfraError> {
        let now = self.clock.now();
        Ok(Self::sweep(&mut self.write()?.by_task, now))
    }

    fn sweep(by_task: &mut HashMap<TaskId, ProgressRecord>, now: DateTime<Utc>) -> usize {
        let before = by_task.len();
        by_task.retain(|_, r| r.expires_at > now);
        before - by_task.len()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Records>, InfraError> {
        self.records
            .read()
            .map_err(|_| InfraError::Poisoned("progress store"))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Records>, InfraError> {
        self.records
            .write()
            .map_err(|_| InfraError::Poisoned("progress store"))
    }
}

impl Default for InMemoryProgressStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressStore for InMemoryProgressStore {
    fn has_completed(&self, task_id: &TaskId, step: &str) -> Result<bool, InfraError> {
        Ok(self
            .get(task_id)?
            .is_some_and(|r| r.completed_steps.contains(step)))
    }

    fn mark_completed(
        &self,
        task_id: &TaskId,
        step: &str,
        ttl: Duration,
    ) -> Result<(), InfraError> {
        let now = self.clock.now();
        let expires_at = saturating_add(now, ttl);
        let mut records = self.write()?;

        if records.next_sweep.is_none_or(|at| now >= at) {
            Self::sweep(&mut records.by_task, now);
            records.next_sweep = Some(expires_at);
        }

        let record = records
            .by_task
            .entry(task_id.clone())
            .or_insert_with(|| ProgressRecord {
                task_id: task_id.clone(),
                completed_steps: BTreeSet::new(),
                expires_at,
            });

        // An expired record is dead even if not yet purged: start over.
        if record.expires_at <= now {
            record.completed_steps.clear();
        }
        record.completed_steps.insert(step.to_string());
        record.expires_at = expires_at;
        Ok(())
    }

    fn clear(&self, task_id: &TaskId) -> Result<(), InfraError> {
        self.write()?.by_task.remove(task_id);
        Ok(())
    }

    fn completed_steps(&self, task_id: &TaskId) -> Result<BTreeSet<String>, InfraError> {
        Ok(self
            .get(task_id)?
            .map(|r| r.completed_steps)
            .unwrap_or_default())
    }
}
