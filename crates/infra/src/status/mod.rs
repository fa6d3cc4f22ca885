//! Short-lived task status board.
//!
//! Lets a front end answer "where is task X?" without touching the queues.
//! Writes are best-effort: a failed status write is logged and never affects
//! how the task itself is processed.

#[cfg(feature = "redis")]
pub mod redis_kv;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use relayq_core::clock::saturating_add;
use relayq_core::{Clock, SystemClock, Task, TaskId, TaskState};

use crate::error::InfraError;

#[cfg(feature = "redis")]
pub use redis_kv::RedisTaskStatusStore;

/// Latest known state of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub task_id: TaskId,
    pub state: TaskState,
    pub attempt_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl TaskStatus {
    pub fn of(task: &Task, state: TaskState, updated_at: DateTime<Utc>) -> Self {
        Self {
            task_id: task.id.clone(),
            state,
            attempt_count: task.attempt_count,
            detail: None,
            updated_at,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Status records keyed by task id; each write resets the record's TTL.
pub trait TaskStatusStore: Send + Sync {
    fn set(&self, status: &TaskStatus) -> Result<(), InfraError>;

    fn get(&self, task_id: &TaskId) -> Result<Option<TaskStatus>, InfraError>;
}

impl<T> TaskStatusStore for Arc<T>
where
    T: TaskStatusStore + ?Sized,
{
    fn set(&self, status: &TaskStatus) -> Result<(), InfraError> {
        (**self).set(status)
    }

    fn get(&self, task_id: &TaskId) -> Result<Option<TaskStatus>, InfraError> {
        (**self).get(task_id)
    }
}

/// Write a status record, logging instead of failing.
pub fn record_status(store: &dyn TaskStatusStore, status: TaskStatus) {
    if let Err(err) = store.set(&status) {
        warn!(
            task_id = %status.task_id,
            state = %status.state,
            error = %err,
            "failed to record task status"
        );
    }
}

#[derive(Debug)]
struct Board {
    records: HashMap<TaskId, (TaskStatus, DateTime<Utc>)>,
    next_sweep: DateTime<Utc>,
}

/// In-memory status board for tests/dev.
///
/// Expired records are hidden on read and evicted by a sweep that runs on
/// write, at most once per TTL.
#[derive(Debug)]
pub struct InMemoryTaskStatusStore {
    board: RwLock<Board>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl InMemoryTaskStatusStore {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            board: RwLock::new(Board {
                records: HashMap::new(),
                next_sweep: saturating_add(clock.now(), ttl),
            }),
            ttl,
            clock,
        }
    }

    /// Records held, expired or not.
    #[cfg(test)]
    fn stored(&self) -> Result<usize, InfraError> {
        Ok(self
            .board
            .read()
            .map_err(|_| InfraError::Poisoned("status store"))?
            .records
            .len())
    }
}

impl TaskStatusStore for InMemoryTaskStatusStore {
    fn set(&self, status: &TaskStatus) -> Result<(), InfraError> {
        let now = self.clock.now();
        let expires_at = saturating_add(now, self.ttl);
        let mut board = self
            .board
            .write()
            .map_err(|_| InfraError::Poisoned("status store"))?;

        if now >= board.next_sweep {
            board.records.retain(|_, (_, until)| *until > now);
            board.next_sweep = expires_at;
        }
        board
            .records
            .insert(status.task_id.clone(), (status.clone(), expires_at));
        Ok(())
    }

    fn get(&self, task_id: &TaskId) -> Result<Option<TaskStatus>, InfraError> {
        let now = self.clock.now();
        let board = self
            .board
            .read()
            .map_err(|_| InfraError::Poisoned("status store"))?;
        Ok(board
            .records
            .get(task_id)
            .filter(|(_, expires_at)| *expires_at > now)
            .map(|(status, _)| status.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relayq_core::ManualClock;

    #[test]
    fn latest_write_wins_and_expires() {
        let clock = Arc::new(ManualClock::default());
        let store = InMemoryTaskStatusStore::with_clock(Duration::from_secs(3600), clock.clone());
        let task = Task::new(TaskId::new("video_1").unwrap(), serde_json::json!({"url": "x"}));

        record_status(&store, TaskStatus::of(&task, TaskState::Queued, clock.now()));
        record_status(
            &store,
            TaskStatus::of(&task, TaskState::Processing, clock.now()).with_detail("transcoding"),
        );

        let status = store.get(&task.id).unwrap().unwrap();
        assert_eq!(status.state, TaskState::Processing);
        assert_eq!(status.detail.as_deref(), Some("transcoding"));

        clock.advance(Duration::from_secs(3601));
        assert!(store.get(&task.id).unwrap().is_none());
    }

    #[test]
    fn expired_records_are_evicted_on_later_writes() {
        let clock = Arc::new(ManualClock::default());
        let store = InMemoryTaskStatusStore::with_clock(Duration::from_secs(1), clock.clone());

        for i in 0..10_000 {
            let task = Task::new(TaskId::new(format!("t{i}")).unwrap(), serde_json::Value::Null);
            store.set(&TaskStatus::of(&task, TaskState::Queued, clock.now())).unwrap();
        }
        assert_eq!(store.stored().unwrap(), 10_000);

        clock.advance(Duration::from_secs(3600));
        let last = Task::new(TaskId::new("last").unwrap(), serde_json::Value::Null);
        store.set(&TaskStatus::of(&last, TaskState::Queued, clock.now())).unwrap();

        assert_eq!(store.stored().unwrap(), 1);
        assert!(store.get(&last.id).unwrap().is_some());
    }
}
