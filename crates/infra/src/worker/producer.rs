//! Producer side: put new tasks on the queue and replay dead letters.

use std::sync::Arc;

use tracing::{debug, info};

use relayq_core::{Clock, Task, TaskId, TaskState};

use super::pool::Backends;
use crate::dead_letter::DeadLetterSink;
use crate::error::InfraError;
use crate::queue::TaskQueue;
use crate::status::{TaskStatus, TaskStatusStore, record_status};

/// Cloneable enqueue handle. Safe to use from many threads at once.
#[derive(Clone)]
pub struct TaskProducer {
    queue_name: String,
    tasks: Arc<dyn TaskQueue>,
    dead_letters: Arc<dyn DeadLetterSink>,
    status: Arc<dyn TaskStatusStore>,
    clock: Arc<dyn Clock>,
}

impl TaskProducer {
    pub fn new(queue_name: impl Into<String>, backends: &Backends) -> Self {
        Self {
            queue_name: queue_name.into(),
            tasks: backends.tasks.clone(),
            dead_letters: backends.dead_letters.clone(),
            status: backends.status.clone(),
            clock: backends.clock.clone(),
        }
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Enqueue a fresh task (`attempt_count = 0`).
    pub fn submit(&self, id: TaskId, payload: serde_json::Value) -> Result<Task, InfraError> {
        let task = Task::new(id, payload);
        self.submit_task(&task)?;
        Ok(task)
    }

    /// Enqueue `task` as is.
    pub fn submit_task(&self, task: &Task) -> Result<(), InfraError> {
        // Status first: a worker may pick the task up before enqueue returns.
        record_status(
            self.status.as_ref(),
            TaskStatus::of(task, TaskState::Queued, self.clock.now()),
        );
        self.tasks.enqueue(&self.queue_name, task)?;
        debug!(task_id = %task.id, queue = %self.queue_name, "task enqueued");
        Ok(())
    }

    /// Move a dead-lettered task back onto the queue with a fresh attempt
    /// budget. Returns `None` if no entry exists for `task_id`.
    ///
    /// The task is enqueued before its entry is removed, so a failure in
    /// between can at worst run it twice, never lose it.
    pub fn replay_dead_letter(&self, task_id: &TaskId) -> Result<Option<Task>, InfraError> {
        let Some(entry) = self
            .dead_letters
            .list(usize::MAX)?
            .into_iter()
            .find(|e| &e.task.id == task_id)
        else {
            return Ok(None);
        };

        let task = entry.task.with_attempt_count(0);
        self.submit_task(&task)?;
        self.dead_letters.replay(task_id)?;

        info!(task_id = %task_id, queue = %self.queue_name, "dead letter replayed");
        Ok(Some(task))
    }
}
