//! The worker loop: dequeue, run, then complete, retry or dead-letter.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use relayq_core::clock::saturating_add;
use relayq_core::{Clock, Task, TaskState};

use super::SharedStats;
use crate::dead_letter::DeadLetterSink;
use crate::engine::{ExecutionEngine, StepOutcome};
use crate::error::InfraError;
use crate::progress::ProgressStore;
use crate::queue::TaskQueue;
use crate::retry::{DeferredQueue, RetryDecision, RetryScheduler};
use crate::shutdown::Shutdown;
use crate::status::{TaskStatus, TaskStatusStore, record_status};
use crate::supervision::ReconnectBackoff;

/// What happened to one dequeued task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Completed,
    RetryScheduled { delay: Duration },
    DeadLettered,
    /// Shutdown arrived mid-task; the task went back to the queue unchanged.
    Interrupted,
    /// A backend failed mid-attempt; the task went back to the queue
    /// unchanged (or was abandoned if that failed too).
    Returned,
}

/// Everything a worker needs; shared by all workers of a pipeline.
pub(crate) struct WorkerContext {
    pub queue_name: String,
    pub tasks: Arc<dyn TaskQueue>,
    pub deferred: Arc<dyn DeferredQueue>,
    pub dead_letters: Arc<dyn DeadLetterSink>,
    pub status: Arc<dyn TaskStatusStore>,
    pub clock: Arc<dyn Clock>,
    pub engine: ExecutionEngine<Arc<dyn ProgressStore>>,
    pub scheduler: RetryScheduler,
    pub dequeue_timeout: Duration,
    pub stats: SharedStats,
}

/// One worker thread's loop.
pub struct Worker {
    name: String,
    ctx: Arc<WorkerContext>,
}

impl Worker {
    pub(crate) fn new(name: impl Into<String>, ctx: Arc<WorkerContext>) -> Self {
        Self {
            name: name.into(),
            ctx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run until `shutdown` is triggered.
    pub fn run(self, shutdown: Shutdown) {
        info!(worker = %self.name, queue = %self.ctx.queue_name, "worker started");
        let mut reconnect = ReconnectBackoff::new();

        while !shutdown.is_triggered() {
            match self
                .ctx
                .tasks
                .dequeue(&self.ctx.queue_name, self.ctx.dequeue_timeout)
            {
                Ok(Some(task)) => {
                    let disposition = self.handle(task, &shutdown);
                    self.ctx
                        .stats
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .record(&disposition);

                    if disposition == Disposition::Returned {
                        let delay = reconnect.on_failure();
                        if shutdown.wait(delay) {
                            break;
                        }
                    } else {
                        reconnect.reset();
                    }
                }
                Ok(None) => reconnect.reset(),
                // The queue has already set the element aside; the backend is fine.
                Err(err @ InfraError::Codec(_)) => {
                    warn!(worker = %self.name, error = %err, "skipped undecodable task");
                }
                Err(err) => {
                    let delay = reconnect.on_failure();
                    error!(
                        worker = %self.name,
                        error = %err,
                        failures = reconnect.consecutive_failures(),
                        retry_in_ms = delay.as_millis() as u64,
                        "dequeue failed"
                    );
                    if shutdown.wait(delay) {
                        break;
                    }
                }
            }
        }

        info!(worker = %self.name, "worker stopped");
    }

    /// Process one dequeued task to a disposition. Never fails: backend
    /// errors put the task back on the queue untouched.
    pub fn handle(&self, task: Task, shutdown: &Shutdown) -> Disposition {
        debug!(worker = %self.name, task_id = %task.id, attempt = task.attempt_count, "task dequeued");
        self.set_status(&task, TaskState::Processing, None);

        match self.process(&task, shutdown) {
            Ok(disposition) => disposition,
            Err(err) => {
                error!(
                    worker = %self.name,
                    task_id = %task.id,
                    error = %err,
                    "backend failure during attempt; returning task to queue"
                );
                self.return_to_queue(&task);
                Disposition::Returned
            }
        }
    }

    fn process(&self, task: &Task, shutdown: &Shutdown) -> Result<Disposition, InfraError> {
        match self.ctx.engine.run(task, shutdown)? {
            StepOutcome::Completed => {
                self.clear_progress(task);
                self.set_status(task, TaskState::Completed, None);
                info!(worker = %self.name, task_id = %task.id, attempt = task.attempt_count, "task completed");
                Ok(Disposition::Completed)
            }

            StepOutcome::Interrupted { completed_steps } => {
                debug!(
                    worker = %self.name,
                    task_id = %task.id,
                    completed_steps,
                    "shutdown mid-task; handing task back"
                );
                self.return_to_queue(task);
                Ok(Disposition::Interrupted)
            }

            StepOutcome::Failed { step, error } => {
                let reason = format!("step {step} failed: {error}");
                let now = self.ctx.clock.now();
                match self.ctx.scheduler.decide(task.clone(), reason.as_str(), now) {
                    RetryDecision::Requeue { task: next, delay } => {
                        let due_at = saturating_add(now, delay);
                        self.set_status(&next, TaskState::RetryScheduled, Some(reason));
                        self.ctx
                            .deferred
                            .schedule(&self.ctx.queue_name, &next, due_at)?;
                        info!(
                            worker = %self.name,
                            task_id = %next.id,
                            attempt = next.attempt_count,
                            step = %step,
                            error_kind = error.kind(),
                            delay_ms = delay.as_millis() as u64,
                            "attempt failed; retry scheduled"
                        );
                        Ok(Disposition::RetryScheduled { delay })
                    }

                    RetryDecision::DeadLetter(entry) => {
                        self.ctx.dead_letters.push(&entry)?;
                        self.clear_progress(&entry.task);
                        self.set_status(&entry.task, TaskState::DeadLettered, Some(reason));
                        warn!(
                            worker = %self.name,
                            task_id = %entry.task.id,
                            attempt = entry.final_attempt_count,
                            step = %step,
                            error_kind = error.kind(),
                            "retries exhausted; task dead-lettered"
                        );
                        Ok(Disposition::DeadLettered)
                    }
                }
            }
        }
    }

    fn return_to_queue(&self, task: &Task) {
        self.set_status(task, TaskState::Queued, None);
        if let Err(err) = self.ctx.tasks.enqueue(&self.ctx.queue_name, task) {
            error!(
                worker = %self.name,
                task_id = %task.id,
                error = %err,
                "could not return task to queue; abandoned for redelivery"
            );
        }
    }

    fn clear_progress(&self, task: &Task) {
        if let Err(err) = self.ctx.engine.clear_progress(&task.id) {
            warn!(
                worker = %self.name,
                task_id = %task.id,
                error = %err,
                "failed to clear progress; record will expire"
            );
        }
    }

    fn set_status(&self, task: &Task, state: TaskState, detail: Option<String>) {
        let status = TaskStatus::of(task, state, self.ctx.clock.now());
        let status = match detail {
            Some(detail) => status.with_detail(detail),
            None => status,
        };
        record_status(self.ctx.status.as_ref(), status);
    }
}
