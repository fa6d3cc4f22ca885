//! Background thread that moves due retries back onto the main queue.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use relayq_core::{Clock, TaskState};

use super::deferred::DeferredQueue;
use crate::error::InfraError;
use crate::queue::TaskQueue;
use crate::shutdown::Shutdown;
use crate::status::{TaskStatus, TaskStatusStore, record_status};
use crate::supervision::ReconnectBackoff;

/// Most tasks moved per pass; a full batch triggers another pass right away.
const PROMOTE_BATCH: usize = 100;

/// Promotes due tasks from the deferred set to the tail of the main queue.
///
/// Requeued tasks go to the tail, behind anything already waiting.
pub struct RetryTimer {
    queue_name: String,
    tasks: Arc<dyn TaskQueue>,
    deferred: Arc<dyn DeferredQueue>,
    status: Arc<dyn TaskStatusStore>,
    clock: Arc<dyn Clock>,
    tick: Duration,
}

impl RetryTimer {
    pub fn new(
        queue_name: impl Into<String>,
        tasks: Arc<dyn TaskQueue>,
        deferred: Arc<dyn DeferredQueue>,
        status: Arc<dyn TaskStatusStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            queue_name: queue_name.into(),
            tasks,
            deferred,
            status,
            clock,
            tick: Duration::from_millis(100),
        }
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Move one batch of due tasks. Returns how many were requeued.
    ///
    /// If the main queue rejects a task, it and the rest of the batch are
    /// parked again as due now and the error is returned.
    pub fn promote_due(&self) -> Result<usize, InfraError> {
        let now = self.clock.now();
        let due = self.deferred.take_due(&self.queue_name, now, PROMOTE_BATCH)?;

        let mut promoted = 0;
        let mut pending = due.into_iter();
        while let Some(task) = pending.next() {
            record_status(
                self.status.as_ref(),
                TaskStatus::of(&task, TaskState::Queued, now),
            );
            if let Err(err) = self.tasks.enqueue(&self.queue_name, &task) {
                for unsent in std::iter::once(task).chain(pending) {
                    record_status(
                        self.status.as_ref(),
                        TaskStatus::of(&unsent, TaskState::RetryScheduled, now),
                    );
                    if let Err(park_err) = self.deferred.schedule(&self.queue_name, &unsent, now) {
                        error!(
                            task_id = %unsent.id,
                            attempt_count = unsent.attempt_count,
                            error = %park_err,
                            "failed to re-park retry; task lost"
                        );
                    }
                }
                return Err(err);
            }

            debug!(task_id = %task.id, attempt_count = task.attempt_count, "retry requeued");
            promoted += 1;
        }

        Ok(promoted)
    }

    /// Run until `shutdown` is triggered.
    pub fn run(self, shutdown: Shutdown) {
        info!(queue = %self.queue_name, "retry timer started");
        let mut reconnect = ReconnectBackoff::new();

        while !shutdown.is_triggered() {
            let pause = match self.promote_due() {
                Ok(promoted) => {
                    reconnect.reset();
                    if promoted == PROMOTE_BATCH {
                        // Possibly more due; go again right away.
                        continue;
                    }
                    self.tick
                }
                Err(err) => {
                    let delay = reconnect.on_failure();
                    warn!(
                        queue = %self.queue_name,
                        error = %err,
                        failures = reconnect.consecutive_failures(),
                        retry_in_ms = delay.as_millis() as u64,
                        "retry timer backend failure"
                    );
                    delay
                }
            };

            if shutdown.wait(pause) {
                break;
            }
        }

        info!(queue = %self.queue_name, "retry timer stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::InMemoryTaskQueue;
    use crate::retry::InMemoryDeferredQueue;
    use crate::status::InMemoryTaskStatusStore;
    use relayq_core::{ManualClock, Task, TaskId};
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Queue that can be switched into a failing state.
    #[derive(Default)]
    struct FlakyQueue {
        inner: InMemoryTaskQueue,
        down: AtomicBool,
    }

    impl TaskQueue for FlakyQueue {
        fn enqueue(&self, queue: &str, task: &Task) -> Result<(), InfraError> {
            if self.down.load(Ordering::SeqCst) {
                return Err(InfraError::unavailable("connection refused"));
            }
            self.inner.enqueue(queue, task)
        }

        fn dequeue(&self, queue: &str, timeout: Duration) -> Result<Option<Task>, InfraError> {
            self.inner.dequeue(queue, timeout)
        }

        fn len(&self, queue: &str) -> Result<usize, InfraError> {
            self.inner.len(queue)
        }
    }

    struct Fixture {
        clock: Arc<ManualClock>,
        queue: Arc<FlakyQueue>,
        deferred: Arc<InMemoryDeferredQueue>,
        status: Arc<InMemoryTaskStatusStore>,
        timer: RetryTimer,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::default());
        let queue = Arc::new(FlakyQueue::default());
        let deferred = Arc::new(InMemoryDeferredQueue::new());
        let status = Arc::new(InMemoryTaskStatusStore::with_clock(
            Duration::from_secs(3600),
            clock.clone(),
        ));
        let timer = RetryTimer::new(
            "tasks",
            queue.clone(),
            deferred.clone(),
            status.clone(),
            clock.clone(),
        );
        Fixture {
            clock,
            queue,
            deferred,
            status,
            timer,
        }
    }

    fn task(id: &str, attempts: u32) -> Task {
        Task::new(TaskId::new(id).unwrap(), serde_json::json!({"id": id})).with_attempt_count(attempts)
    }

    #[test]
    fn promotes_only_due_tasks_to_the_tail() {
        let f = fixture();
        let now = f.clock.now();
        f.queue.enqueue("tasks", &task("waiting", 0)).unwrap();
        f.deferred
            .schedule("tasks", &task("C", 1), now + chrono::Duration::seconds(1))
            .unwrap();

        assert_eq!(f.timer.promote_due().unwrap(), 0);

        f.clock.advance(Duration::from_millis(1000));
        assert_eq!(f.timer.promote_due().unwrap(), 1);

        let queued: Vec<_> = f
            .queue
            .inner
            .snapshot("tasks")
            .unwrap()
            .into_iter()
            .map(|t| (t.id.to_string(), t.attempt_count))
            .collect();
        assert_eq!(queued, vec![("waiting".to_string(), 0), ("C".to_string(), 1)]);

        let status = f.status.get(&TaskId::new("C").unwrap()).unwrap().unwrap();
        assert_eq!(status.state, TaskState::Queued);
    }

    #[test]
    fn failed_enqueue_parks_tasks_again() {
        let f = fixture();
        let now = f.clock.now();
        f.deferred.schedule("tasks", &task("a", 1), now).unwrap();
        f.deferred.schedule("tasks", &task("b", 2), now).unwrap();

        f.queue.down.store(true, Ordering::SeqCst);
        assert!(f.timer.promote_due().is_err());
        assert_eq!(f.deferred.len("tasks").unwrap(), 2);

        f.queue.down.store(false, Ordering::SeqCst);
        assert_eq!(f.timer.promote_due().unwrap(), 2);
        assert!(f.deferred.is_empty("tasks").unwrap());
    }

    #[test]
    fn run_stops_on_shutdown() {
        let f = fixture();
        let shutdown = Shutdown::new();
        let remote = shutdown.clone();
        let timer = f.timer.with_tick(Duration::from_millis(5));

        let join = std::thread::spawn(move || timer.run(remote));
        shutdown.trigger();
        join.join().unwrap();
    }
}
