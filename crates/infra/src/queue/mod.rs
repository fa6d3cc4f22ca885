//! Task queue abstraction.
//!
//! The queue is treated as a given: a reliable, blocking, multi-producer /
//! multi-consumer FIFO per queue name. One `dequeue` hands a task to exactly
//! one caller. Delivery is at-least-once across crashes, so consumers must be
//! idempotent; the pipeline gets that from the progress store, not from the
//! queue.

#[cfg(feature = "redis")]
pub mod redis_list;

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use relayq_core::Task;

use crate::error::InfraError;

#[cfg(feature = "redis")]
pub use redis_list::RedisTaskQueue;

/// Reliable FIFO task queue.
pub trait TaskQueue: Send + Sync {
    /// Append `task` to the tail of `queue`. Returns once durably accepted.
    fn enqueue(&self, queue: &str, task: &Task) -> Result<(), InfraError>;

    /// Block up to `timeout` for the head of `queue`.
    ///
    /// `Ok(None)` means the timeout elapsed with nothing to deliver.
    fn dequeue(&self, queue: &str, timeout: Duration) -> Result<Option<Task>, InfraError>;

    /// Number of tasks currently waiting in `queue`.
    fn len(&self, queue: &str) -> Result<usize, InfraError>;

    fn is_empty(&self, queue: &str) -> Result<bool, InfraError> {
        Ok(self.len(queue)? == 0)
    }
}

impl<T> TaskQueue for Arc<T>
where
    T: TaskQueue + ?Sized,
{
    fn enqueue(&self, queue: &str, task: &Task) -> Result<(), InfraError> {
        (**self).enqueue(queue, task)
    }

    fn dequeue(&self, queue: &str, timeout: Duration) -> Result<Option<Task>, InfraError> {
        (**self).dequeue(queue, timeout)
    }

    fn len(&self, queue: &str) -> Result<usize, InfraError> {
        (**self).len(queue)
    }
}

/// In-memory queue for tests/dev.
///
/// - Blocking pop via condvar (no busy polling)
/// - Not durable: contents are lost with the process
#[derive(Debug, Default)]
pub struct InMemoryTaskQueue {
    queues: Mutex<HashMap<String, VecDeque<Task>>>,
    available: Condvar,
}

impl InMemoryTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Copy of the waiting tasks, head first.
    pub fn snapshot(&self, queue: &str) -> Result<Vec<Task>, InfraError> {
        let queues = self.queues.lock().map_err(|_| InfraError::Poisoned("task queue"))?;
        Ok(queues
            .get(queue)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default())
    }
}

impl TaskQueue for InMemoryTaskQueue {
    fn enqueue(&self, queue: &str, task: &Task) -> Result<(), InfraError> {
        let mut queues = self.queues.lock().map_err(|_| InfraError::Poisoned("task queue"))?;
        queues
            .entry(queue.to_string())
            .or_default()
            .push_back(task.clone());
        // Waiters may be blocked on other queue names; wake all of them.
        self.available.notify_all();
        Ok(())
    }

    fn dequeue(&self, queue: &str, timeout: Duration) -> Result<Option<Task>, InfraError> {
        let deadline = Instant::now() + timeout;
        let mut queues = self.queues.lock().map_err(|_| InfraError::Poisoned("task queue"))?;

        loop {
            if let Some(task) = queues.get_mut(queue).and_then(VecDeque::pop_front) {
                return Ok(Some(task));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }

            let (guard, _) = self
                .available
                .wait_timeout(queues, deadline - now)
                .map_err(|_| InfraError::Poisoned("task queue"))?;
            queues = guard;
        }
    }

    fn len(&self, queue: &str) -> Result<usize, InfraError> {
        let queues = self.queues.lock().map_err(|_| InfraError::Poisoned("task queue"))?;
        Ok(queues.get(queue).map_or(0, VecDeque::len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relayq_core::TaskId;
    use std::collections::HashSet;

    fn task(id: &str) -> Task {
        Task::new(TaskId::new(id).unwrap(), serde_json::json!({"data": "valid"}))
    }

    #[test]
    fn fifo_per_queue() {
        let q = InMemoryTaskQueue::new();
        for id in ["A", "B", "C"] {
            q.enqueue("task_queue", &task(id)).unwrap();
        }
        q.enqueue("other", &task("X")).unwrap();

        let order: Vec<_> = (0..3)
            .map(|_| {
                q.dequeue("task_queue", Duration::ZERO)
                    .unwrap()
                    .unwrap()
                    .id
                    .to_string()
            })
            .collect();
        assert_eq!(order, vec!["A", "B", "C"]);
        assert_eq!(q.len("other").unwrap(), 1);
    }

    #[test]
    fn reinsertion_goes_to_the_tail() {
        let q = InMemoryTaskQueue::new();
        q.enqueue("q", &task("C")).unwrap();
        q.enqueue("q", &task("D")).unwrap();

        let c = q.dequeue("q", Duration::ZERO).unwrap().unwrap();
        q.enqueue("q", &c.with_attempt_count(1)).unwrap();

        let ids: Vec<_> = q
            .snapshot("q")
            .unwrap()
            .into_iter()
            .map(|t| t.id.to_string())
            .collect();
        assert_eq!(ids, vec!["D", "C"]);
    }

    #[test]
    fn dequeue_times_out_on_empty_queue() {
        let q = InMemoryTaskQueue::new();
        let started = Instant::now();
        assert!(q.dequeue("q", Duration::from_millis(20)).unwrap().is_none());
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn blocked_consumer_wakes_on_enqueue() {
        let q = InMemoryTaskQueue::arc();
        let consumer = {
            let q = q.clone();
            std::thread::spawn(move || q.dequeue("q", Duration::from_secs(5)).unwrap())
        };

        std::thread::sleep(Duration::from_millis(20));
        q.enqueue("q", &task("A")).unwrap();

        let got = consumer.join().unwrap().unwrap();
        assert_eq!(got.id.as_str(), "A");
    }

    #[test]
    fn each_task_is_delivered_to_exactly_one_consumer() {
        let q = InMemoryTaskQueue::arc();
        for i in 0..200 {
            q.enqueue("q", &task(&format!("t{i}"))).unwrap();
        }

        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let q = q.clone();
                std::thread::spawn(move || {
                    let mut seen = Vec::new();
                    while let Some(t) = q.dequeue("q", Duration::from_millis(10)).unwrap() {
                        seen.push(t.id.to_string());
                    }
                    seen
                })
            })
            .collect();

        let all: Vec<String> = consumers
            .into_iter()
            .flat_map(|c| c.join().unwrap())
            .collect();
        let unique: HashSet<_> = all.iter().cloned().collect();
        assert_eq!(all.len(), 200);
        assert_eq!(unique.len(), 200);
    }
}
