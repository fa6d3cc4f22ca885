//! Time-ordered set of tasks waiting out their backoff.
//!
//! Retries are parked here instead of sleeping in a worker, so a growing
//! retry backlog never eats worker capacity. The [`RetryTimer`] moves due
//! tasks to the tail of the main queue.
//!
//! [`RetryTimer`]: super::timer::RetryTimer

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use relayq_core::Task;

use crate::error::InfraError;

/// Deferred-retry storage keyed by queue name.
pub trait DeferredQueue: Send + Sync {
    /// Park `task` until `due_at`.
    fn schedule(&self, queue: &str, task: &Task, due_at: DateTime<Utc>) -> Result<(), InfraError>;

    /// Remove and return up to `limit` tasks due at or before `now`,
    /// earliest first. A task is handed to at most one caller.
    fn take_due(
        &self,
        queue: &str,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Task>, InfraError>;

    /// Number of parked tasks.
    fn len(&self, queue: &str) -> Result<usize, InfraError>;

    fn is_empty(&self, queue: &str) -> Result<bool, InfraError> {
        Ok(self.len(queue)? == 0)
    }
}

impl<T> DeferredQueue for Arc<T>
where
    T: DeferredQueue + ?Sized,
{
    fn schedule(&self, queue: &str, task: &Task, due_at: DateTime<Utc>) -> Result<(), InfraError> {
        (**self).schedule(queue, task, due_at)
    }

    fn take_due(
        &self,
        queue: &str,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Task>, InfraError> {
        (**self).take_due(queue, now, limit)
    }

    fn len(&self, queue: &str) -> Result<usize, InfraError> {
        (**self).len(queue)
    }
}

#[derive(Debug)]
struct Parked {
    due_at: DateTime<Utc>,
    seq: u64,
    task: Task,
}

// Reversed so `BinaryHeap` (a max-heap) pops the earliest due time first;
// `seq` keeps insertion order among equal due times.
impl Ord for Parked {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due_at
            .cmp(&self.due_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Parked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Parked {
    fn eq(&self, other: &Self) -> bool {
        self.due_at == other.due_at && self.seq == other.seq
    }
}

impl Eq for Parked {}

#[derive(Debug, Default)]
struct Heaps {
    next_seq: u64,
    by_queue: HashMap<String, BinaryHeap<Parked>>,
}

/// In-memory deferred set for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryDeferredQueue {
    inner: Mutex<Heaps>,
}

impl InMemoryDeferredQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Heaps>, InfraError> {
        self.inner
            .lock()
            .map_err(|_| InfraError::Poisoned("deferred queue"))
    }
}

impl DeferredQueue for InMemoryDeferredQueue {
    fn schedule(&self, queue: &str, task: &Task, due_at: DateTime<Utc>) -> Result<(), InfraError> {
        let mut inner = self.lock()?;
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner
            .by_queue
            .entry(queue.to_string())
            .or_default()
            .push(Parked {
                due_at,
                seq,
                task: task.clone(),
            });
        Ok(())
    }

    fn take_due(
        &self,
        queue: &str,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Task>, InfraError> {
        let mut inner = self.lock()?;
        let Some(heap) = inner.by_queue.get_mut(queue) else {
            return Ok(Vec::new());
        };

        let mut due = Vec::new();
        while due.len() < limit && heap.peek().is_some_and(|p| p.due_at <= now) {
            if let Some(parked) = heap.pop() {
                due.push(parked.task);
            }
        }
        Ok(due)
    }

    fn len(&self, queue: &str) -> Result<usize, InfraError> {
        Ok(self.lock()?.by_queue.get(queue).map_or(0, BinaryHeap::len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relayq_core::TaskId;

    fn task(id: &str) -> Task {
        Task::new(TaskId::new(id).unwrap(), serde_json::Value::Null)
    }

    fn ids(tasks: Vec<Task>) -> Vec<String> {
        tasks.into_iter().map(|t| t.id.to_string()).collect()
    }

    #[test]
    fn only_due_tasks_are_taken_earliest_first() {
        let deferred = InMemoryDeferredQueue::new();
        let now = Utc::now();
        let secs = chrono::Duration::seconds;

        deferred.schedule("q", &task("late"), now + secs(10)).unwrap();
        deferred.schedule("q", &task("soon"), now + secs(2)).unwrap();
        deferred.schedule("q", &task("first"), now + secs(1)).unwrap();

        assert!(deferred.take_due("q", now, 10).unwrap().is_empty());
        assert_eq!(ids(deferred.take_due("q", now + secs(5), 10).unwrap()), vec!["first", "soon"]);
        assert_eq!(deferred.len("q").unwrap(), 1);
        assert_eq!(ids(deferred.take_due("q", now + secs(10), 10).unwrap()), vec!["late"]);
    }

    #[test]
    fn equal_due_times_keep_insertion_order() {
        let deferred = InMemoryDeferredQueue::new();
        let due = Utc::now();
        for id in ["a", "b", "c"] {
            deferred.schedule("q", &task(id), due).unwrap();
        }
        assert_eq!(ids(deferred.take_due("q", due, 10).unwrap()), vec!["a", "b", "c"]);
    }

    #[test]
    fn take_due_respects_limit_and_queue_name() {
        let deferred = InMemoryDeferredQueue::new();
        let now = Utc::now();
        for i in 0..5 {
            deferred.schedule("q", &task(&format!("t{i}")), now).unwrap();
        }
        deferred.schedule("other", &task("x"), now).unwrap();

        assert_eq!(deferred.take_due("q", now, 2).unwrap().len(), 2);
        assert_eq!(deferred.len("q").unwrap(), 3);
        assert_eq!(deferred.len("other").unwrap(), 1);
        assert!(deferred.take_due("missing", now, 2).unwrap().is_empty());
    }
}
