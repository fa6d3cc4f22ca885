//! Worker loop, worker pool and producer.

pub mod pool;
pub mod producer;
pub mod runner;

use std::sync::{Arc, Mutex};

use serde::Serialize;

pub use pool::{Backends, Pipeline, PipelineHandle};
pub use producer::TaskProducer;
pub use runner::{Disposition, Worker};

/// Pipeline runtime statistics, shared by every worker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    /// Tasks taken off the queue.
    pub tasks_dequeued: u64,
    pub tasks_completed: u64,
    /// Failed attempts that were scheduled for another try.
    pub retries_scheduled: u64,
    pub tasks_dead_lettered: u64,
    /// Tasks handed back to the queue because of shutdown.
    pub tasks_interrupted: u64,
    /// Tasks handed back because a backend failed mid-attempt.
    pub infra_failures: u64,
}

impl WorkerStats {
    fn record(&mut self, disposition: &Disposition) {
        self.tasks_dequeued += 1;
        match disposition {
            Disposition::Completed => self.tasks_completed += 1,
            Disposition::RetryScheduled { .. } => self.retries_scheduled += 1,
            Disposition::DeadLettered => self.tasks_dead_lettered += 1,
            Disposition::Interrupted => self.tasks_interrupted += 1,
            Disposition::Returned => self.infra_failures += 1,
        }
    }
}

pub(crate) type SharedStats = Arc<Mutex<WorkerStats>>;

pub(crate) fn snapshot(stats: &SharedStats) -> WorkerStats {
    stats.lock().unwrap_or_else(|e| e.into_inner()).clone()
}
