//! Pipeline assembly: backends, worker pool, retry timer and notifier.

use std::sync::{Arc, Mutex};
use std::thread;

use tracing::{error, info};

use relayq_core::{Clock, SystemClock};

use super::producer::TaskProducer;
use super::runner::{Worker, WorkerContext};
use super::{SharedStats, WorkerStats, snapshot};
use crate::config::PipelineConfig;
use crate::dead_letter::{
    AlertDispatcher, DeadLetterNotifier, DeadLetterSink, InMemoryDeadLetterSink,
    LoggingAlertDispatcher,
};
use crate::engine::{ExecutionEngine, Step};
use crate::error::PipelineError;
use crate::progress::{InMemoryProgressStore, ProgressStore};
use crate::queue::{InMemoryTaskQueue, TaskQueue};
use crate::retry::{DeferredQueue, InMemoryDeferredQueue, RetryScheduler, RetryTimer};
use crate::shutdown::Shutdown;
use crate::status::{InMemoryTaskStatusStore, TaskStatusStore};

/// Backend handles a pipeline runs against. Constructed once and injected.
#[derive(Clone)]
pub struct Backends {
    pub tasks: Arc<dyn TaskQueue>,
    pub deferred: Arc<dyn DeferredQueue>,
    pub progress: Arc<dyn ProgressStore>,
    pub dead_letters: Arc<dyn DeadLetterSink>,
    pub status: Arc<dyn TaskStatusStore>,
    pub alerts: Arc<dyn AlertDispatcher>,
    pub clock: Arc<dyn Clock>,
}

impl Backends {
    /// Process-local backends. Nothing survives a restart.
    pub fn in_memory(config: &PipelineConfig) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self {
            tasks: InMemoryTaskQueue::arc(),
            deferred: Arc::new(InMemoryDeferredQueue::new()),
            progress: Arc::new(InMemoryProgressStore::with_clock(clock.clone())),
            dead_letters: InMemoryDeadLetterSink::arc(),
            status: Arc::new(InMemoryTaskStatusStore::with_clock(
                config.status_ttl,
                clock.clone(),
            )),
            alerts: Arc::new(LoggingAlertDispatcher),
            clock,
        }
    }

    /// Redis-backed queue, deferred set, progress, dead letters and status.
    #[cfg(feature = "redis")]
    pub fn redis(
        config: &PipelineConfig,
        redis: crate::redis_conn::RedisConnector,
    ) -> Self {
        use crate::dead_letter::RedisDeadLetterSink;
        use crate::progress::RedisProgressStore;
        use crate::queue::RedisTaskQueue;
        use crate::retry::RedisDeferredQueue;
        use crate::status::RedisTaskStatusStore;

        Self {
            tasks: Arc::new(RedisTaskQueue::new(redis.clone())),
            deferred: Arc::new(RedisDeferredQueue::new(redis.clone())),
            progress: Arc::new(RedisProgressStore::new(redis.clone())),
            dead_letters: Arc::new(RedisDeadLetterSink::new(
                redis.clone(),
                config.dead_letter_queue.clone(),
            )),
            status: Arc::new(RedisTaskStatusStore::new(redis, config.status_ttl)),
            alerts: Arc::new(LoggingAlertDispatcher),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_alerts(mut self, alerts: Arc<dyn AlertDispatcher>) -> Self {
        self.alerts = alerts;
        self
    }
}

/// A configured, not yet running pipeline.
pub struct Pipeline {
    config: PipelineConfig,
    backends: Backends,
    steps: Vec<Arc<dyn Step>>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, backends: Backends) -> Self {
        Self {
            config,
            backends,
            steps: Vec::new(),
        }
    }

    /// Append a step; steps run in registration order.
    pub fn with_step(mut self, step: impl Step + 'static) -> Self {
        self.steps.push(Arc::new(step));
        self
    }

    /// Producer bound to this pipeline's queue and backends.
    pub fn producer(&self) -> TaskProducer {
        TaskProducer::new(self.config.queue.clone(), &self.backends)
    }

    /// Start workers, the retry timer and the dead-letter notifier.
    pub fn spawn(self) -> Result<PipelineHandle, PipelineError> {
        let Pipeline {
            config,
            backends,
            steps,
        } = self;

        let scheduler = RetryScheduler::new(config.retry.clone())?;
        let engine = ExecutionEngine::new(backends.progress.clone(), config.progress_ttl, steps)?;
        let stats: SharedStats = Arc::new(Mutex::new(WorkerStats::default()));

        let ctx = Arc::new(WorkerContext {
            queue_name: config.queue.clone(),
            tasks: backends.tasks.clone(),
            deferred: backends.deferred.clone(),
            dead_letters: backends.dead_letters.clone(),
            status: backends.status.clone(),
            clock: backends.clock.clone(),
            engine,
            scheduler,
            dequeue_timeout: config.dequeue_timeout,
            stats: stats.clone(),
        });

        let mut handle = PipelineHandle {
            shutdown: Shutdown::new(),
            threads: Vec::with_capacity(config.workers + 2),
            stats,
        };

        for i in 0..config.workers {
            let worker = Worker::new(format!("relayq-worker-{i}"), ctx.clone());
            handle.spawn_thread(worker.name().to_string(), move |s| worker.run(s))?;
        }

        let timer = RetryTimer::new(
            config.queue.clone(),
            backends.tasks.clone(),
            backends.deferred.clone(),
            backends.status.clone(),
            backends.clock.clone(),
        )
        .with_tick(config.timer_tick);
        handle.spawn_thread("relayq-retry-timer".to_string(), move |s| timer.run(s))?;

        let notifier = DeadLetterNotifier::new(backends.dead_letters.clone(), backends.alerts)
            .with_poll_timeout(config.dequeue_timeout);
        handle.spawn_thread("relayq-dlq-notifier".to_string(), move |s| notifier.run(s))?;

        info!(
            queue = %config.queue,
            workers = config.workers,
            max_attempts = config.retry.max_attempts,
            "pipeline started"
        );
        Ok(handle)
    }
}

/// Handle to a running pipeline.
#[derive(Debug)]
pub struct PipelineHandle {
    shutdown: Shutdown,
    threads: Vec<thread::JoinHandle<()>>,
    stats: SharedStats,
}

impl PipelineHandle {
    /// Snapshot of the statistics so far.
    pub fn stats(&self) -> WorkerStats {
        snapshot(&self.stats)
    }

    /// Request graceful shutdown and wait for every thread to stop.
    pub fn shutdown(mut self) -> WorkerStats {
        self.stop();
        let stats = self.stats();
        info!(
            completed = stats.tasks_completed,
            dead_lettered = stats.tasks_dead_lettered,
            retries = stats.retries_scheduled,
            "pipeline stopped"
        );
        stats
    }

    fn stop(&mut self) {
        self.shutdown.trigger();
        for join in self.threads.drain(..) {
            let name = join.thread().name().unwrap_or("unnamed").to_string();
            if join.join().is_err() {
                error!(thread = %name, "pipeline thread panicked");
            }
        }
    }

    fn spawn_thread<F>(&mut self, name: String, body: F) -> Result<(), PipelineError>
    where
        F: FnOnce(Shutdown) + Send + 'static,
    {
        let shutdown = self.shutdown.clone();
        match thread::Builder::new()
            .name(name.clone())
            .spawn(move || body(shutdown))
        {
            Ok(join) => {
                self.threads.push(join);
                Ok(())
            }
            Err(source) => {
                // Do not leave half a pipeline running.
                self.stop();
                Err(PipelineError::Spawn { name, source })
            }
        }
    }
}

impl Drop for PipelineHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
