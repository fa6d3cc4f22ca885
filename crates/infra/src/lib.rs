//! Infrastructure layer: queues, stores, retry scheduling, dead letters and
//! the worker pool that ties them together.
//!
//! Every backend sits behind a trait with an in-memory implementation; the
//! Redis implementations are compiled in with the `redis` feature.

pub mod config;
pub mod dead_letter;
pub mod engine;
pub mod error;
pub mod progress;
pub mod queue;
pub mod retry;
pub mod shutdown;
pub mod status;
pub mod supervision;
pub mod worker;

#[cfg(feature = "redis")]
pub mod redis_conn;

#[cfg(test)]
mod integration_tests;

pub use config::{ConfigError, PipelineConfig};
pub use engine::{EngineError, ExecutionEngine, FnStep, Step, StepOutcome, step};
pub use error::{InfraError, PipelineError};
pub use shutdown::Shutdown;
pub use worker::{Backends, Pipeline, PipelineHandle, TaskProducer, WorkerStats};
