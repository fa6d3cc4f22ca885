//! Execution engine: runs a task's ordered, named steps exactly once each.
//!
//! Idempotence comes from the progress store, not from the steps: a step that
//! is already recorded for the task is skipped, and a step is recorded only
//! after it returned `Ok`. Re-running a task after a partial failure therefore
//! resumes at the first step that never committed.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use relayq_core::{StepError, Task, TaskId};

use crate::error::InfraError;
use crate::progress::ProgressStore;
use crate::shutdown::Shutdown;

/// One side-effecting unit of a task pipeline.
///
/// `name` must be stable across deployments: it is the key recorded in the
/// progress store.
pub trait Step: Send + Sync {
    fn name(&self) -> &str;

    fn execute(&self, task: &Task) -> Result<(), StepError>;
}

/// Step backed by a closure.
pub struct FnStep<F> {
    name: String,
    f: F,
}

impl<F> Step for FnStep<F>
where
    F: Fn(&Task) -> Result<(), StepError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, task: &Task) -> Result<(), StepError> {
        (self.f)(task)
    }
}

impl<F> fmt::Debug for FnStep<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnStep").field("name", &self.name).finish()
    }
}

/// Build a named step from a closure.
pub fn step<F>(name: impl Into<String>, f: F) -> FnStep<F>
where
    F: Fn(&Task) -> Result<(), StepError> + Send + Sync,
{
    FnStep {
        name: name.into(),
        f,
    }
}

/// Result of one attempt at a task.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// Every step is recorded as committed.
    Completed,
    /// `step` failed; later steps were not attempted.
    Failed { step: String, error: StepError },
    /// Shutdown was requested before the next pending step started.
    Interrupted { completed_steps: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("a pipeline needs at least one step")]
    NoSteps,
    #[error("duplicate step name: {0}")]
    DuplicateStep(String),
}

pub struct ExecutionEngine<P> {
    progress: P,
    progress_ttl: Duration,
    steps: Vec<Arc<dyn Step>>,
}

impl<P: ProgressStore> ExecutionEngine<P> {
    pub fn new(
        progress: P,
        progress_ttl: Duration,
        steps: Vec<Arc<dyn Step>>,
    ) -> Result<Self, EngineError> {
        if steps.is_empty() {
            return Err(EngineError::NoSteps);
        }
        let mut seen = HashSet::new();
        for s in &steps {
            if !seen.insert(s.name().to_string()) {
                return Err(EngineError::DuplicateStep(s.name().to_string()));
            }
        }

        Ok(Self {
            progress,
            progress_ttl,
            steps,
        })
    }

    pub fn step_names(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|s| s.name())
    }

    pub fn progress(&self) -> &P {
        &self.progress
    }

    /// Run one attempt of `task`.
    ///
    /// `Err` means the progress store failed; the attempt says nothing about
    /// the task itself and must not be charged to it.
    pub fn run(&self, task: &Task, shutdown: &Shutdown) -> Result<StepOutcome, InfraError> {
        for (index, s) in self.steps.iter().enumerate() {
            let name = s.name();

            if self.progress.has_completed(&task.id, name)? {
                debug!(task_id = %task.id, step = name, "step already committed; skipping");
                continue;
            }

            if shutdown.is_triggered() {
                return Ok(StepOutcome::Interrupted {
                    completed_steps: index,
                });
            }

            debug!(task_id = %task.id, step = name, attempt = task.attempt_count, "executing step");
            if let Err(error) = s.execute(task) {
                debug!(
                    task_id = %task.id,
                    step = name,
                    error = %error,
                    error_kind = error.kind(),
                    "step failed"
                );
                return Ok(StepOutcome::Failed {
                    step: name.to_string(),
                    error,
                });
            }

            self.progress
                .mark_completed(&task.id, name, self.progress_ttl)?;
        }

        Ok(StepOutcome::Completed)
    }

    /// Drop the task's progress record. Called once the task is terminal.
    pub fn clear_progress(&self, task_id: &TaskId) -> Result<(), InfraError> {
        self.progress.clear(task_id)
    }
}

impl<P> fmt::Debug for ExecutionEngine<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("steps", &self.steps.iter().map(|s| s.name()).collect::<Vec<_>>())
            .field("progress_ttl", &self.progress_ttl)
            .finish()
    }
}
