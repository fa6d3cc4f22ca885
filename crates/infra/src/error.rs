//! Infrastructure error model.

use crate::engine::EngineError;
use crate::retry::PolicyError;

/// Failure of a backend (queue, progress store, dead-letter sink, ...).
///
/// Fatal to the current worker operation only. Workers handle it in their own
/// supervision loop; it never counts as a failed task attempt.
#[derive(Debug, Clone, thiserror::Error)]
pub enum InfraError {
    /// Backend unreachable or a command failed.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// A stored value could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// An in-memory backend lock was poisoned by a panicking thread.
    #[error("lock poisoned: {0}")]
    Poisoned(&'static str),
}

impl InfraError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }
}

impl From<serde_json::Error> for InfraError {
    fn from(err: serde_json::Error) -> Self {
        Self::Codec(err.to_string())
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for InfraError {
    fn from(err: redis::RedisError) -> Self {
        Self::Unavailable(err.to_string())
    }
}

/// Errors raised while assembling or starting a pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error("failed to spawn {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}
