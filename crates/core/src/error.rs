//! Core error model.

use thiserror::Error;

/// Core-level error.
///
/// Keep this focused on deterministic validation failures. Infrastructure
/// concerns (queue or store unreachable) belong to `relayq-infra`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// An identifier was invalid (e.g. empty).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl CoreError {
    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}

/// Failure raised by a single processing step.
///
/// The engine cannot tell a hiccup from a corrupt payload, so both kinds are
/// retried identically under the retry policy. The kind is kept for logs and
/// dead-letter reasons only: a poison pill is simply a task whose every
/// attempt fails.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StepError {
    /// Recoverable failure (network, external service hiccup).
    #[error("transient failure: {0}")]
    Transient(String),

    /// Malformed or corrupt task payload.
    #[error("payload error: {0}")]
    Payload(String),
}

impl StepError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn payload(msg: impl Into<String>) -> Self {
        Self::Payload(msg.into())
    }

    /// Short label for structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            StepError::Transient(_) => "transient",
            StepError::Payload(_) => "payload",
        }
    }
}

impl From<serde_json::Error> for StepError {
    fn from(err: serde_json::Error) -> Self {
        Self::Payload(err.to_string())
    }
}
