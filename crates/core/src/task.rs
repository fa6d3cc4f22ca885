//! Task record and lifecycle states.

use serde::{Deserialize, Serialize};

use crate::id::TaskId;

/// A unit of work.
///
/// Wire format is a JSON object with exactly `id`, `payload` and
/// `attempt_count`. The payload is opaque to the pipeline; only steps
/// interpret it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub payload: serde_json::Value,
    /// Number of prior failed attempts. Never decreases while the task is live.
    #[serde(default)]
    pub attempt_count: u32,
}

impl Task {
    /// Create a fresh task (`attempt_count = 0`).
    pub fn new(id: TaskId, payload: serde_json::Value) -> Self {
        Self {
            id,
            payload,
            attempt_count: 0,
        }
    }

    pub fn with_attempt_count(mut self, attempt_count: u32) -> Self {
        self.attempt_count = attempt_count;
        self
    }

    /// Count one more failed attempt and return the new total.
    pub fn record_failure(&mut self) -> u32 {
        self.attempt_count = self.attempt_count.saturating_add(1);
        self.attempt_count
    }
}

/// Lifecycle state of a task.
///
/// `Queued → Processing → {Completed | RetryScheduled | DeadLettered}`, and
/// `RetryScheduled → Queued` once the backoff delay elapses. Redelivery of an
/// unacknowledged task also allows `Processing → Queued`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Queued,
    Processing,
    Completed,
    RetryScheduled,
    DeadLettered,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Queued => "queued",
            TaskState::Processing => "processing",
            TaskState::Completed => "completed",
            TaskState::RetryScheduled => "retry_scheduled",
            TaskState::DeadLettered => "dead_lettered",
        }
    }
}

impl core::fmt::Display for TaskState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str) -> Task {
        Task::new(TaskId::new(id).unwrap(), serde_json::json!({"data": "valid"}))
    }

    #[test]
    fn new_task_has_no_failed_attempts() {
        assert_eq!(task("A").attempt_count, 0);
    }

    #[test]
    fn record_failure_increments_by_one() {
        let mut t = task("A");
        assert_eq!(t.record_failure(), 1);
        assert_eq!(t.record_failure(), 2);
        assert_eq!(t.attempt_count, 2);
    }

    #[test]
    fn wire_format_uses_fixed_field_names() {
        let t = task("C").with_attempt_count(2);
        let json = serde_json::to_value(&t).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"id": "C", "payload": {"data": "valid"}, "attempt_count": 2})
        );

        let decoded: Task =
            serde_json::from_str(r#"{"id":"B","payload":"valid"}"#).unwrap();
        assert_eq!(decoded.attempt_count, 0);
        assert_eq!(decoded.payload, serde_json::json!("valid"));
    }

    #[test]
    fn blank_id_on_the_wire_is_rejected() {
        let decoded = serde_json::from_str::<Task>(r#"{"id":"   ","payload":1}"#);
        assert!(decoded.is_err());
    }

    #[test]
    fn states_use_snake_case_names() {
        assert_eq!(
            serde_json::to_value(TaskState::RetryScheduled).unwrap(),
            serde_json::json!("retry_scheduled")
        );
        assert_eq!(TaskState::DeadLettered.to_string(), "dead_lettered");
    }
}
