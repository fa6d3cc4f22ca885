//! Alerting for dead-lettered tasks.

use std::sync::Arc;

use tracing::warn;

use super::DeadLetterEntry;

#[derive(Debug, Clone, thiserror::Error)]
pub enum AlertError {
    #[error("alert delivery failed: {0}")]
    Delivery(String),
}

/// External collaborator told about every dead-lettered task.
///
/// Best-effort: the notifier logs a returned error and moves on.
pub trait AlertDispatcher: Send + Sync {
    fn notify(&self, entry: &DeadLetterEntry) -> Result<(), AlertError>;
}

impl<T> AlertDispatcher for Arc<T>
where
    T: AlertDispatcher + ?Sized,
{
    fn notify(&self, entry: &DeadLetterEntry) -> Result<(), AlertError> {
        (**self).notify(entry)
    }
}

/// Rendered operator alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertMessage {
    pub subject: String,
    pub body: String,
}

impl AlertMessage {
    pub fn from_entry(entry: &DeadLetterEntry) -> Self {
        let payload = serde_json::to_string_pretty(&entry.task.payload)
            .unwrap_or_else(|_| entry.task.payload.to_string());

        Self {
            subject: format!("[DLQ] Task {} requires manual intervention", entry.task.id),
            body: format!(
                "Task {} was moved to the dead-letter queue.\n\
                 Attempts: {}\n\
                 Reason: {}\n\
                 Dead-lettered at: {}\n\
                 Payload:\n{}\n",
                entry.task.id,
                entry.final_attempt_count,
                entry.failure_reason,
                entry.dead_lettered_at.to_rfc3339(),
                payload,
            ),
        }
    }
}

/// Writes alerts to the log. Used when no alert transport is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingAlertDispatcher;

impl AlertDispatcher for LoggingAlertDispatcher {
    fn notify(&self, entry: &DeadLetterEntry) -> Result<(), AlertError> {
        let message = AlertMessage::from_entry(entry);
        warn!(
            task_id = %entry.task.id,
            attempt_count = entry.final_attempt_count,
            subject = %message.subject,
            "dead-letter alert (no alert transport configured)"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relayq_core::{Task, TaskId};

    #[test]
    fn message_names_task_reason_and_payload() {
        let task = Task::new(TaskId::new("order_2").unwrap(), serde_json::json!({"sku": "X-1"}))
            .with_attempt_count(3);
        let entry = DeadLetterEntry::new(task, "inventory service timeout", chrono::Utc::now());

        let message = AlertMessage::from_entry(&entry);
        assert_eq!(message.subject, "[DLQ] Task order_2 requires manual intervention");
        assert!(message.body.contains("Attempts: 3"));
        assert!(message.body.contains("Reason: inventory service timeout"));
        assert!(message.body.contains("\"sku\": \"X-1\""));

        assert!(LoggingAlertDispatcher.notify(&entry).is_ok());
    }
}
