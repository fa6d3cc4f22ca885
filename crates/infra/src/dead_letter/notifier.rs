//! Background thread that turns dead-letter outbox entries into alerts.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::alert::AlertDispatcher;
use super::DeadLetterSink;
use crate::error::InfraError;
use crate::shutdown::Shutdown;
use crate::supervision::ReconnectBackoff;

/// Upper bound on outbox entries delivered after shutdown is requested.
const DRAIN_LIMIT: usize = 1_000;

pub struct DeadLetterNotifier {
    sink: Arc<dyn DeadLetterSink>,
    dispatcher: Arc<dyn AlertDispatcher>,
    poll_timeout: Duration,
}

impl DeadLetterNotifier {
    pub fn new(sink: Arc<dyn DeadLetterSink>, dispatcher: Arc<dyn AlertDispatcher>) -> Self {
        Self {
            sink,
            dispatcher,
            poll_timeout: Duration::from_secs(1),
        }
    }

    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    /// Deliver at most one pending alert. Returns `false` if none was waiting.
    ///
    /// Dispatcher errors are logged and the entry is considered handled.
    pub fn deliver_next(&self, timeout: Duration) -> Result<bool, InfraError> {
        let Some(entry) = self.sink.next_alert(timeout)? else {
            return Ok(false);
        };

        match self.dispatcher.notify(&entry) {
            Ok(()) => debug!(task_id = %entry.task.id, "dead-letter alert sent"),
            Err(err) => warn!(
                task_id = %entry.task.id,
                error = %err,
                "dead-letter alert failed; entry stays in the dead-letter queue"
            ),
        }
        Ok(true)
    }

    /// Run until `shutdown` is triggered, then flush what is already waiting.
    pub fn run(self, shutdown: Shutdown) {
        info!("dead-letter notifier started");
        let mut reconnect = ReconnectBackoff::new();

        while !shutdown.is_triggered() {
            match self.deliver_next(self.poll_timeout) {
                Ok(_) => reconnect.reset(),
                Err(err) => {
                    let delay = reconnect.on_failure();
                    warn!(
                        error = %err,
                        failures = reconnect.consecutive_failures(),
                        retry_in_ms = delay.as_millis() as u64,
                        "dead-letter outbox unavailable"
                    );
                    if shutdown.wait(delay) {
                        break;
                    }
                }
            }
        }

        for _ in 0..DRAIN_LIMIT {
            match self.deliver_next(Duration::ZERO) {
                Ok(true) => continue,
                Ok(false) => break,
                Err(err) => {
                    warn!(error = %err, "could not flush dead-letter alerts on shutdown");
                    break;
                }
            }
        }

        info!("dead-letter notifier stopped");
    }
}
