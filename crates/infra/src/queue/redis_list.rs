//! Redis list-backed task queue (`RPUSH` / `BLPOP`).
//!
//! Each element is the JSON-encoded task. `BLPOP` removes the element
//! atomically, so exactly one consumer receives it. An element that does not
//! decode is moved to `<queue>:unparseable`.

use std::time::Duration;

use tracing::instrument;

use relayq_core::Task;

use super::TaskQueue;
use crate::error::InfraError;
use crate::redis_conn::{RedisConnector, decode_or_set_aside};

/// Shortest block Redis accepts for a non-infinite `BLPOP` (0 means forever).
const MIN_BLOCK_SECS: f64 = 0.01;

#[derive(Debug, Clone)]
pub struct RedisTaskQueue {
    redis: RedisConnector,
}

impl RedisTaskQueue {
    pub fn new(redis: RedisConnector) -> Self {
        Self { redis }
    }
}

impl TaskQueue for RedisTaskQueue {
    #[instrument(skip(self, task), fields(task_id = %task.id), err)]
    fn enqueue(&self, queue: &str, task: &Task) -> Result<(), InfraError> {
        let payload = serde_json::to_string(task)?;
        let mut conn = self.redis.connection()?;

        let _: i64 = redis::cmd("RPUSH")
            .arg(queue)
            .arg(payload)
            .query(&mut conn)
            .map_err(|e| InfraError::unavailable(format!("RPUSH failed: {e}")))?;

        Ok(())
    }

    fn dequeue(&self, queue: &str, timeout: Duration) -> Result<Option<Task>, InfraError> {
        let mut conn = self.redis.connection()?;

        let popped: Option<(String, String)> = redis::cmd("BLPOP")
            .arg(queue)
            .arg(timeout.as_secs_f64().max(MIN_BLOCK_SECS))
            .query(&mut conn)
            .map_err(|e| InfraError::unavailable(format!("BLPOP failed: {e}")))?;

        match popped {
            Some((_key, raw)) => decode_or_set_aside(&mut conn, queue, &raw).map(Some),
            None => Ok(None),
        }
    }

    fn len(&self, queue: &str) -> Result<usize, InfraError> {
        let mut conn = self.redis.connection()?;
        let len: usize = redis::cmd("LLEN").arg(queue).query(&mut conn)?;
        Ok(len)
    }
}
