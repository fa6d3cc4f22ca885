//! Redis list-backed dead-letter sink.
//!
//! Entries live in the dead-letter list; the same JSON is pushed to
//! `<list>:alerts` in one `MULTI` so an entry never exists without its alert.
//! An outbox item that does not decode is moved to `<list>:alerts:unparseable`.

use std::time::Duration;

use tracing::instrument;

use relayq_core::{Task, TaskId};

use super::{DeadLetterEntry, DeadLetterSink};
use crate::error::InfraError;
use crate::redis_conn::{RedisConnector, decode_or_set_aside};

const MIN_BLOCK_SECS: f64 = 0.01;

#[derive(Debug, Clone)]
pub struct RedisDeadLetterSink {
    redis: RedisConnector,
    key: String,
    outbox_key: String,
}

impl RedisDeadLetterSink {
    pub fn new(redis: RedisConnector, key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            outbox_key: format!("{key}:alerts"),
            redis,
            key,
        }
    }
}

impl DeadLetterSink for RedisDeadLetterSink {
    #[instrument(skip(self, entry), fields(task_id = %entry.task.id), err)]
    fn push(&self, entry: &DeadLetterEntry) -> Result<(), InfraError> {
        let raw = serde_json::to_string(entry)?;
        let mut conn = self.redis.connection()?;

        redis::pipe()
            .atomic()
            .cmd("RPUSH")
            .arg(&self.key)
            .arg(&raw)
            .ignore()
            .cmd("RPUSH")
            .arg(&self.outbox_key)
            .arg(&raw)
            .ignore()
            .query::<()>(&mut conn)
            .map_err(|e| InfraError::unavailable(format!("dead-letter push failed: {e}")))?;

        Ok(())
    }

    fn next_alert(&self, timeout: Duration) -> Result<Option<DeadLetterEntry>, InfraError> {
        let mut conn = self.redis.connection()?;
        let popped: Option<(String, String)> = redis::cmd("BLPOP")
            .arg(&self.outbox_key)
            .arg(timeout.as_secs_f64().max(MIN_BLOCK_SECS))
            .query(&mut conn)?;

        popped
            .map(|(_key, raw)| decode_or_set_aside(&mut conn, &self.outbox_key, &raw))
            .transpose()
    }

    fn list(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, InfraError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.redis.connection()?;
        let raw: Vec<String> = redis::cmd("LRANGE")
            .arg(&self.key)
            .arg(0)
            .arg(i64::try_from(limit).map_or(-1, |l| l - 1))
            .query(&mut conn)?;

        raw.iter()
            .map(|s| serde_json::from_str(s).map_err(InfraError::from))
            .collect()
    }

    fn len(&self) -> Result<usize, InfraError> {
        let mut conn = self.redis.connection()?;
        let len: usize = redis::cmd("LLEN").arg(&self.key).query(&mut conn)?;
        Ok(len)
    }

    fn replay(&self, task_id: &TaskId) -> Result<Option<Task>, InfraError> {
        let mut conn = self.redis.connection()?;
        let raw: Vec<String> = redis::cmd("LRANGE")
            .arg(&self.key)
            .arg(0)
            .arg(-1)
            .query(&mut conn)?;

        for item in raw {
            // Undecodable entries stay listed for an operator; skip them here.
            let Ok(entry) = serde_json::from_str::<DeadLetterEntry>(&item) else {
                continue;
            };
            if &entry.task.id != task_id {
                continue;
            }
            // Another operator may have replayed it in the meantime.
            let removed: i64 = redis::cmd("LREM")
                .arg(&self.key)
                .arg(1)
                .arg(&item)
                .query(&mut conn)?;
            return Ok((removed == 1).then(|| entry.task.with_attempt_count(0)));
        }
        Ok(None)
    }
}
