//! Redis string-backed status board (`SET key json EX ttl`).

use std::time::Duration;

use relayq_core::TaskId;

use super::{TaskStatus, TaskStatusStore};
use crate::config::MAX_RECORD_TTL;
use crate::error::InfraError;
use crate::redis_conn::RedisConnector;

/// Default key prefix for status records.
const DEFAULT_KEY_PREFIX: &str = "job_status:";

#[derive(Debug, Clone)]
pub struct RedisTaskStatusStore {
    redis: RedisConnector,
    key_prefix: String,
    ttl: Duration,
}

impl RedisTaskStatusStore {
    pub fn new(redis: RedisConnector, ttl: Duration) -> Self {
        Self {
            redis,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            ttl,
        }
    }

    fn key(&self, task_id: &TaskId) -> String {
        format!("{}{}", self.key_prefix, task_id)
    }
}

impl TaskStatusStore for RedisTaskStatusStore {
    fn set(&self, status: &TaskStatus) -> Result<(), InfraError> {
        let payload = serde_json::to_string(status)?;
        let ttl_secs = redis_ttl_secs(self.ttl);
        let mut conn = self.redis.connection()?;

        let _: String = redis::cmd("SET")
            .arg(self.key(&status.task_id))
            .arg(payload)
            .arg("EX")
            .arg(ttl_secs)
            .query(&mut conn)
            .map_err(|e| InfraError::unavailable(format!("SET failed: {e}")))?;

        Ok(())
    }

    fn get(&self, task_id: &TaskId) -> Result<Option<TaskStatus>, InfraError> {
        let mut conn = self.redis.connection()?;
        let raw: Option<String> = redis::cmd("GET").arg(self.key(task_id)).query(&mut conn)?;
        raw.map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(InfraError::from)
    }
}

/// `EX` argument for `ttl`, clamped to `[1s, MAX_RECORD_TTL]`.
fn redis_ttl_secs(ttl: Duration) -> u64 {
    ttl.min(MAX_RECORD_TTL).as_secs().max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_is_clamped_to_whole_seconds_within_the_cap() {
        assert_eq!(redis_ttl_secs(Duration::from_millis(200)), 1);
        assert_eq!(redis_ttl_secs(Duration::from_secs(3_600)), 3_600);
        assert_eq!(redis_ttl_secs(Duration::MAX), MAX_RECORD_TTL.as_secs());
    }
}
