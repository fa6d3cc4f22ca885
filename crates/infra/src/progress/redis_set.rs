//! Redis set-backed progress store.
//!
//! One set per task (`task_progress:<id>`), members are step names. Marking a
//! step adds the member and refreshes the key expiry in a single atomic
//! pipeline, so a record can never exist without its safety-net TTL.

use std::collections::BTreeSet;
use std::time::Duration;

use tracing::instrument;

use relayq_core::TaskId;

use super::ProgressStore;
use crate::config::MAX_RECORD_TTL;
use crate::error::InfraError;
use crate::redis_conn::RedisConnector;

/// Default key prefix for progress sets.
const DEFAULT_KEY_PREFIX: &str = "task_progress:";

#[derive(Debug, Clone)]
pub struct RedisProgressStore {
    redis: RedisConnector,
    key_prefix: String,
}

impl RedisProgressStore {
    pub fn new(redis: RedisConnector) -> Self {
        Self {
            redis,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }

    fn key(&self, task_id: &TaskId) -> String {
        format!("{}{}", self.key_prefix, task_id)
    }
}

impl ProgressStore for RedisProgressStore {
    fn has_completed(&self, task_id: &TaskId, step: &str) -> Result<bool, InfraError> {
        let mut conn = self.redis.connection()?;
        let member: bool = redis::cmd("SISMEMBER")
            .arg(self.key(task_id))
            .arg(step)
            .query(&mut conn)?;
        Ok(member)
    }

    #[instrument(skip(self, ttl), fields(task_id = %task_id), err)]
    fn mark_completed(
        &self,
        task_id: &TaskId,
        step: &str,
        ttl: Duration,
    ) -> Result<(), InfraError> {
        let key = self.key(task_id);
        let ttl_ms = redis_ttl_ms(ttl);
        let mut conn = self.redis.connection()?;

        redis::pipe()
            .atomic()
            .cmd("SADD")
            .arg(&key)
            .arg(step)
            .ignore()
            .cmd("PEXPIRE")
            .arg(&key)
            .arg(ttl_ms)
            .ignore()
            .query::<()>(&mut conn)
            .map_err(|e| InfraError::unavailable(format!("SADD/PEXPIRE failed: {e}")))?;

        Ok(())
    }

    fn clear(&self, task_id: &TaskId) -> Result<(), InfraError> {
        let mut conn = self.redis.connection()?;
        let _: i64 = redis::cmd("DEL").arg(self.key(task_id)).query(&mut conn)?;
        Ok(())
    }

    fn completed_steps(&self, task_id: &TaskId) -> Result<BTreeSet<String>, InfraError> {
        let mut conn = self.redis.connection()?;
        let members: Vec<String> = redis::cmd("SMEMBERS")
            .arg(self.key(task_id))
            .query(&mut conn)?;
        Ok(members.into_iter().collect())
    }
}

/// `PEXPIRE` argument for `ttl`, clamped to `[1ms, MAX_RECORD_TTL]`; Redis
/// rejects expiries that overflow its clock.
fn redis_ttl_ms(ttl: Duration) -> u64 {
    u64::try_from(ttl.min(MAX_RECORD_TTL).as_millis())
        .unwrap_or(u64::MAX)
        .max(1)
}
