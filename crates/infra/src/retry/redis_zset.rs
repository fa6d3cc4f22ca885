//! Redis sorted-set deferred retries.
//!
//! Score is the due time in epoch milliseconds. Due members are claimed by a
//! Lua script that reads and removes them in one step, so concurrent timers
//! never promote the same member twice and a dropped connection never leaves
//! a batch half-claimed. A claimed member that does not decode is moved to
//! `<queue>:deferred:unparseable`; the rest of the batch is still returned.

use chrono::{DateTime, Utc};
use redis::Script;

use relayq_core::Task;

use super::deferred::DeferredQueue;
use crate::error::InfraError;
use crate::redis_conn::{RedisConnector, set_aside};

/// Suffix appended to the main queue name to form the deferred set key.
pub const DEFERRED_SUFFIX: &str = ":deferred";

/// KEYS[1] = set, ARGV[1] = max score, ARGV[2] = limit.
const CLAIM_DUE: &str = r"
local members = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, ARGV[2])
for _, member in ipairs(members) do
    redis.call('ZREM', KEYS[1], member)
end
return members
";

#[derive(Debug, Clone)]
pub struct RedisDeferredQueue {
    redis: RedisConnector,
    claim_due: Script,
}

impl RedisDeferredQueue {
    pub fn new(redis: RedisConnector) -> Self {
        Self {
            redis,
            claim_due: Script::new(CLAIM_DUE),
        }
    }
}

fn deferred_key(queue: &str) -> String {
    format!("{queue}{DEFERRED_SUFFIX}")
}

/// Split claimed members into tasks and the raw members that failed to decode.
fn decode_claimed(members: Vec<String>) -> (Vec<Task>, Vec<(String, serde_json::Error)>) {
    let mut tasks = Vec::with_capacity(members.len());
    let mut undecodable = Vec::new();
    for member in members {
        match serde_json::from_str(&member) {
            Ok(task) => tasks.push(task),
            Err(err) => undecodable.push((member, err)),
        }
    }
    (tasks, undecodable)
}

impl DeferredQueue for RedisDeferredQueue {
    fn schedule(&self, queue: &str, task: &Task, due_at: DateTime<Utc>) -> Result<(), InfraError> {
        let member = serde_json::to_string(task)?;
        let mut conn = self.redis.connection()?;

        let _: i64 = redis::cmd("ZADD")
            .arg(deferred_key(queue))
            .arg(due_at.timestamp_millis())
            .arg(member)
            .query(&mut conn)
            .map_err(|e| InfraError::unavailable(format!("ZADD failed: {e}")))?;

        Ok(())
    }

    fn take_due(
        &self,
        queue: &str,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Task>, InfraError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let key = deferred_key(queue);
        let mut conn = self.redis.connection()?;

        let members: Vec<String> = self
            .claim_due
            .key(&key)
            .arg(now.timestamp_millis())
            .arg(limit)
            .invoke(&mut conn)
            .map_err(|e| InfraError::unavailable(format!("claiming due retries failed: {e}")))?;

        let (due, undecodable) = decode_claimed(members);
        for (raw, err) in undecodable {
            set_aside(&mut conn, &key, &raw, &err);
        }
        Ok(due)
    }

    fn len(&self, queue: &str) -> Result<usize, InfraError> {
        let mut conn = self.redis.connection()?;
        let len: usize = redis::cmd("ZCARD").arg(deferred_key(queue)).query(&mut conn)?;
        Ok(len)
    }
}
