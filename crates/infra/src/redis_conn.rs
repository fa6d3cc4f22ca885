//! Redis connection handle shared by the Redis-backed adapters.
//!
//! The handle owns a `redis::Client` and hands out one connection per
//! operation; the connection is released when it drops at the end of the
//! call. Construct it once at startup and inject clones into each adapter.

use std::fmt::Display;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::{error, warn};

use crate::error::InfraError;

/// Suffix of the list that keeps raw items which failed to decode.
pub const UNPARSEABLE_SUFFIX: &str = ":unparseable";

#[derive(Debug, Clone)]
pub struct RedisConnector {
    client: Arc<redis::Client>,
}

impl RedisConnector {
    /// Parse the URL (e.g. `redis://localhost:6379`). Does not connect yet.
    pub fn open(redis_url: impl AsRef<str>) -> Result<Self, InfraError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| InfraError::unavailable(format!("invalid redis url: {e}")))?;
        Ok(Self {
            client: Arc::new(client),
        })
    }

    /// Acquire a connection for a single operation.
    pub fn connection(&self) -> Result<redis::Connection, InfraError> {
        self.client
            .get_connection()
            .map_err(|e| InfraError::unavailable(format!("redis connection failed: {e}")))
    }

    /// Round-trip check used at startup.
    pub fn ping(&self) -> Result<(), InfraError> {
        let mut conn = self.connection()?;
        let _: String = redis::cmd("PING").query(&mut conn)?;
        Ok(())
    }
}

/// List that keeps undecodable items removed from `key`.
pub fn unparseable_key(key: &str) -> String {
    format!("{key}{UNPARSEABLE_SUFFIX}")
}

/// Decode an item already removed from `key`.
///
/// On failure the raw string is pushed to [`unparseable_key`] before the
/// codec error is returned, so it can be inspected instead of vanishing.
pub(crate) fn decode_or_set_aside<T: DeserializeOwned>(
    conn: &mut redis::Connection,
    key: &str,
    raw: &str,
) -> Result<T, InfraError> {
    serde_json::from_str(raw).map_err(|err| {
        set_aside(conn, key, raw, &err);
        InfraError::from(err)
    })
}

/// Push `raw` to the unparseable list of `key`.
pub(crate) fn set_aside(conn: &mut redis::Connection, key: &str, raw: &str, reason: &dyn Display) {
    let target = unparseable_key(key);
    match redis::cmd("RPUSH").arg(&target).arg(raw).query::<i64>(conn) {
        Ok(_) => warn!(key, target = %target, error = %reason, "undecodable item set aside"),
        Err(push_err) => error!(
            key,
            raw,
            error = %reason,
            push_error = %push_err,
            "undecodable item could not be set aside"
        ),
    }
}
