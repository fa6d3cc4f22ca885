//! Pipeline configuration.
//!
//! Defaults match a stock deployment; `from_env` overrides them from
//! `RELAYQ_*` variables and `REDIS_URL`.

use std::time::Duration;

use crate::retry::{BackoffStrategy, PolicyError, RetryPolicy};

/// Longest lifetime accepted for progress and status records.
pub const MAX_RECORD_TTL: Duration = Duration::from_secs(365 * 86_400);

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?} ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error(transparent)]
    Policy(#[from] PolicyError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Main task queue.
    pub queue: String,
    /// Dead-letter queue.
    pub dead_letter_queue: String,
    pub retry: RetryPolicy,
    /// Lifetime of a progress record after its last mark.
    pub progress_ttl: Duration,
    /// Lifetime of a status record after its last write.
    pub status_ttl: Duration,
    /// Number of worker threads.
    pub workers: usize,
    /// How long one dequeue blocks; bounds shutdown latency.
    pub dequeue_timeout: Duration,
    /// Retry timer poll interval.
    pub timer_tick: Duration,
    /// Redis URL; `None` selects the in-memory backends.
    pub redis_url: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue: "task_queue".to_string(),
            dead_letter_queue: "dead-letter-queue".to_string(),
            retry: RetryPolicy::default(),
            progress_ttl: Duration::from_secs(86_400),
            status_ttl: Duration::from_secs(3_600),
            workers: 2,
            dequeue_timeout: Duration::from_secs(1),
            timer_tick: Duration::from_millis(100),
            redis_url: None,
        }
    }
}

impl PipelineConfig {
    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    pub fn with_dead_letter_queue(mut self, queue: impl Into<String>) -> Self {
        self.dead_letter_queue = queue.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_progress_ttl(mut self, ttl: Duration) -> Self {
        self.progress_ttl = ttl;
        self
    }

    pub fn with_status_ttl(mut self, ttl: Duration) -> Self {
        self.status_ttl = ttl;
        self
    }

    pub fn with_dequeue_timeout(mut self, timeout: Duration) -> Self {
        self.dequeue_timeout = timeout;
        self
    }

    pub fn with_timer_tick(mut self, tick: Duration) -> Self {
        self.timer_tick = tick;
        self
    }

    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load from an arbitrary variable source; unset variables keep defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &'static str| {
            lookup(var)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .map(|v| (var, v))
        };

        let mut config = Self::default();
        let mut retry = config.retry.clone();

        if let Some((_, v)) = get("RELAYQ_QUEUE") {
            config = config.with_queue(v);
        }
        if let Some((_, v)) = get("RELAYQ_DEAD_LETTER_QUEUE") {
            config = config.with_dead_letter_queue(v);
        }
        if let Some((var, v)) = get("RELAYQ_MAX_ATTEMPTS") {
            retry.max_attempts = parse(var, &v)?;
        }
        if let Some((var, v)) = get("RELAYQ_BASE_DELAY_MS") {
            retry.base_delay = Duration::from_millis(parse(var, &v)?);
        }
        if let Some((_, v)) = get("RELAYQ_BACKOFF") {
            retry.strategy = v.parse::<BackoffStrategy>()?;
        }
        config = config.with_retry(retry);
        if let Some((var, v)) = get("RELAYQ_PROGRESS_TTL_SECS") {
            config = config.with_progress_ttl(Duration::from_secs(parse(var, &v)?));
        }
        if let Some((var, v)) = get("RELAYQ_STATUS_TTL_SECS") {
            config = config.with_status_ttl(Duration::from_secs(parse(var, &v)?));
        }
        if let Some((var, v)) = get("RELAYQ_WORKERS") {
            config = config.with_workers(parse(var, &v)?);
        }
        if let Some((var, v)) = get("RELAYQ_DEQUEUE_TIMEOUT_MS") {
            config = config.with_dequeue_timeout(Duration::from_millis(parse(var, &v)?));
        }
        if let Some((var, v)) = get("RELAYQ_TIMER_TICK_MS") {
            config = config.with_timer_tick(Duration::from_millis(parse(var, &v)?));
        }
        config.redis_url = get("REDIS_URL").map(|(_, v)| v);

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.retry.validate()?;
        if self.workers == 0 {
            return Err(invalid("RELAYQ_WORKERS", "0", "at least one worker is required"));
        }
        if self.queue.is_empty() {
            return Err(invalid("RELAYQ_QUEUE", "", "queue name must not be empty"));
        }
        if self.queue == self.dead_letter_queue {
            return Err(invalid(
                "RELAYQ_DEAD_LETTER_QUEUE",
                &self.dead_letter_queue,
                "must differ from the main queue",
            ));
        }
        check_ttl("RELAYQ_PROGRESS_TTL_SECS", self.progress_ttl)?;
        check_ttl("RELAYQ_STATUS_TTL_SECS", self.status_ttl)?;
        if self.dequeue_timeout.is_zero() {
            return Err(invalid("RELAYQ_DEQUEUE_TIMEOUT_MS", "0", "must be positive"));
        }
        if self.timer_tick.is_zero() {
            return Err(invalid("RELAYQ_TIMER_TICK_MS", "0", "must be positive"));
        }
        Ok(())
    }
}

fn parse<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e: T::Err| invalid(var, value, &e.to_string()))
}

fn check_ttl(var: &'static str, ttl: Duration) -> Result<(), ConfigError> {
    if ttl.is_zero() {
        return Err(invalid(var, "0", "must be positive"));
    }
    if ttl > MAX_RECORD_TTL {
        return Err(invalid(
            var,
            &ttl.as_secs().to_string(),
            &format!("must not exceed {} seconds", MAX_RECORD_TTL.as_secs()),
        ));
    }
    Ok(())
}

fn invalid(var: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
