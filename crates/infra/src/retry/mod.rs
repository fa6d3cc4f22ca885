//! Retry policy, retry decisions, and deferred redelivery.

pub mod deferred;
pub mod policy;
pub mod scheduler;
pub mod timer;

#[cfg(feature = "redis")]
pub mod redis_zset;

pub use deferred::{DeferredQueue, InMemoryDeferredQueue};
pub use policy::{BackoffStrategy, MAX_ATTEMPTS_LIMIT, PolicyError, RetryPolicy};
pub use scheduler::{RetryDecision, RetryScheduler};
pub use timer::RetryTimer;

#[cfg(feature = "redis")]
pub use redis_zset::RedisDeferredQueue;
