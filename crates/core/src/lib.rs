//! `relayq-core`: task pipeline building blocks.
//!
//! This crate contains **pure** primitives shared by every backend: task
//! identity, the task record itself, the failure taxonomy of a processing
//! step and a swappable clock. No IO lives here.

pub mod clock;
pub mod error;
pub mod id;
pub mod task;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CoreError, StepError};
pub use id::TaskId;
pub use task::{Task, TaskState};
