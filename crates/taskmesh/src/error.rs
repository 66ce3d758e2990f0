//! Typed errors for the parts of the runtime that have a genuinely
//! recoverable failure mode.
//!
//! Programming errors (double spawn, a `Local` destination with no worker
//! context) are not represented here at all: they `debug_assert!` in debug
//! builds and degrade to a logged, dropped push in release, per the policy
//! in `SPEC_FULL.md` §C. Only failures a caller can reasonably react to —
//! a full ring buffer, a bad init configuration — get a `Result`.

use thiserror::Error;

/// Failure pushing a task into a bounded queue.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuePushError {
    #[error("task queue is at capacity")]
    Full,
}

/// Failure spawning a task onto the runtime.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnError {
    #[error("target worker's remote queue is full")]
    QueueFull,
    #[error("worker id {0} is out of range for this runtime")]
    InvalidWorker(u16),
}

impl From<QueuePushError> for SpawnError {
    fn from(err: QueuePushError) -> Self {
        match err {
            QueuePushError::Full => SpawnError::QueueFull,
        }
    }
}

/// Failure constructing a [`crate::runtime::Runtime`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InitError {
    #[error("requested {requested} workers, but only {available} cores in the core set")]
    NotEnoughCores { requested: u16, available: u16 },
    #[error("worker count {0} exceeds the compiled MAX_WORKERS limit")]
    TooManyWorkers(u16),
    #[error("sample_period must be a nonzero power of two, got {0}")]
    InvalidSamplePeriod(u32),
}
