//! Queue error types.

use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

/// Misuse of the supervisor. Individual job failures are never reported
/// here; they are recorded on the job itself.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("Queue is already running")]
    AlreadyRunning,

    #[error("Queue is not running")]
    NotRunning,

    #[error("No job is currently active")]
    NoActiveJob,
}
