//! Sequential FFmpeg job queue.
//!
//! This crate provides:
//! - Jobs with shared, observable run state
//! - A supervisor that runs pending jobs one at a time in FIFO order
//! - Lifecycle callbacks for queue/job start, progress, output and completion
//! - Cooperative cancellation of the current job or the whole queue

pub mod callbacks;
pub mod config;
pub mod error;
pub mod job;
pub mod metrics;
pub mod supervisor;

pub use callbacks::QueueCallbacks;
pub use config::SupervisorConfig;
pub use error::{QueueError, QueueResult};
pub use job::{Job, JobFailure, JobOutcome, JobRef, JobSpec, CANCELLED_MESSAGE, SKIPPED_MESSAGE};
pub use supervisor::{QueueSupervisor, QueueSupervisorBuilder};

pub use ffqueue_media::{MediaError, ProcessHandle};
pub use ffqueue_models::{JobId, JobStatus};
