//! Manifest runner for the ffqueue supervisor.
//!
//! This crate provides:
//! - Environment-driven worker configuration
//! - Manifest loading and enqueueing
//! - A queue run that stops on Ctrl-C
//! - Logging callbacks and a run summary for the binary

pub mod config;
pub mod error;
pub mod logging;
pub mod manifest;
pub mod runner;
pub mod summary;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use logging::{logging_callbacks, JobLogger};
pub use manifest::{enqueue_manifest, load_manifest, JobContext};
pub use runner::run_queue_until_done;
pub use summary::RunSummary;
