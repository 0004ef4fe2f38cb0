//! Shared data models for ffqueue.
//!
//! This crate provides Serde-serializable types for:
//! - Job identifiers and run status
//! - Job manifests consumed by the worker binary

pub mod job;
pub mod job_status;
pub mod manifest;

// Re-export common types
pub use job::JobId;
pub use job_status::JobStatus;
pub use manifest::{JobEntry, JobManifest};
