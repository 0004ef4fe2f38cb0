//! FFmpeg process supervision primitives.
//!
//! This crate provides:
//! - Process launching with captured stdout/stderr line streams
//! - A shareable process handle supporting poll, wait, terminate and kill
//! - Progress parsing from FFmpeg stat lines and `-progress pipe:2` output

pub mod error;
pub mod process;
pub mod progress;

pub use error::{MediaError, MediaResult};
pub use process::{LaunchedProcess, LineStream, ProcessHandle, ProcessLauncher};
pub use progress::{
    parse_time_to_seconds, validate_duration, LineEvent, ProgressRecord, ProgressTracker,
    DEFAULT_PROGRESS_THRESHOLD,
};
