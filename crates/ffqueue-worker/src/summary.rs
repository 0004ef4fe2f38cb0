//! Run summary.

use std::fmt;

use ffqueue_queue::{JobRef, JobStatus};

/// Outcome counts for one queue run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl RunSummary {
    pub fn from_jobs<C>(jobs: &[JobRef<C>]) -> Self {
        jobs.iter().fold(Self::default(), |mut summary, job| {
            match job.status() {
                JobStatus::Completed => summary.succeeded += 1,
                JobStatus::Failed => summary.failed += 1,
                JobStatus::Cancelled => summary.cancelled += 1,
                _ => {}
            }
            summary
        })
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.cancelled
    }

    /// True when there was nothing to run or every job succeeded.
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0 && self.cancelled == 0
    }

    /// Process exit code for the worker binary.
    pub fn exit_code(&self) -> i32 {
        if self.all_succeeded() {
            0
        } else {
            1
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} succeeded, {} failed, {} cancelled",
            self.succeeded, self.failed, self.cancelled
        )
    }
}
