//! Job run status.

use serde::{Deserialize, Serialize};

/// Run status of a queued job.
///
/// Statuses only move forward:
/// `Pending -> Preparing -> Running -> {Completed, Failed, Cancelled}`.
/// Any non-terminal status may jump straight to `Failed` or `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting in the pending queue
    #[default]
    Pending,
    /// Popped from the queue, callbacks being notified
    Preparing,
    /// External process launched (or being launched)
    Running,
    /// Process exited with code 0
    Completed,
    /// Launch failed or process exited non-zero
    Failed,
    /// Interrupted or skipped by a cancellation request
    Cancelled,
}

impl JobStatus {
    /// Get string representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Preparing => "preparing",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Check if the job currently owns the single execution slot.
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Preparing | JobStatus::Running)
    }

    fn rank(&self) -> u8 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::Preparing => 1,
            JobStatus::Running => 2,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled => 3,
        }
    }

    /// Whether moving from `self` to `next` respects forward-only ordering.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        next.rank() > self.rank()
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
