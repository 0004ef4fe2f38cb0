//! Queue metrics.

use metrics::{counter, gauge, histogram};

use ffqueue_models::JobStatus;

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_ENQUEUED_TOTAL: &str = "ffqueue_jobs_enqueued_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "ffqueue_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "ffqueue_jobs_failed_total";
    pub const JOBS_CANCELLED_TOTAL: &str = "ffqueue_jobs_cancelled_total";
    pub const JOB_DURATION_SECONDS: &str = "ffqueue_job_duration_seconds";
    pub const PENDING_JOBS: &str = "ffqueue_pending_jobs";
    pub const PROCESS_KILLS_TOTAL: &str = "ffqueue_process_kills_total";
}

/// Record job enqueued.
pub fn record_job_enqueued() {
    counter!(names::JOBS_ENQUEUED_TOTAL).increment(1);
}

/// Update pending jobs gauge.
pub fn set_pending_jobs(count: usize) {
    gauge!(names::PENDING_JOBS).set(count as f64);
}

/// Record a job reaching a terminal status.
pub fn record_job_finished(status: JobStatus, duration_secs: Option<f64>) {
    match status {
        JobStatus::Completed => counter!(names::JOBS_COMPLETED_TOTAL).increment(1),
        JobStatus::Failed => counter!(names::JOBS_FAILED_TOTAL).increment(1),
        JobStatus::Cancelled => counter!(names::JOBS_CANCELLED_TOTAL).increment(1),
        _ => return,
    }

    if let Some(secs) = duration_secs {
        let labels = [("status", status.as_str().to_string())];
        histogram!(names::JOB_DURATION_SECONDS, &labels).record(secs);
    }
}

/// Record a process escalated from terminate to kill.
pub fn record_process_kill() {
    counter!(names::PROCESS_KILLS_TOTAL).increment(1);
}
