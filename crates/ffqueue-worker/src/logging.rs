//! Structured job logging.
//!
//! Provides consistent, structured logging for queue runs and the
//! callbacks the worker binary installs on the supervisor.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, error, info, warn};

use ffqueue_queue::{Job, JobStatus, QueueCallbacks};

use crate::manifest::JobContext;
use crate::summary::RunSummary;

/// Percentage step between logged progress updates.
const PROGRESS_LOG_STEP: f64 = 10.0;

/// Lifecycle lines for one queued job.
///
/// Every line carries the job label, its 1-based position in the run and the
/// program being run.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    position: usize,
    program: String,
}

impl JobLogger {
    /// Logger for the job at `index` (0-based) of the current run.
    pub fn for_job<C>(index: usize, job: &Job<C>) -> Self {
        Self {
            job_id: job.label().to_string(),
            position: index + 1,
            program: job.args().first().cloned().unwrap_or_default(),
        }
    }

    pub fn started(&self, command: &str) {
        info!(
            job_id = %self.job_id,
            position = self.position,
            program = %self.program,
            "Job started: {}", command
        );
    }

    pub fn progress(&self, pct: f64) {
        info!(
            job_id = %self.job_id,
            position = self.position,
            "Job progress: {:.1}%", pct
        );
    }

    /// Log the job's final state. Failures log at `error`, cancellations
    /// at `warn`.
    pub fn finished<C>(&self, job: &Job<C>) {
        let status = job.status();
        let line = outcome_line(job);
        match status {
            JobStatus::Completed => info!(
                job_id = %self.job_id,
                position = self.position,
                %status,
                "Job {}", line
            ),
            JobStatus::Failed => error!(
                job_id = %self.job_id,
                position = self.position,
                exit_code = ?job.failure().and_then(|f| f.exit_code()),
                %status,
                "Job {}", line
            ),
            _ => warn!(
                job_id = %self.job_id,
                position = self.position,
                %status,
                "Job {}", line
            ),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

fn outcome_line<C>(job: &Job<C>) -> String {
    let elapsed = job
        .elapsed()
        .map(|d| format!("{:.1}s", d.as_secs_f64()))
        .unwrap_or_else(|| "N/A".to_string());
    match (job.status(), job.error_message()) {
        (JobStatus::Completed, _) => format!("completed in {elapsed}"),
        (status, Some(message)) => format!("{status} after {elapsed}: {message}"),
        (status, None) => status.to_string(),
    }
}

/// Index of the last 10% step logged for the running job.
#[derive(Debug, Default)]
struct ProgressSteps {
    index: Option<usize>,
    step: i64,
}

impl ProgressSteps {
    /// Whether `pct` reaches a step not yet logged for job `index`.
    fn advance(&mut self, index: usize, pct: f64) -> bool {
        let step = (pct / PROGRESS_LOG_STEP).floor() as i64;
        if self.index != Some(index) {
            self.index = Some(index);
            self.step = step;
            return true;
        }
        if step > self.step {
            self.step = step;
            true
        } else {
            false
        }
    }
}

/// Callbacks that log the queue lifecycle.
///
/// With `with_progress`, progress is logged at most once per 10% step.
/// A progress callback makes a positive duration mandatory for every job,
/// so only enable it when the whole manifest carries durations.
pub fn logging_callbacks(with_progress: bool) -> QueueCallbacks<JobContext> {
    let callbacks = QueueCallbacks::<JobContext>::new()
        .on_queue_start(|supervisor| {
            info!(jobs = supervisor.pending_count(), "Queue started");
        })
        .on_job_start(|index, job| {
            if job.status() == JobStatus::Cancelled {
                return;
            }
            JobLogger::for_job(index, job).started(&job.command_preview());
        })
        .on_job_process_created(|_, job, handle| {
            debug!(
                job_id = %job.label(),
                pid = ?handle.pid(),
                program = handle.program(),
                "Process created"
            );
        })
        .on_job_log(|_, job, line| {
            debug!(job_id = %job.label(), "{}", line);
        })
        .on_job_complete(|index, job| {
            JobLogger::for_job(index, job).finished(job);
        })
        .on_queue_complete(|_, jobs| {
            info!("Queue finished: {}", RunSummary::from_jobs(jobs));
        });

    if !with_progress {
        return callbacks;
    }

    let steps = Arc::new(Mutex::new(ProgressSteps::default()));
    callbacks.on_job_progress(move |index, job, pct| {
        let log = steps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .advance(index, pct);
        if log {
            JobLogger::for_job(index, job).progress(pct);
        }
    })
}
