//! Queued jobs and their run state.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::warn;

use ffqueue_media::{MediaError, ProcessHandle};
use ffqueue_models::{JobId, JobStatus};

/// Message recorded on a job interrupted by a cancellation request.
pub const CANCELLED_MESSAGE: &str = "Job cancelled by user.";

/// Message recorded on a job that never started because the queue was cancelled.
pub const SKIPPED_MESSAGE: &str = "Queue processing was cancelled before this job started.";

const COMMAND_PREVIEW_CHARS: usize = 70;

/// Shared reference to a queued job.
pub type JobRef<C> = Arc<Job<C>>;

/// What to run for one job.
#[derive(Debug, Clone)]
pub struct JobSpec<C = ()> {
    /// Full argument list, executable first
    pub args: Vec<String>,
    /// Expected output duration in seconds, used for progress percentages
    pub duration_sec: Option<f64>,
    /// Optional caller identifier
    pub job_id: Option<JobId>,
    /// Caller data, never inspected by the queue
    pub context: C,
}

impl<C: Default> JobSpec<C> {
    /// Create a spec from an argument list.
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            duration_sec: None,
            job_id: None,
            context: C::default(),
        }
    }
}

impl<C> JobSpec<C> {
    /// Set the expected duration.
    pub fn duration(mut self, seconds: f64) -> Self {
        self.duration_sec = Some(seconds);
        self
    }

    /// Set the job identifier.
    pub fn id(mut self, job_id: impl Into<JobId>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    /// Replace the caller context.
    pub fn context<D>(self, context: D) -> JobSpec<D> {
        JobSpec {
            args: self.args,
            duration_sec: self.duration_sec,
            job_id: self.job_id,
            context,
        }
    }
}

/// Why a job failed.
///
/// Wraps the launcher or process error so every observer of the job sees the
/// same error value.
#[derive(Debug, Clone, Error)]
#[error(transparent)]
pub struct JobFailure(Arc<MediaError>);

impl JobFailure {
    /// The underlying error.
    pub fn error(&self) -> &MediaError {
        &self.0
    }

    /// Exit code of a process that ran and failed.
    pub fn exit_code(&self) -> Option<i32> {
        self.0.exit_code()
    }
}

impl From<MediaError> for JobFailure {
    fn from(err: MediaError) -> Self {
        Self(Arc::new(err))
    }
}

impl PartialEq for JobFailure {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0.to_string() == other.0.to_string()
    }
}

impl Eq for JobFailure {}

/// Final result of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Success,
    Failed(JobFailure),
    Cancelled,
}

#[derive(Debug, Default)]
struct JobRunState {
    status: JobStatus,
    result: Option<JobOutcome>,
    error_message: Option<String>,
    process: Option<ProcessHandle>,
    progress: Option<f64>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

/// One request to run the external executable once.
///
/// Identity fields are immutable. Run state is written by the drive loop
/// only; the process handle may additionally be read from other threads
/// to terminate the process.
pub struct Job<C = ()> {
    job_id: Option<JobId>,
    args: Vec<String>,
    duration_sec: Option<f64>,
    context: C,
    state: Mutex<JobRunState>,
}

impl<C> Job<C> {
    pub(crate) fn new(spec: JobSpec<C>) -> Self {
        Self {
            job_id: spec.job_id,
            args: spec.args,
            duration_sec: spec.duration_sec,
            context: spec.context,
            state: Mutex::new(JobRunState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, JobRunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn job_id(&self) -> Option<&JobId> {
        self.job_id.as_ref()
    }

    /// Job id, or `N/A` when none was given.
    pub fn label(&self) -> &str {
        self.job_id.as_ref().map_or("N/A", JobId::as_str)
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn duration_sec(&self) -> Option<f64> {
        self.duration_sec
    }

    pub fn context(&self) -> &C {
        &self.context
    }

    pub fn status(&self) -> JobStatus {
        self.lock().status
    }

    pub fn result(&self) -> Option<JobOutcome> {
        self.lock().result.clone()
    }

    /// Failure detail, when the job failed.
    pub fn failure(&self) -> Option<JobFailure> {
        match self.lock().result {
            Some(JobOutcome::Failed(ref failure)) => Some(failure.clone()),
            _ => None,
        }
    }

    pub fn error_message(&self) -> Option<String> {
        self.lock().error_message.clone()
    }

    /// Live process handle; only set while the process for this job exists.
    pub fn process_handle(&self) -> Option<ProcessHandle> {
        self.lock().process.clone()
    }

    /// Last progress percentage delivered for this job.
    pub fn last_progress(&self) -> Option<f64> {
        self.lock().progress
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.lock().started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.lock().finished_at
    }

    /// Wall time between start and finish.
    pub fn elapsed(&self) -> Option<Duration> {
        let state = self.lock();
        let started = state.started_at?;
        let finished = state.finished_at?;
        (finished - started).to_std().ok()
    }

    /// First characters of the joined argument list.
    pub fn command_preview(&self) -> String {
        let command = self.args.join(" ");
        if command.chars().count() <= COMMAND_PREVIEW_CHARS {
            command
        } else {
            let head: String = command.chars().take(COMMAND_PREVIEW_CHARS).collect();
            format!("{head}...")
        }
    }

    /// Move to `next` if the transition is forward-only. Returns whether it applied.
    pub(crate) fn set_status(&self, next: JobStatus) -> bool {
        let mut state = self.lock();
        if !state.status.can_transition_to(next) {
            warn!(
                job_id = %self.label(),
                "Ignoring status change {} -> {}", state.status, next
            );
            return false;
        }
        if next == JobStatus::Preparing {
            state.started_at = Some(Utc::now());
        }
        state.status = next;
        true
    }

    fn finish(&self, status: JobStatus, outcome: JobOutcome, message: Option<String>) -> bool {
        if !self.set_status(status) {
            return false;
        }
        let mut state = self.lock();
        state.result = Some(outcome);
        state.error_message = message;
        state.finished_at = Some(Utc::now());
        true
    }

    pub(crate) fn complete(&self) -> bool {
        self.finish(JobStatus::Completed, JobOutcome::Success, None)
    }

    pub(crate) fn fail(&self, failure: JobFailure) -> bool {
        let message = failure.to_string();
        self.finish(JobStatus::Failed, JobOutcome::Failed(failure), Some(message))
    }

    pub(crate) fn cancel(&self, message: &str) -> bool {
        self.finish(
            JobStatus::Cancelled,
            JobOutcome::Cancelled,
            Some(message.to_string()),
        )
    }

    pub(crate) fn attach_process(&self, handle: ProcessHandle) {
        self.lock().process = Some(handle);
    }

    pub(crate) fn detach_process(&self) -> Option<ProcessHandle> {
        self.lock().process.take()
    }

    pub(crate) fn record_progress(&self, percentage: f64) {
        self.lock().progress = Some(percentage);
    }
}

impl<C> fmt::Display for Job<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Job(id={}, status={}, command='{}')",
            self.label(),
            self.status(),
            self.command_preview()
        )
    }
}

impl<C> fmt::Debug for Job<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("Job")
            .field("job_id", &self.job_id)
            .field("args", &self.args)
            .field("duration_sec", &self.duration_sec)
            .field("status", &state.status)
            .field("result", &state.result)
            .field("error_message", &state.error_message)
            .field("progress", &state.progress)
            .finish_non_exhaustive()
    }
}
