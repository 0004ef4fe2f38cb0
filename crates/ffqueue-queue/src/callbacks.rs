//! Lifecycle callbacks.
//!
//! Every callback is optional and runs synchronously on the drive loop.
//! A panicking callback is logged and otherwise ignored; it never aborts
//! the queue.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::warn;

use ffqueue_media::ProcessHandle;

use crate::job::JobRef;
use crate::supervisor::QueueSupervisor;

pub type QueueStartFn<C> = Arc<dyn Fn(&QueueSupervisor<C>) + Send + Sync>;
pub type JobFn<C> = Arc<dyn Fn(usize, &JobRef<C>) + Send + Sync>;
pub type JobProcessFn<C> = Arc<dyn Fn(usize, &JobRef<C>, &ProcessHandle) + Send + Sync>;
pub type JobProgressFn<C> = Arc<dyn Fn(usize, &JobRef<C>, f64) + Send + Sync>;
pub type JobLogFn<C> = Arc<dyn Fn(usize, &JobRef<C>, &str) + Send + Sync>;
pub type QueueCompleteFn<C> = Arc<dyn Fn(&QueueSupervisor<C>, &[JobRef<C>]) + Send + Sync>;

/// Callbacks fired by [`QueueSupervisor::run_queue`].
pub struct QueueCallbacks<C = ()> {
    on_queue_start: Option<QueueStartFn<C>>,
    on_job_start: Option<JobFn<C>>,
    on_job_process_created: Option<JobProcessFn<C>>,
    on_job_progress: Option<JobProgressFn<C>>,
    on_job_log: Option<JobLogFn<C>>,
    on_job_complete: Option<JobFn<C>>,
    on_queue_complete: Option<QueueCompleteFn<C>>,
}

impl<C> Default for QueueCallbacks<C> {
    fn default() -> Self {
        Self {
            on_queue_start: None,
            on_job_start: None,
            on_job_process_created: None,
            on_job_progress: None,
            on_job_log: None,
            on_job_complete: None,
            on_queue_complete: None,
        }
    }
}

impl<C> Clone for QueueCallbacks<C> {
    fn clone(&self) -> Self {
        Self {
            on_queue_start: self.on_queue_start.clone(),
            on_job_start: self.on_job_start.clone(),
            on_job_process_created: self.on_job_process_created.clone(),
            on_job_progress: self.on_job_progress.clone(),
            on_job_log: self.on_job_log.clone(),
            on_job_complete: self.on_job_complete.clone(),
            on_queue_complete: self.on_queue_complete.clone(),
        }
    }
}

impl<C> QueueCallbacks<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called once before the first job of a non-empty run.
    pub fn on_queue_start(mut self, f: impl Fn(&QueueSupervisor<C>) + Send + Sync + 'static) -> Self {
        self.on_queue_start = Some(Arc::new(f));
        self
    }

    /// Called when a job leaves the pending queue, including skipped jobs.
    pub fn on_job_start(mut self, f: impl Fn(usize, &JobRef<C>) + Send + Sync + 'static) -> Self {
        self.on_job_start = Some(Arc::new(f));
        self
    }

    /// Called once the process for a job exists.
    pub fn on_job_process_created(
        mut self,
        f: impl Fn(usize, &JobRef<C>, &ProcessHandle) + Send + Sync + 'static,
    ) -> Self {
        self.on_job_process_created = Some(Arc::new(f));
        self
    }

    /// Called with non-decreasing percentages in `0.0..=100.0`.
    ///
    /// Setting this makes a positive `duration_sec` mandatory for every job.
    pub fn on_job_progress(mut self, f: impl Fn(usize, &JobRef<C>, f64) + Send + Sync + 'static) -> Self {
        self.on_job_progress = Some(Arc::new(f));
        self
    }

    /// Called with each diagnostic line that is not a progress record.
    pub fn on_job_log(mut self, f: impl Fn(usize, &JobRef<C>, &str) + Send + Sync + 'static) -> Self {
        self.on_job_log = Some(Arc::new(f));
        self
    }

    /// Called once per job with its final status.
    pub fn on_job_complete(mut self, f: impl Fn(usize, &JobRef<C>) + Send + Sync + 'static) -> Self {
        self.on_job_complete = Some(Arc::new(f));
        self
    }

    /// Called after every job of the run has completed.
    pub fn on_queue_complete(
        mut self,
        f: impl Fn(&QueueSupervisor<C>, &[JobRef<C>]) + Send + Sync + 'static,
    ) -> Self {
        self.on_queue_complete = Some(Arc::new(f));
        self
    }

    pub fn wants_progress(&self) -> bool {
        self.on_job_progress.is_some()
    }

    pub(crate) fn queue_start(&self, supervisor: &QueueSupervisor<C>) {
        if let Some(f) = &self.on_queue_start {
            guarded("on_queue_start", None, || f(supervisor));
        }
    }

    pub(crate) fn job_start(&self, index: usize, job: &JobRef<C>) {
        if let Some(f) = &self.on_job_start {
            guarded("on_job_start", Some(job.label()), || f(index, job));
        }
    }

    pub(crate) fn job_process_created(&self, index: usize, job: &JobRef<C>, handle: &ProcessHandle) {
        if let Some(f) = &self.on_job_process_created {
            guarded("on_job_process_created", Some(job.label()), || f(index, job, handle));
        }
    }

    pub(crate) fn job_progress(&self, index: usize, job: &JobRef<C>, percentage: f64) {
        if let Some(f) = &self.on_job_progress {
            guarded("on_job_progress", Some(job.label()), || f(index, job, percentage));
        }
    }

    pub(crate) fn job_log(&self, index: usize, job: &JobRef<C>, line: &str) {
        if let Some(f) = &self.on_job_log {
            guarded("on_job_log", Some(job.label()), || f(index, job, line));
        }
    }

    pub(crate) fn job_complete(&self, index: usize, job: &JobRef<C>) {
        if let Some(f) = &self.on_job_complete {
            guarded("on_job_complete", Some(job.label()), || f(index, job));
        }
    }

    pub(crate) fn queue_complete(&self, supervisor: &QueueSupervisor<C>, jobs: &[JobRef<C>]) {
        if let Some(f) = &self.on_queue_complete {
            guarded("on_queue_complete", None, || f(supervisor, jobs));
        }
    }
}

fn guarded(name: &str, job_id: Option<&str>, f: impl FnOnce()) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(f)) {
        warn!(
            callback = name,
            job_id = job_id.unwrap_or("N/A"),
            "Callback panicked: {}",
            panic_message(payload.as_ref())
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}
