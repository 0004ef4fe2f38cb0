//! The queue supervisor.
//!
//! A supervisor owns a FIFO of pending jobs and runs them one at a time
//! with [`QueueSupervisor::run_queue`]. Share it as `Arc<QueueSupervisor<C>>`
//! so another task or thread can cancel while a run is in progress.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, info_span, warn, Instrument};

use ffqueue_media::{
    validate_duration, LaunchedProcess, LineEvent, MediaError, ProcessHandle, ProcessLauncher,
    ProgressTracker,
};
use ffqueue_models::{JobId, JobStatus};

use crate::callbacks::QueueCallbacks;
use crate::config::SupervisorConfig;
use crate::error::{QueueError, QueueResult};
use crate::job::{Job, JobFailure, JobRef, JobSpec, CANCELLED_MESSAGE, SKIPPED_MESSAGE};
use crate::metrics;

struct QueueState<C> {
    /// Jobs taken from `pending` when the current run started
    batch: VecDeque<JobRef<C>>,
    /// Jobs waiting for the next run
    pending: VecDeque<JobRef<C>>,
    processed: Vec<JobRef<C>>,
    active: Option<JobRef<C>>,
}

impl<C> Default for QueueState<C> {
    fn default() -> Self {
        Self {
            batch: VecDeque::new(),
            pending: VecDeque::new(),
            processed: Vec::new(),
            active: None,
        }
    }
}

impl<C> QueueState<C> {
    fn waiting(&self) -> usize {
        self.batch.len() + self.pending.len()
    }
}

/// How a launched job ended, before it is recorded on the job.
enum Verdict {
    Succeeded,
    Failed(JobFailure),
    Interrupted,
}

/// Runs queued jobs sequentially.
pub struct QueueSupervisor<C = ()> {
    config: SupervisorConfig,
    callbacks: QueueCallbacks<C>,
    launcher: ProcessLauncher,
    state: Mutex<QueueState<C>>,
    running: AtomicBool,
    cancel_current: AtomicBool,
    cancel_queue: AtomicBool,
}

/// Builder for [`QueueSupervisor`].
pub struct QueueSupervisorBuilder<C = ()> {
    config: SupervisorConfig,
    callbacks: QueueCallbacks<C>,
    launcher: ProcessLauncher,
}

impl<C> Default for QueueSupervisorBuilder<C> {
    fn default() -> Self {
        Self {
            config: SupervisorConfig::default(),
            callbacks: QueueCallbacks::default(),
            launcher: ProcessLauncher::new(),
        }
    }
}

impl<C> QueueSupervisorBuilder<C> {
    pub fn config(mut self, config: SupervisorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn callbacks(mut self, callbacks: QueueCallbacks<C>) -> Self {
        self.callbacks = callbacks;
        self
    }

    pub fn launcher(mut self, launcher: ProcessLauncher) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn build(self) -> QueueSupervisor<C> {
        QueueSupervisor {
            config: self.config,
            callbacks: self.callbacks,
            launcher: self.launcher,
            state: Mutex::new(QueueState::default()),
            running: AtomicBool::new(false),
            cancel_current: AtomicBool::new(false),
            cancel_queue: AtomicBool::new(false),
        }
    }
}

/// Resets the run state even if the `run_queue` future is dropped mid-run.
///
/// An interrupted active job is marked cancelled and the jobs the run never
/// reached go back to the front of the pending queue in their original order.
/// No callbacks fire from here.
struct DrainGuard<'a, C> {
    supervisor: &'a QueueSupervisor<C>,
}

impl<C> Drop for DrainGuard<'_, C> {
    fn drop(&mut self) {
        let mut state = self.supervisor.lock();
        if let Some(job) = state.active.take() {
            if !job.status().is_terminal() && job.cancel(CANCELLED_MESSAGE) {
                warn!(job_id = %job.label(), "Run abandoned while job was active");
                metrics::record_job_finished(
                    JobStatus::Cancelled,
                    job.elapsed().map(|d| d.as_secs_f64()),
                );
            }
        }
        let requeued = state.batch.len();
        while let Some(job) = state.batch.pop_back() {
            state.pending.push_front(job);
        }
        if requeued > 0 {
            debug!(jobs = requeued, "Returned unstarted jobs to the pending queue");
        }
        metrics::set_pending_jobs(state.waiting());
        drop(state);
        self.supervisor.running.store(false, Ordering::SeqCst);
    }
}

/// Releases the job's process on every exit path. A process that is still
/// alive here belongs to an abandoned run and is killed.
struct ProcessGuard<'a, C> {
    job: &'a Job<C>,
    handle: &'a ProcessHandle,
}

impl<C> Drop for ProcessGuard<'_, C> {
    fn drop(&mut self) {
        if !self.handle.has_exited() && self.handle.kill() {
            warn!(
                job_id = %self.job.label(),
                pid = ?self.handle.pid(),
                "Killed process left running by an abandoned job"
            );
        }
        self.job.detach_process();
    }
}

/// Per-job view of the process output.
struct OutputState {
    tracker: ProgressTracker,
    tail: VecDeque<String>,
    tail_capacity: usize,
}

impl OutputState {
    fn remember(&mut self, line: &str) {
        if self.tail_capacity == 0 {
            return;
        }
        if self.tail.len() == self.tail_capacity {
            self.tail.pop_front();
        }
        self.tail.push_back(line.to_string());
    }

    fn stderr_text(&self) -> String {
        self.tail.iter().map(String::as_str).collect::<Vec<_>>().join("\n")
    }
}

impl<C> QueueSupervisor<C> {
    pub fn builder() -> QueueSupervisorBuilder<C> {
        QueueSupervisorBuilder::default()
    }

    /// Supervisor with the given config, no callbacks and the default launcher.
    pub fn new(config: SupervisorConfig) -> Self {
        Self::builder().config(config).build()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<C>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Append a job to the pending queue.
    ///
    /// Allowed while a run is in progress; the job then waits for the next run.
    pub fn enqueue<I, S>(
        &self,
        args: I,
        duration_sec: Option<f64>,
        job_id: Option<JobId>,
        context: C,
    ) -> JobRef<C>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enqueue_job(JobSpec {
            args: args.into_iter().map(Into::into).collect(),
            duration_sec,
            job_id,
            context,
        })
    }

    /// Append a job built from `spec` to the pending queue.
    pub fn enqueue_job(&self, spec: JobSpec<C>) -> JobRef<C> {
        let job = Arc::new(Job::new(spec));
        let waiting = {
            let mut state = self.lock();
            state.pending.push_back(job.clone());
            state.waiting()
        };

        debug!(job_id = %job.label(), "Enqueued job: {}", job.command_preview());
        metrics::record_job_enqueued();
        metrics::set_pending_jobs(waiting);
        job
    }

    /// Run every pending job in FIFO order, one at a time.
    ///
    /// Job failures are recorded on the jobs; the returned list holds every
    /// job of this run with a terminal status. With `stop_on_error`, the
    /// first failure skips the rest of the run.
    pub async fn run_queue(&self, stop_on_error: bool) -> QueueResult<Vec<JobRef<C>>> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(QueueError::AlreadyRunning);
        }
        let guard = DrainGuard { supervisor: self };

        let total = {
            let mut state = self.lock();
            if state.pending.is_empty() {
                return Ok(Vec::new());
            }
            self.cancel_current.store(false, Ordering::SeqCst);
            self.cancel_queue.store(false, Ordering::SeqCst);
            state.processed.clear();
            state.batch = std::mem::take(&mut state.pending);
            state.batch.len()
        };

        info!(jobs = total, stop_on_error, "Starting queue run");
        self.callbacks.queue_start(self);

        let mut index = 0;
        loop {
            if self.cancel_queue.load(Ordering::SeqCst) {
                info!("Queue run cancelled");
                break;
            }

            let job = {
                let mut state = self.lock();
                let Some(job) = state.batch.pop_front() else {
                    break;
                };
                state.processed.push(job.clone());
                state.active = Some(job.clone());
                self.cancel_current.store(false, Ordering::SeqCst);
                metrics::set_pending_jobs(state.waiting());
                job
            };

            let span = info_span!("job", job_id = %job.label(), index);
            self.run_job(index, total, &job, stop_on_error)
                .instrument(span)
                .await;

            self.lock().active = None;
            index += 1;
        }

        let skipped: Vec<JobRef<C>> = {
            let mut state = self.lock();
            let skipped: Vec<_> = state.batch.drain(..).collect();
            state.processed.extend(skipped.iter().cloned());
            metrics::set_pending_jobs(state.waiting());
            skipped
        };
        for job in skipped {
            job.cancel(SKIPPED_MESSAGE);
            debug!(job_id = %job.label(), "Skipped job");
            metrics::record_job_finished(JobStatus::Cancelled, None);
            self.callbacks.job_start(index, &job);
            self.callbacks.job_complete(index, &job);
            index += 1;
        }

        let processed = self.processed_jobs();
        drop(guard);

        info!(jobs = processed.len(), "Queue run finished");
        self.callbacks.queue_complete(self, &processed);
        Ok(processed)
    }

    async fn run_job(&self, index: usize, total: usize, job: &JobRef<C>, stop_on_error: bool) {
        job.set_status(JobStatus::Preparing);
        info!("Running job {}/{}: {}", index + 1, total, job);
        self.callbacks.job_start(index, job);

        match self.execute(index, job).await {
            Verdict::Succeeded => {
                job.complete();
                info!("Job completed");
            }
            Verdict::Failed(failure) => {
                warn!(exit_code = ?failure.exit_code(), "Job failed: {}", failure);
                job.fail(failure);
                if stop_on_error {
                    self.cancel_queue.store(true, Ordering::SeqCst);
                }
            }
            Verdict::Interrupted => {
                job.cancel(CANCELLED_MESSAGE);
                info!("Job cancelled");
            }
        }

        if self.cancel_requested()
            && !matches!(job.status(), JobStatus::Completed | JobStatus::Failed)
        {
            job.cancel(CANCELLED_MESSAGE);
        }

        metrics::record_job_finished(job.status(), job.elapsed().map(|d| d.as_secs_f64()));
        self.callbacks.job_complete(index, job);
    }

    async fn execute(&self, index: usize, job: &JobRef<C>) -> Verdict {
        if self.cancel_requested() {
            return Verdict::Interrupted;
        }
        if self.callbacks.wants_progress() {
            if let Err(e) = validate_duration(job.duration_sec()) {
                return Verdict::Failed(e.into());
            }
        }

        job.set_status(JobStatus::Running);
        debug!("Command: {}", job.args().join(" "));
        let LaunchedProcess {
            handle,
            mut stdout,
            mut stderr,
        } = match self.launcher.launch(job.args()) {
            Ok(launched) => launched,
            Err(e) => return Verdict::Failed(e.into()),
        };

        job.attach_process(handle.clone());
        let _process = ProcessGuard {
            job: &**job,
            handle: &handle,
        };
        debug!(pid = ?handle.pid(), "Process started");
        self.callbacks.job_process_created(index, job, &handle);

        let mut output = OutputState {
            tracker: ProgressTracker::new(job.duration_sec())
                .with_threshold(self.config.progress_threshold),
            tail: VecDeque::new(),
            tail_capacity: self.config.stderr_tail_lines,
        };

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut stderr_open = true;
        let mut stdout_open = true;
        let mut terminate_requested: Option<Instant> = None;
        let mut killed = false;

        let exit_code = loop {
            tokio::select! {
                line = stderr.next_line(), if stderr_open => match line {
                    Some(line) => self.handle_line(index, job, &mut output, &line, true),
                    None => stderr_open = false,
                },
                line = stdout.next_line(), if stdout_open => match line {
                    Some(line) => self.handle_line(index, job, &mut output, &line, false),
                    None => stdout_open = false,
                },
                _ = ticker.tick() => {}
            }

            if self.cancel_requested() {
                match terminate_requested {
                    None => {
                        if handle.terminate() {
                            debug!(pid = ?handle.pid(), "Sent terminate to process");
                        }
                        terminate_requested = Some(Instant::now());
                    }
                    Some(at) if !killed && at.elapsed() >= self.config.terminate_grace => {
                        warn!(
                            pid = ?handle.pid(),
                            "Process still running {:?} after terminate, killing",
                            self.config.terminate_grace
                        );
                        if handle.kill() {
                            metrics::record_process_kill();
                        }
                        killed = true;
                    }
                    Some(_) => {}
                }
            }

            match handle.try_wait() {
                Ok(Some(code)) => break code,
                Ok(None) => {}
                Err(e) => return Verdict::Failed(e.into()),
            }
        };

        let timeout = self.config.drain_timeout;
        let (stderr_rest, stdout_rest) = tokio::join!(stderr.drain(timeout), stdout.drain(timeout));
        for line in &stderr_rest {
            self.handle_line(index, job, &mut output, line, true);
        }
        for line in &stdout_rest {
            self.handle_line(index, job, &mut output, line, false);
        }

        if let Some(pct) = output.tracker.flush() {
            self.deliver_progress(index, job, pct);
        }

        debug!(exit_code, "Process exited");
        if exit_code == 0 {
            if let Some(pct) = output.tracker.finish_success() {
                self.deliver_progress(index, job, pct);
            }
            Verdict::Succeeded
        } else if terminate_requested.is_some() || self.cancel_requested() {
            Verdict::Interrupted
        } else {
            Verdict::Failed(
                MediaError::process_failed(
                    job.args(),
                    exit_code,
                    &output.stderr_text(),
                    self.config.stderr_preview_chars,
                )
                .into(),
            )
        }
    }

    fn handle_line(
        &self,
        index: usize,
        job: &JobRef<C>,
        output: &mut OutputState,
        line: &str,
        from_stderr: bool,
    ) {
        match output.tracker.observe(line) {
            LineEvent::Progress(Some(pct)) => self.deliver_progress(index, job, pct),
            LineEvent::Progress(None) | LineEvent::Noise => {}
            LineEvent::Message => {
                debug!("{}", line);
                if from_stderr {
                    output.remember(line);
                }
                self.callbacks.job_log(index, job, line);
            }
        }
    }

    fn deliver_progress(&self, index: usize, job: &JobRef<C>, pct: f64) {
        job.record_progress(pct);
        self.callbacks.job_progress(index, job, pct);
    }

    fn cancel_requested(&self) -> bool {
        self.cancel_current.load(Ordering::SeqCst) || self.cancel_queue.load(Ordering::SeqCst)
    }

    /// Request cancellation of the active job.
    ///
    /// Sets the cancellation flag and sends a terminate to the live process,
    /// if any. The drive loop records the job as cancelled once the process
    /// is gone.
    pub fn request_cancel_current(&self) -> QueueResult<()> {
        let job = {
            let state = self.lock();
            if !self.is_running() {
                return Err(QueueError::NotRunning);
            }
            let Some(job) = state.active.clone() else {
                return Err(QueueError::NoActiveJob);
            };
            self.cancel_current.store(true, Ordering::SeqCst);
            job
        };

        info!(job_id = %job.label(), "Requesting cancellation of current job");
        if let Some(handle) = job.process_handle() {
            handle.terminate();
        }
        Ok(())
    }

    /// Like [`request_cancel_current`](Self::request_cancel_current), reporting
    /// only whether a cancellation was requested.
    pub fn cancel_current(&self) -> bool {
        match self.request_cancel_current() {
            Ok(()) => true,
            Err(e) => {
                debug!("Cannot cancel current job: {}", e);
                false
            }
        }
    }

    /// Stop the run: interrupt the active job and skip every job not yet started.
    ///
    /// Returns false when no run is in progress. Calling it again has no
    /// further effect.
    pub fn cancel_queue(&self) -> bool {
        let has_active = {
            let state = self.lock();
            if !self.is_running() {
                debug!("Cannot cancel queue: not running");
                return false;
            }
            self.cancel_queue.store(true, Ordering::SeqCst);
            state.active.is_some()
        };

        info!("Requesting cancellation of the entire queue");
        if has_active {
            // The active job may finish between the two locks.
            let _ = self.request_cancel_current();
        }
        true
    }

    /// Drop every pending job. Only allowed while no run is in progress.
    pub fn clear_pending(&self) -> QueueResult<usize> {
        let mut state = self.lock();
        if self.is_running() {
            return Err(QueueError::AlreadyRunning);
        }
        let removed = state.pending.len();
        state.pending.clear();
        metrics::set_pending_jobs(state.waiting());
        info!(removed, "Cleared pending jobs");
        Ok(removed)
    }

    /// Jobs not yet started, including those held by the current run.
    pub fn pending_count(&self) -> usize {
        self.lock().waiting()
    }

    /// Snapshot of the jobs not yet started, in the order they will run.
    pub fn pending_jobs(&self) -> Vec<JobRef<C>> {
        let state = self.lock();
        state.batch.iter().chain(state.pending.iter()).cloned().collect()
    }

    /// Snapshot of the jobs taken by the current or most recent run.
    pub fn processed_jobs(&self) -> Vec<JobRef<C>> {
        self.lock().processed.clone()
    }

    pub fn active_job(&self) -> Option<JobRef<C>> {
        self.lock().active.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
