//! Supervisor tests driving real processes.
//!
//! Jobs are small `sh` scripts that write FFmpeg-shaped stat lines to stderr.

#![cfg(unix)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ffqueue_queue::{
    JobFailure, JobOutcome, JobSpec, JobStatus, MediaError, QueueCallbacks, QueueError,
    QueueSupervisor, SupervisorConfig, CANCELLED_MESSAGE, SKIPPED_MESSAGE,
};

fn config() -> SupervisorConfig {
    SupervisorConfig::default()
        .with_poll_interval(Duration::from_millis(10))
        .with_terminate_grace(Duration::from_secs(2))
        .with_drain_timeout(Duration::from_millis(500))
}

fn script(body: &str) -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), body.to_string()]
}

fn stat(time: &str) -> String {
    format!(
        "echo 'frame=   25 fps=25.0 q=28.0 size=     128kB time={time} bitrate= 512.0kbits/s speed=1.00x' >&2"
    )
}

fn callbacks() -> QueueCallbacks {
    QueueCallbacks::new()
}

fn supervisor(callbacks: QueueCallbacks) -> Arc<QueueSupervisor> {
    Arc::new(
        QueueSupervisor::builder()
            .config(config())
            .callbacks(callbacks)
            .build(),
    )
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn statuses(jobs: &[ffqueue_queue::JobRef<()>]) -> Vec<JobStatus> {
    jobs.iter().map(|j| j.status()).collect()
}

#[tokio::test]
async fn test_jobs_run_in_fifo_order() {
    let started = Arc::new(Mutex::new(Vec::new()));
    let callbacks = callbacks().on_job_start({
        let started = started.clone();
        move |index, job| started.lock().unwrap().push((index, job.label().to_string()))
    });
    let sup = supervisor(callbacks);

    for id in ["first", "second", "third"] {
        sup.enqueue_job(JobSpec::new(script("exit 0")).id(id));
    }

    let processed = sup.run_queue(false).await.unwrap();
    let ids: Vec<_> = processed.iter().map(|j| j.label().to_string()).collect();
    assert_eq!(ids, vec!["first", "second", "third"]);
    assert_eq!(statuses(&processed), vec![JobStatus::Completed; 3]);
    assert_eq!(
        *started.lock().unwrap(),
        vec![
            (0, "first".to_string()),
            (1, "second".to_string()),
            (2, "third".to_string())
        ]
    );
    assert_eq!(sup.pending_count(), 0);
    assert_eq!(sup.processed_jobs().len(), 3);
    assert!(!sup.is_running());
}

fn enqueue_mixed(sup: &QueueSupervisor) {
    let a = format!("{}; {}", stat("00:00:01.00"), stat("00:00:02.00"));
    sup.enqueue_job(JobSpec::new(script(&a)).duration(2.0).id("a"));
    sup.enqueue_job(
        JobSpec::new(script("echo 'in.mp4: No such file or directory' >&2; exit 1"))
            .duration(2.0)
            .id("b"),
    );
    let c = stat("00:00:03.00");
    sup.enqueue_job(JobSpec::new(script(&c)).duration(3.0).id("c"));
}

#[tokio::test]
async fn test_stop_on_error_skips_remaining_jobs() {
    let completed = Arc::new(AtomicUsize::new(0));
    let callbacks = callbacks().on_job_complete({
        let completed = completed.clone();
        move |_, _| {
            completed.fetch_add(1, Ordering::SeqCst);
        }
    });
    let sup = supervisor(callbacks);
    enqueue_mixed(&sup);

    let processed = sup.run_queue(true).await.unwrap();
    assert_eq!(
        statuses(&processed),
        vec![JobStatus::Completed, JobStatus::Failed, JobStatus::Cancelled]
    );
    assert_eq!(completed.load(Ordering::SeqCst), 3);

    let failed = &processed[1];
    assert_eq!(failed.failure().and_then(|f| f.exit_code()), Some(1));
    let message = failed.error_message().unwrap();
    assert!(message.starts_with("Process failed with exit code 1."));
    assert!(message.contains("No such file or directory"));

    assert_eq!(processed[2].error_message().as_deref(), Some(SKIPPED_MESSAGE));
    assert_eq!(processed[2].result(), Some(JobOutcome::Cancelled));
}

#[tokio::test]
async fn test_without_stop_on_error_all_jobs_run() {
    let sup = supervisor(callbacks());
    enqueue_mixed(&sup);

    let processed = sup.run_queue(false).await.unwrap();
    assert_eq!(
        statuses(&processed),
        vec![JobStatus::Completed, JobStatus::Failed, JobStatus::Completed]
    );
    assert_eq!(processed[0].result(), Some(JobOutcome::Success));
    assert!(processed[0].error_message().is_none());
}

#[tokio::test]
async fn test_empty_queue_fires_no_callbacks() {
    let calls = Arc::new(AtomicUsize::new(0));
    let bump = |calls: &Arc<AtomicUsize>| {
        let calls = calls.clone();
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
        }
    };
    let (start, complete) = (bump(&calls), bump(&calls));
    let callbacks = callbacks()
        .on_queue_start(move |_| start())
        .on_queue_complete(move |_, _| complete());
    let sup = supervisor(callbacks);

    assert!(sup.run_queue(true).await.unwrap().is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_progress_is_monotonic_and_ends_at_hundred() {
    let progress = Arc::new(Mutex::new(Vec::new()));
    let callbacks = callbacks().on_job_progress({
        let progress = progress.clone();
        move |_, _, pct| progress.lock().unwrap().push(pct)
    });
    let sup = supervisor(callbacks);

    let body = ["00:00:01.00", "00:00:02.00", "00:00:02.00", "00:00:03.00"]
        .iter()
        .map(|t| stat(t))
        .collect::<Vec<_>>()
        .join("; ");
    let job = sup.enqueue_job(JobSpec::new(script(&body)).duration(4.0));

    sup.run_queue(true).await.unwrap();
    assert_eq!(job.status(), JobStatus::Completed);

    let progress = progress.lock().unwrap().clone();
    assert_eq!(progress.len(), 4);
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert!((progress[0] - 25.0).abs() < 1e-6);
    assert_eq!(progress.last().copied(), Some(100.0));
    assert_eq!(job.last_progress(), Some(100.0));
}

#[tokio::test]
async fn test_progress_without_duration_is_invalid() {
    let created = Arc::new(AtomicUsize::new(0));
    let callbacks = callbacks()
        .on_job_progress(|_, _, _| {})
        .on_job_process_created({
            let created = created.clone();
            move |_, _, _| {
                created.fetch_add(1, Ordering::SeqCst);
            }
        });
    let sup = supervisor(callbacks);
    let job = sup.enqueue_job(JobSpec::new(script("exit 0")));

    sup.run_queue(false).await.unwrap();
    assert_eq!(job.status(), JobStatus::Failed);
    assert!(matches!(
        job.failure().as_ref().map(JobFailure::error),
        Some(MediaError::InvalidJobSpecification(_))
    ));
    assert_eq!(created.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_log_lines_exclude_progress() {
    let lines = Arc::new(Mutex::new(Vec::new()));
    let callbacks = callbacks().on_job_log({
        let lines = lines.clone();
        move |_, _, line| lines.lock().unwrap().push(line.to_string())
    });
    let sup = supervisor(callbacks);
    let body = format!(
        "echo 'Input #0, mov,mp4' >&2; {}; echo 'video:12kB audio:3kB' >&2",
        stat("00:00:01.00")
    );
    sup.enqueue_job(JobSpec::new(script(&body)).duration(1.0));

    sup.run_queue(false).await.unwrap();
    assert_eq!(
        *lines.lock().unwrap(),
        vec!["Input #0, mov,mp4".to_string(), "video:12kB audio:3kB".to_string()]
    );
}

#[tokio::test]
async fn test_cancel_current_interrupts_long_job() {
    let sup = supervisor(callbacks());
    let job = sup.enqueue(["sleep", "60"], Some(60.0), Some("long".into()), ());
    let next = sup.enqueue_job(JobSpec::new(script("exit 0")).id("next"));

    let runner = tokio::spawn({
        let sup = sup.clone();
        async move { sup.run_queue(false).await }
    });

    wait_until(|| job.process_handle().is_some()).await;
    assert!(sup.is_running());
    assert_eq!(sup.active_job().map(|j| j.label().to_string()).as_deref(), Some("long"));
    assert!(sup.cancel_current());

    let processed = tokio::time::timeout(Duration::from_secs(10), runner)
        .await
        .expect("run did not finish")
        .unwrap()
        .unwrap();

    assert_eq!(processed.len(), 2);
    assert_eq!(job.status(), JobStatus::Cancelled);
    assert_eq!(job.error_message().as_deref(), Some(CANCELLED_MESSAGE));
    assert!(job.process_handle().is_none());
    assert_eq!(next.status(), JobStatus::Completed);
}

#[tokio::test]
async fn test_cancel_queue_twice() {
    let sup = supervisor(callbacks());
    let job = sup.enqueue(["sleep", "60"], None, None, ());
    let skipped = sup.enqueue(["sleep", "60"], None, None, ());

    let runner = tokio::spawn({
        let sup = sup.clone();
        async move { sup.run_queue(false).await }
    });

    wait_until(|| job.process_handle().is_some()).await;
    assert!(sup.cancel_queue());
    assert!(sup.cancel_queue());

    let processed = tokio::time::timeout(Duration::from_secs(10), runner)
        .await
        .expect("run did not finish")
        .unwrap()
        .unwrap();

    assert_eq!(processed.len(), 2);
    assert_eq!(job.error_message().as_deref(), Some(CANCELLED_MESSAGE));
    assert_eq!(skipped.status(), JobStatus::Cancelled);
    assert_eq!(skipped.error_message().as_deref(), Some(SKIPPED_MESSAGE));
    assert!(!sup.cancel_queue());
}

#[tokio::test]
async fn test_terminate_escalates_to_kill() {
    let sup: Arc<QueueSupervisor> = Arc::new(
        QueueSupervisor::builder()
            .config(
                config()
                    .with_terminate_grace(Duration::from_millis(200))
                    .with_drain_timeout(Duration::from_millis(200)),
            )
            .build(),
    );
    let job = sup.enqueue(script("trap '' TERM; sleep 30"), None, None, ());

    let runner = tokio::spawn({
        let sup = sup.clone();
        async move { sup.run_queue(false).await }
    });

    wait_until(|| job.process_handle().is_some()).await;
    // Let the trap install before signalling.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(sup.cancel_current());

    tokio::time::timeout(Duration::from_secs(10), runner)
        .await
        .expect("run did not finish")
        .unwrap()
        .unwrap();
    assert_eq!(job.status(), JobStatus::Cancelled);
}

#[tokio::test]
async fn test_run_while_running_is_rejected() {
    let sup = supervisor(callbacks());
    let job = sup.enqueue(["sleep", "60"], None, None, ());

    let runner = tokio::spawn({
        let sup = sup.clone();
        async move { sup.run_queue(false).await }
    });
    wait_until(|| job.process_handle().is_some()).await;

    assert_eq!(sup.run_queue(false).await.unwrap_err(), QueueError::AlreadyRunning);
    assert_eq!(sup.clear_pending(), Err(QueueError::AlreadyRunning));
    assert!(sup.is_running());
    assert_eq!(job.status(), JobStatus::Running);

    sup.cancel_queue();
    let processed = runner.await.unwrap().unwrap();
    assert_eq!(processed.len(), 1);
}

#[tokio::test]
async fn test_jobs_enqueued_during_run_wait_for_next_run() {
    let sup = supervisor(callbacks());
    let first = sup.enqueue(script("sleep 0.3"), None, Some("first".into()), ());

    let runner = tokio::spawn({
        let sup = sup.clone();
        async move { sup.run_queue(false).await }
    });
    wait_until(|| first.status() == JobStatus::Running).await;

    let late = sup.enqueue(script("exit 0"), None, Some("late".into()), ());
    assert_eq!(sup.pending_count(), 1);

    let processed = runner.await.unwrap().unwrap();
    assert_eq!(processed.len(), 1);
    assert_eq!(late.status(), JobStatus::Pending);

    let processed = sup.run_queue(false).await.unwrap();
    assert_eq!(processed.len(), 1);
    assert_eq!(late.status(), JobStatus::Completed);
}

#[tokio::test]
async fn test_aborted_run_requeues_unstarted_jobs() {
    let sup = supervisor(callbacks());
    let slow = sup.enqueue(script("sleep 5"), None, Some("slow".into()), ());
    let next = sup.enqueue(script("exit 0"), None, Some("next".into()), ());

    let runner = tokio::spawn({
        let sup = sup.clone();
        async move { sup.run_queue(false).await }
    });
    wait_until(|| slow.process_handle().is_some()).await;
    let handle = slow.process_handle().unwrap();

    runner.abort();
    assert!(runner.await.unwrap_err().is_cancelled());

    assert!(!sup.is_running());
    assert!(sup.active_job().is_none());
    assert_eq!(slow.status(), JobStatus::Cancelled);
    assert_eq!(slow.error_message().unwrap(), CANCELLED_MESSAGE);
    wait_until(|| handle.try_wait().ok().flatten().is_some()).await;

    assert_eq!(sup.pending_count(), 1);
    assert_eq!(next.status(), JobStatus::Pending);

    let last = sup.enqueue(script("exit 0"), None, Some("last".into()), ());
    let processed = sup.run_queue(false).await.unwrap();
    let labels: Vec<&str> = processed.iter().map(|j| j.label()).collect();
    assert_eq!(labels, ["next", "last"]);
    assert_eq!(
        statuses(&processed),
        vec![JobStatus::Completed, JobStatus::Completed]
    );
    assert_eq!(last.status(), JobStatus::Completed);
}

#[tokio::test]
async fn test_panicking_callback_does_not_stop_queue() {
    let finished = Arc::new(Mutex::new(None));
    let callbacks = callbacks()
        .on_job_start(|index, _| {
            if index == 0 {
                panic!("callback failure");
            }
        })
        .on_queue_complete({
            let finished = finished.clone();
            move |_, jobs| *finished.lock().unwrap() = Some(jobs.len())
        });
    let sup = supervisor(callbacks);
    sup.enqueue(script("exit 0"), None, None, ());
    sup.enqueue(script("exit 0"), None, None, ());

    let processed = sup.run_queue(true).await.unwrap();
    assert_eq!(statuses(&processed), vec![JobStatus::Completed; 2]);
    assert_eq!(*finished.lock().unwrap(), Some(2));
}

#[tokio::test]
async fn test_missing_executable_does_not_stop_queue() {
    let sup = supervisor(callbacks());
    let missing = sup.enqueue(["ffqueue-missing-binary"], None, None, ());
    sup.enqueue(script("exit 0"), None, None, ());

    let processed = sup.run_queue(false).await.unwrap();
    assert_eq!(
        statuses(&processed),
        vec![JobStatus::Failed, JobStatus::Completed]
    );
    assert!(missing
        .error_message()
        .unwrap()
        .contains("ffqueue-missing-binary"));
}
