//! Drives one queue run for the worker binary.

use std::sync::Arc;

use tracing::info;

use ffqueue_queue::QueueSupervisor;

use crate::error::WorkerResult;
use crate::manifest::JobContext;
use crate::summary::RunSummary;

/// Run every pending job and summarize the outcome.
///
/// Ctrl-C cancels the queue: the current job is interrupted and the rest are
/// skipped. The listener is removed once the run returns.
pub async fn run_queue_until_done(
    supervisor: Arc<QueueSupervisor<JobContext>>,
    stop_on_error: bool,
) -> WorkerResult<RunSummary> {
    let shutdown_handle = tokio::spawn({
        let supervisor = supervisor.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received shutdown signal, cancelling queue");
                supervisor.cancel_queue();
            }
        }
    });

    let processed = supervisor.run_queue(stop_on_error).await;
    shutdown_handle.abort();

    Ok(RunSummary::from_jobs(&processed?))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use ffqueue_queue::{JobSpec, JobStatus, QueueError, SupervisorConfig};

    use super::*;
    use crate::error::WorkerError;

    fn supervisor() -> Arc<QueueSupervisor<JobContext>> {
        let config = SupervisorConfig::default().with_poll_interval(Duration::from_millis(10));
        Arc::new(QueueSupervisor::new(config))
    }

    fn sh(body: &str) -> JobSpec<JobContext> {
        JobSpec::new(["sh", "-c", body])
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_summary_counts_outcomes() {
        let sup = supervisor();
        sup.enqueue_job(sh("exit 0"));
        sup.enqueue_job(sh("exit 3"));

        let summary = run_queue_until_done(sup.clone(), false).await.unwrap();
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.exit_code(), 1);
        assert!(!sup.is_running());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_concurrent_run_is_a_queue_error() {
        let sup = supervisor();
        let slow = sup.enqueue_job(sh("sleep 5"));

        let first = tokio::spawn(run_queue_until_done(sup.clone(), false));
        tokio::time::timeout(Duration::from_secs(10), async {
            while slow.status() != JobStatus::Running {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let err = run_queue_until_done(sup.clone(), false).await.unwrap_err();
        assert!(matches!(err, WorkerError::Queue(QueueError::AlreadyRunning)));

        assert!(sup.cancel_queue());
        let summary = first.await.unwrap().unwrap();
        assert_eq!(summary.cancelled, 1);
    }
}
