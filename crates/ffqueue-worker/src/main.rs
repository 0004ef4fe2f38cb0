//! ffqueue worker binary.
//!
//! Runs every job of a JSON manifest through the supervisor, one at a time.

use std::sync::Arc;

use anyhow::Context;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ffqueue_media::ProcessLauncher;
use ffqueue_queue::QueueSupervisor;
use ffqueue_worker::{
    enqueue_manifest, load_manifest, logging_callbacks, run_queue_until_done, RunSummary,
    WorkerConfig,
};

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = WorkerConfig::from_env();
    init_tracing(config.json_logs);

    info!("Starting ffqueue-worker");
    debug!("Worker config: {:?}", config);

    let metrics = match init_metrics() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("Metrics disabled: {:#}", e);
            None
        }
    };

    let code = match run(config).await {
        Ok(summary) => {
            info!("Run finished: {}", summary);
            summary.exit_code()
        }
        Err(e) => {
            error!("Worker error: {:#}", e);
            1
        }
    };

    if let Some(handle) = metrics {
        debug!("Metrics snapshot:\n{}", handle.render());
    }

    info!("Worker shutdown complete");
    std::process::exit(code);
}

async fn run(config: WorkerConfig) -> anyhow::Result<RunSummary> {
    config.validate()?;

    let manifest = load_manifest(&config.manifest_path)
        .with_context(|| format!("loading {}", config.manifest_path.display()))?;
    let with_progress = manifest
        .jobs
        .iter()
        .all(|entry| entry.duration_sec.is_some_and(|d| d > 0.0));
    if !with_progress {
        info!("Progress reporting disabled: not every job has a duration");
    }

    let mut launcher = ProcessLauncher::new();
    if let Some(dir) = &config.work_dir {
        launcher = launcher.with_current_dir(dir);
    }

    let supervisor = Arc::new(
        QueueSupervisor::builder()
            .config(config.supervisor.clone())
            .callbacks(logging_callbacks(with_progress))
            .launcher(launcher)
            .build(),
    );
    enqueue_manifest(&supervisor, manifest);

    Ok(run_queue_until_done(supervisor, config.stop_on_error).await?)
}

fn init_tracing(use_json: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("ffqueue=info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

/// Install the Prometheus recorder. Returns a handle used to render metrics.
fn init_metrics() -> anyhow::Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus recorder")
}
