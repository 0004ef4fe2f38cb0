//! Manifest loading.

use std::path::Path;

use tracing::info;

use ffqueue_models::JobManifest;
use ffqueue_queue::{JobRef, JobSpec, QueueSupervisor};

use crate::error::{WorkerError, WorkerResult};

/// Caller data carried by each job: the manifest entry's `context` value.
pub type JobContext = Option<serde_json::Value>;

/// Read and validate a JSON manifest.
pub fn load_manifest(path: impl AsRef<Path>) -> WorkerResult<JobManifest> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|source| WorkerError::ManifestRead {
        path: path.to_path_buf(),
        source,
    })?;
    let manifest: JobManifest = serde_json::from_str(&raw)?;

    for (i, entry) in manifest.jobs.iter().enumerate() {
        if entry.args.first().map_or(true, |program| program.trim().is_empty()) {
            return Err(WorkerError::invalid_manifest(format!(
                "job {} has an empty argument list",
                i + 1
            )));
        }
    }

    info!(path = %path.display(), jobs = manifest.len(), "Loaded manifest");
    Ok(manifest)
}

/// Enqueue every manifest entry, in order.
pub fn enqueue_manifest(
    supervisor: &QueueSupervisor<JobContext>,
    manifest: JobManifest,
) -> Vec<JobRef<JobContext>> {
    manifest
        .jobs
        .into_iter()
        .map(|entry| {
            supervisor.enqueue_job(JobSpec {
                args: entry.args,
                duration_sec: entry.duration_sec,
                job_id: entry.id,
                context: entry.context,
            })
        })
        .collect()
}
