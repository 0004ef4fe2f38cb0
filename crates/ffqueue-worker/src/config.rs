//! Worker configuration.

use std::path::PathBuf;

use ffqueue_queue::SupervisorConfig;

use crate::error::{WorkerError, WorkerResult};

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Manifest listing the jobs to run
    pub manifest_path: PathBuf,
    /// Skip remaining jobs after the first failure
    pub stop_on_error: bool,
    /// Emit JSON logs instead of human-readable output
    pub json_logs: bool,
    /// Working directory for launched processes
    pub work_dir: Option<PathBuf>,
    /// Supervisor tuning
    pub supervisor: SupervisorConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            manifest_path: PathBuf::from("jobs.json"),
            stop_on_error: true,
            json_logs: false,
            work_dir: None,
            supervisor: SupervisorConfig::default(),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            manifest_path: std::env::var("FFQUEUE_MANIFEST")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("jobs.json")),
            stop_on_error: std::env::var("FFQUEUE_STOP_ON_ERROR")
                .ok()
                .and_then(|s| parse_bool(&s))
                .unwrap_or(true),
            json_logs: std::env::var("LOG_FORMAT")
                .map(|v| v.to_lowercase() == "json")
                .unwrap_or(false),
            work_dir: std::env::var("FFQUEUE_WORK_DIR")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            supervisor: SupervisorConfig::from_env(),
        }
    }
}

impl WorkerConfig {
    /// Check settings that can only be verified against the filesystem.
    pub fn validate(&self) -> WorkerResult<()> {
        if let Some(dir) = &self.work_dir {
            if !dir.is_dir() {
                return Err(WorkerError::config_error(format!(
                    "FFQUEUE_WORK_DIR {} is not a directory",
                    dir.display()
                )));
            }
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
