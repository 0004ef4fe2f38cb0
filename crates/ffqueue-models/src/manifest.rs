//! Job manifests read by the worker binary.

use serde::{Deserialize, Serialize};

use crate::JobId;

/// A list of jobs to run in order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobManifest {
    pub jobs: Vec<JobEntry>,
}

/// One manifest entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEntry {
    /// Optional caller identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<JobId>,

    /// Full argument list, executable first
    pub args: Vec<String>,

    /// Expected output duration in seconds, used for progress percentages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_sec: Option<f64>,

    /// Free-form caller data carried alongside the job
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

impl JobManifest {
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
