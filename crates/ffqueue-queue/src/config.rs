//! Supervisor configuration.

use std::time::Duration;

use ffqueue_media::DEFAULT_PROGRESS_THRESHOLD;

/// Supervisor configuration.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// How often the drive loop checks for process exit and cancellation
    pub poll_interval: Duration,
    /// How long a terminated process may take to exit before it is killed
    pub terminate_grace: Duration,
    /// Bound on waiting for the output readers after the process exits
    pub drain_timeout: Duration,
    /// Characters of diagnostic output kept in a failure message
    pub stderr_preview_chars: usize,
    /// Diagnostic lines retained per job for the failure message
    pub stderr_tail_lines: usize,
    /// Minimum percentage advance between progress callbacks
    pub progress_threshold: f64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(20),
            terminate_grace: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(2),
            stderr_preview_chars: 1000,
            stderr_tail_lines: 200,
            progress_threshold: DEFAULT_PROGRESS_THRESHOLD,
        }
    }
}

impl SupervisorConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            poll_interval: std::env::var("FFQUEUE_POLL_INTERVAL_MS")
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            terminate_grace: std::env::var("FFQUEUE_TERMINATE_GRACE_SECS")
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.terminate_grace),
            drain_timeout: std::env::var("FFQUEUE_DRAIN_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.drain_timeout),
            stderr_preview_chars: std::env::var("FFQUEUE_STDERR_PREVIEW_CHARS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.stderr_preview_chars),
            stderr_tail_lines: std::env::var("FFQUEUE_STDERR_TAIL_LINES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.stderr_tail_lines),
            progress_threshold: std::env::var("FFQUEUE_PROGRESS_THRESHOLD")
                .ok()
                .and_then(|s| s.parse::<f64>().ok())
                .filter(|t| t.is_finite() && *t >= 0.0)
                .unwrap_or(defaults.progress_threshold),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_terminate_grace(mut self, grace: Duration) -> Self {
        self.terminate_grace = grace;
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn with_progress_threshold(mut self, threshold: f64) -> Self {
        self.progress_threshold = threshold;
        self
    }
}
