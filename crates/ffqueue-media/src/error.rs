//! Error types for media operations.

use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur while launching or supervising an FFmpeg process.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Executable '{executable}' not found in PATH or configured path")]
    ExecutableNotFound { executable: String },

    #[error("Failed to launch '{executable}': {source}")]
    LaunchFailed {
        executable: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Process failed with exit code {exit_code}.\nCommand: {command}\nStderr (last {preview_chars} chars):\n{stderr_preview}")]
    ProcessFailed {
        command: String,
        exit_code: i32,
        stderr_preview: String,
        preview_chars: usize,
    },

    #[error("Invalid job specification: {0}")]
    InvalidJobSpecification(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MediaError {
    /// Create an invalid specification error.
    pub fn invalid_spec(message: impl Into<String>) -> Self {
        Self::InvalidJobSpecification(message.into())
    }

    /// Create a process failure error, keeping only the tail of `stderr`.
    pub fn process_failed(args: &[String], exit_code: i32, stderr: &str, preview_chars: usize) -> Self {
        Self::ProcessFailed {
            command: args.join(" "),
            exit_code,
            stderr_preview: tail_chars(stderr.trim(), preview_chars),
            preview_chars,
        }
    }

    /// Exit code carried by a process failure.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::ProcessFailed { exit_code, .. } => Some(*exit_code),
            _ => None,
        }
    }
}

/// Last `max_chars` characters of `s`, or `N/A` when empty.
pub(crate) fn tail_chars(s: &str, max_chars: usize) -> String {
    if s.is_empty() {
        return "N/A".to_string();
    }
    let count = s.chars().count();
    if count <= max_chars {
        return s.to_string();
    }
    s.chars().skip(count - max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_failed_keeps_tail() {
        let args = vec!["ffmpeg".to_string(), "-i".to_string(), "missing.mp4".to_string()];
        let stderr = format!("{}missing.mp4: No such file or directory", "x".repeat(50));
        let err = MediaError::process_failed(&args, 1, &stderr, 30);

        assert_eq!(err.exit_code(), Some(1));
        let message = err.to_string();
        assert!(message.contains("exit code 1"));
        assert!(message.contains("Command: ffmpeg -i missing.mp4"));
        assert!(message.contains("Stderr (last 30 chars):\nmp4: No such file or directory"));
        assert!(!message.contains("xxxx"));
    }

    #[test]
    fn test_empty_stderr_preview() {
        let err = MediaError::process_failed(&["ffmpeg".to_string()], 2, "  \n", 100);
        assert!(err.to_string().ends_with("N/A"));
    }

    #[test]
    fn test_not_found_names_executable() {
        let err = MediaError::ExecutableNotFound {
            executable: "non_existent_ffmpeg".to_string(),
        };
        assert!(err.to_string().contains("non_existent_ffmpeg"));
    }
}
