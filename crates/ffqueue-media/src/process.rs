//! FFmpeg process launcher and live process handle.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};

/// Launcher for one external process per job.
#[derive(Debug, Clone, Default)]
pub struct ProcessLauncher {
    /// Working directory for launched processes
    current_dir: Option<PathBuf>,
}

impl ProcessLauncher {
    /// Create a new launcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the working directory for launched processes.
    pub fn with_current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.current_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Start `args[0]` with the remaining arguments.
    ///
    /// Returns as soon as the process exists. Must be called from within a
    /// tokio runtime since the output readers run as tasks.
    pub fn launch(&self, args: &[String]) -> MediaResult<LaunchedProcess> {
        let (program, rest) = args
            .split_first()
            .ok_or_else(|| MediaError::invalid_spec("argument list is empty"))?;

        if program.trim().is_empty() {
            return Err(MediaError::invalid_spec("executable path is empty"));
        }

        let resolved = which::which(program).map_err(|_| MediaError::ExecutableNotFound {
            executable: program.clone(),
        })?;

        debug!("Running: {}", args.join(" "));

        let mut command = Command::new(&resolved);
        command
            .args(rest)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                MediaError::ExecutableNotFound {
                    executable: program.clone(),
                }
            } else {
                MediaError::LaunchFailed {
                    executable: program.clone(),
                    source,
                }
            }
        })?;

        let stdout = child.stdout.take().map(LineStream::spawn).unwrap_or_else(LineStream::closed);
        let stderr = child.stderr.take().map(LineStream::spawn).unwrap_or_else(LineStream::closed);

        Ok(LaunchedProcess {
            handle: ProcessHandle::new(child, program.clone()),
            stdout,
            stderr,
        })
    }
}

/// A freshly started process with its captured output streams.
pub struct LaunchedProcess {
    pub handle: ProcessHandle,
    pub stdout: LineStream,
    pub stderr: LineStream,
}

struct ProcessState {
    child: Child,
    exit_code: Option<i32>,
}

impl ProcessState {
    /// Poll the child, caching the exit code. Returns the cached code once exited.
    fn poll(&mut self) -> std::io::Result<Option<i32>> {
        if let Some(code) = self.exit_code {
            return Ok(Some(code));
        }
        let code = self.child.try_wait()?.map(exit_code_of);
        self.exit_code = code;
        Ok(code)
    }
}

/// Shareable handle to a live process.
///
/// Cloning is cheap. Every operation takes an internal lock for a short,
/// non-blocking critical section, so a controller thread may terminate the
/// process while the drive loop is polling it. Once an exit has been
/// observed, terminate and kill become no-ops: the pid is never signalled
/// after the child has been reaped.
#[derive(Clone)]
pub struct ProcessHandle {
    state: Arc<Mutex<ProcessState>>,
    pid: Option<u32>,
    program: Arc<str>,
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.pid)
            .field("program", &self.program)
            .field("exit_code", &self.exit_code())
            .finish()
    }
}

impl ProcessHandle {
    fn new(child: Child, program: String) -> Self {
        Self {
            pid: child.id(),
            state: Arc::new(Mutex::new(ProcessState {
                child,
                exit_code: None,
            })),
            program: program.into(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ProcessState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// OS process id assigned at launch.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Program name as given in the argument list.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Non-blocking check for exit. Returns the exit code once the process has ended.
    pub fn try_wait(&self) -> MediaResult<Option<i32>> {
        Ok(self.lock().poll()?)
    }

    /// Wait for the process to exit, polling every `poll_interval`.
    pub async fn wait(&self, poll_interval: Duration) -> MediaResult<i32> {
        loop {
            if let Some(code) = self.try_wait()? {
                return Ok(code);
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Exit code, if the exit has already been observed.
    pub fn exit_code(&self) -> Option<i32> {
        self.lock().exit_code
    }

    /// Whether the exit has already been observed.
    pub fn has_exited(&self) -> bool {
        self.exit_code().is_some()
    }

    /// Ask the process to stop gracefully (SIGTERM on unix).
    ///
    /// Returns true if a signal was delivered. Safe to call repeatedly and
    /// concurrently with the process exiting on its own.
    pub fn terminate(&self) -> bool {
        let mut state = self.lock();
        match state.poll() {
            Ok(Some(_)) => return false,
            Ok(None) => {}
            Err(e) => {
                warn!(pid = ?self.pid, "Failed to poll process before terminate: {}", e);
                return false;
            }
        }
        send_terminate(&mut state.child, &self.program)
    }

    /// Forcefully stop the process (SIGKILL on unix).
    ///
    /// Returns true if the kill was issued. No-op once the process has exited.
    pub fn kill(&self) -> bool {
        let mut state = self.lock();
        match state.poll() {
            Ok(Some(_)) => false,
            Ok(None) => match state.child.start_kill() {
                Ok(()) => true,
                Err(e) => {
                    warn!(pid = ?self.pid, "Failed to kill '{}': {}", self.program, e);
                    false
                }
            },
            Err(e) => {
                warn!(pid = ?self.pid, "Failed to poll process before kill: {}", e);
                false
            }
        }
    }
}

#[cfg(unix)]
fn send_terminate(child: &mut Child, program: &str) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return false;
    };
    match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        Ok(()) => true,
        // Exited between the poll and the signal.
        Err(Errno::ESRCH) => false,
        Err(e) => {
            warn!(pid, "Failed to terminate '{}': {}", program, e);
            false
        }
    }
}

#[cfg(not(unix))]
fn send_terminate(child: &mut Child, program: &str) -> bool {
    match child.start_kill() {
        Ok(()) => true,
        Err(e) => {
            warn!("Failed to terminate '{}': {}", program, e);
            false
        }
    }
}

#[cfg(unix)]
fn exit_code_of(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|sig| -sig))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code_of(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

/// Lines read from a child output pipe by a background task.
///
/// Lines are split on both `\n` and `\r` since FFmpeg rewrites its stat
/// line in place with carriage returns. Invalid UTF-8 is replaced.
pub struct LineStream {
    rx: mpsc::UnboundedReceiver<String>,
    reader: Option<JoinHandle<()>>,
}

impl LineStream {
    /// Start draining `stream` on a background task.
    pub fn spawn<R>(stream: R) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_lines(stream, tx));
        Self {
            rx,
            reader: Some(reader),
        }
    }

    /// A stream that never yields anything.
    pub fn closed() -> Self {
        let (_tx, rx) = mpsc::unbounded_channel();
        Self { rx, reader: None }
    }

    /// Wait for the next line. `None` once the pipe is closed and drained.
    pub async fn next_line(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Collect every remaining line until the pipe closes or `timeout` elapses.
    ///
    /// On timeout the reader task is aborted; a grandchild holding the pipe
    /// open must not stall the caller.
    pub async fn drain(&mut self, timeout: Duration) -> Vec<String> {
        let mut lines = Vec::new();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, self.rx.recv()).await {
                Ok(Some(line)) => lines.push(line),
                Ok(None) => break,
                Err(_) => {
                    debug!("Output reader did not finish within {:?}", timeout);
                    self.abort();
                    while let Ok(line) = self.rx.try_recv() {
                        lines.push(line);
                    }
                    break;
                }
            }
        }
        lines
    }

    fn abort(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

impl Drop for LineStream {
    fn drop(&mut self) {
        self.abort();
    }
}

async fn read_lines<R>(mut stream: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 8192];
    let mut pending: Vec<u8> = Vec::new();

    loop {
        let n = match stream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!("Error reading process output: {}", e);
                break;
            }
        };

        for &byte in &buf[..n] {
            if byte == b'\n' || byte == b'\r' {
                if !flush_line(&mut pending, &tx) {
                    return;
                }
            } else {
                pending.push(byte);
            }
        }
    }

    flush_line(&mut pending, &tx);
}

/// Send the pending bytes as one line. Returns false once the receiver is gone.
fn flush_line(pending: &mut Vec<u8>, tx: &mpsc::UnboundedSender<String>) -> bool {
    if pending.is_empty() {
        return true;
    }
    let line = String::from_utf8_lossy(pending).trim_end().to_string();
    pending.clear();
    if line.is_empty() {
        return true;
    }
    tx.send(line).is_ok()
}
