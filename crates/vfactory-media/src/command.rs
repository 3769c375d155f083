//! Subprocess command builder and runner.
//!
//! Every external tool (auto-editor, whisper, FFmpeg) goes through
//! [`ToolRunner`], which enforces a timeout and makes sure the child and
//! anything it spawned are gone before returning.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};

/// Bytes of stdout/stderr kept per stream; older output is dropped.
const MAX_CAPTURE_BYTES: usize = 64 * 1024;

/// How long to wait for output pipes to drain after a child was killed.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// A program invocation.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: String,
    args: Vec<String>,
}

impl ToolCommand {
    /// Create a new command for `program` (name on PATH or explicit path).
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Add an argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add a path argument.
    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy().to_string())
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    /// Short tool name used in logs and error messages.
    pub fn tool_name(&self) -> String {
        Path::new(&self.program)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.clone())
    }
}

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    /// Input file path
    input: PathBuf,
    /// Output file path
    output: PathBuf,
    /// Output arguments (after -i)
    output_args: Vec<String>,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command.
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            output_args: Vec::new(),
        }
    }

    fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Add multiple output arguments.
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set video filter.
    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-vf").output_arg(filter)
    }

    /// Set video codec.
    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    /// Set audio codec.
    pub fn audio_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:a").output_arg(codec)
    }

    /// Drop all audio streams.
    pub fn no_audio(self) -> Self {
        self.output_arg("-an")
    }

    /// Drop all video streams.
    pub fn no_video(self) -> Self {
        self.output_arg("-vn")
    }

    /// Set CRF (quality).
    pub fn crf(self, crf: u8) -> Self {
        self.output_arg("-crf").output_arg(crf.to_string())
    }

    /// Set preset.
    pub fn preset(self, preset: impl Into<String>) -> Self {
        self.output_arg("-preset").output_arg(preset)
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args: Vec<String> = ["-y", "-hide_banner", "-nostdin", "-v", "error", "-i"]
            .into_iter()
            .map(String::from)
            .collect();
        args.push(self.input.to_string_lossy().to_string());

        args.extend(self.output_args.clone());

        args.push(self.output.to_string_lossy().to_string());

        args
    }

    /// Turn into a runnable command for the given ffmpeg binary.
    pub fn into_tool_command(self, binary: impl Into<String>) -> ToolCommand {
        ToolCommand::new(binary).args(self.build_args())
    }
}

/// Captured output of a finished tool.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    /// Exit code (None when killed by a signal)
    pub exit_code: Option<i32>,
    /// Tail of stdout
    pub stdout: String,
    /// Tail of stderr
    pub stderr: String,
}

/// Runner for external tools with a timeout.
#[derive(Debug, Clone, Default)]
pub struct ToolRunner {
    timeout: Option<Duration>,
}

impl ToolRunner {
    /// Create a new runner without a timeout.
    pub fn new() -> Self {
        Self { timeout: None }
    }

    /// Set timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Run a command to completion.
    ///
    /// Non-zero exit maps to [`MediaError::ToolFailed`], exceeding the timeout
    /// to [`MediaError::Timeout`]; both carry the captured stderr tail.
    pub async fn run(&self, cmd: &ToolCommand) -> MediaResult<ToolOutput> {
        let tool = cmd.tool_name();
        let program = check_tool(cmd.program())?;

        debug!(tool = %tool, "Running: {} {}", program.display(), cmd.get_args().join(" "));

        let mut command = Command::new(&program);
        command
            .args(cmd.get_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group so grandchildren (whisper spawns ffmpeg) can be
        // killed together with the tool.
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn()?;
        let mut group = ProcessGroupGuard::new(child.id());

        let stdout_task = tokio::spawn(read_tail(child.stdout.take()));
        let stderr_task = tokio::spawn(read_tail(child.stderr.take()));

        let status = match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, child.wait()).await {
                Ok(status) => status?,
                Err(_) => {
                    warn!(tool = %tool, timeout_secs = timeout.as_secs(), "Tool timed out, killing process");
                    group.kill();
                    let _ = child.kill().await;
                    let stderr = drain(stderr_task).await;
                    stdout_task.abort();
                    return Err(MediaError::Timeout {
                        tool,
                        secs: timeout.as_secs(),
                        stderr,
                    });
                }
            },
            None => child.wait().await?,
        };

        group.disarm();

        let output = ToolOutput {
            exit_code: status.code(),
            stdout: drain(stdout_task).await,
            stderr: drain(stderr_task).await,
        };

        if status.success() {
            debug!(tool = %tool, "Tool finished successfully");
            Ok(output)
        } else {
            Err(MediaError::tool_failed(tool, output.stderr, output.exit_code))
        }
    }
}

/// Kills the child's process group on drop unless disarmed.
///
/// Covers the case where the runner future is dropped mid-run (whole-job
/// abort): `kill_on_drop` only reaches the direct child.
struct ProcessGroupGuard {
    pgid: Option<u32>,
}

impl ProcessGroupGuard {
    fn new(pgid: Option<u32>) -> Self {
        Self { pgid }
    }

    fn kill(&mut self) {
        #[cfg(unix)]
        if let Some(pgid) = self.pgid.take() {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;
            let _ = killpg(Pid::from_raw(pgid as i32), Signal::SIGKILL);
        }
        #[cfg(not(unix))]
        {
            self.pgid = None;
        }
    }

    fn disarm(&mut self) {
        self.pgid = None;
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        self.kill();
    }
}

async fn read_tail<R>(reader: Option<R>) -> String
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return String::new();
    };

    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                if buf.len() > MAX_CAPTURE_BYTES * 2 {
                    let excess = buf.len() - MAX_CAPTURE_BYTES;
                    buf.drain(..excess);
                }
            }
        }
    }

    if buf.len() > MAX_CAPTURE_BYTES {
        let excess = buf.len() - MAX_CAPTURE_BYTES;
        buf.drain(..excess);
    }
    String::from_utf8_lossy(&buf).to_string()
}

async fn drain(task: tokio::task::JoinHandle<String>) -> String {
    let abort = task.abort_handle();
    match tokio::time::timeout(DRAIN_GRACE, task).await {
        Ok(Ok(text)) => text,
        Ok(Err(_)) => String::new(),
        Err(_) => {
            abort.abort();
            String::new()
        }
    }
}

/// Resolve a tool on PATH (or verify an explicit path).
pub fn check_tool(program: &str) -> MediaResult<PathBuf> {
    which::which(program).map_err(|_| MediaError::ToolNotFound(program.to_string()))
}
