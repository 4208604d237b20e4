//! Runs the wrapped command through the shell.
//!
//! The child's stdout and stderr are forwarded to ours as they arrive while a
//! copy of each stream is kept, so a failed run can be diagnosed afterwards.

use regex::Regex;
use std::io;
use std::process::Stdio;
use std::sync::OnceLock;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Command;

/// Outcome of running the wrapped command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionResult {
    Success,
    Failure {
        /// `None` when the child was terminated by a signal
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("failed while running `{command}`: {source}")]
    Wait {
        command: String,
        #[source]
        source: io::Error,
    },
}

/// Executes command lines with a platform shell
#[derive(Debug, Clone)]
pub struct CommandRunner {
    passthrough: bool,
}

impl CommandRunner {
    /// Runner that forwards child output to this process's stdout/stderr
    pub fn new() -> Self {
        Self { passthrough: true }
    }

    /// Runner that only captures child output
    pub fn silent() -> Self {
        Self { passthrough: false }
    }

    /// Run a command line, capturing its output and forwarding it when configured to.
    pub async fn run(&self, command_line: &str) -> Result<ExecutionResult, RunError> {
        if self.passthrough {
            self.run_with(command_line, tokio::io::stdout(), tokio::io::stderr())
                .await
        } else {
            self.run_with(command_line, tokio::io::sink(), tokio::io::sink())
                .await
        }
    }

    /// Run a command line, forwarding its output to the given sinks.
    pub async fn run_with<O, E>(
        &self,
        command_line: &str,
        out: O,
        err: E,
    ) -> Result<ExecutionResult, RunError>
    where
        O: AsyncWrite + Unpin,
        E: AsyncWrite + Unpin,
    {
        let spawn_error = |source| RunError::Spawn {
            command: command_line.to_string(),
            source,
        };

        let mut child = shell_command(command_line)
            .stdin(Stdio::inherit())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn_error)?;

        let child_stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_error(io::Error::other("stdout was not captured")))?;
        let child_stderr = child
            .stderr
            .take()
            .ok_or_else(|| spawn_error(io::Error::other("stderr was not captured")))?;

        let (stdout, stderr, status) = tokio::join!(
            tee(child_stdout, out),
            tee(child_stderr, err),
            child.wait()
        );

        let wait_error = |source| RunError::Wait {
            command: command_line.to_string(),
            source,
        };
        let status = status.map_err(wait_error)?;
        let stdout = stdout.map_err(wait_error)?;
        let stderr = stderr.map_err(wait_error)?;

        tracing::debug!(command = command_line, ?status, "command finished");

        if status.success() {
            return Ok(ExecutionResult::Success);
        }

        Ok(ExecutionResult::Failure {
            exit_code: status.code(),
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }
}

impl Default for CommandRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
fn shell_command(command_line: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command_line);
    cmd
}

#[cfg(windows)]
fn shell_command(command_line: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command_line);
    cmd
}

/// Copy `reader` into `sink` chunk by chunk, returning everything read.
///
/// A sink that stops accepting writes (closed pipe) does not stop the capture.
async fn tee<R, W>(mut reader: R, mut sink: W) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut captured = Vec::new();
    let mut buf = [0u8; 8192];
    let mut sink_open = true;

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        if sink_open {
            let forwarded = async {
                sink.write_all(&buf[..n]).await?;
                sink.flush().await
            };
            sink_open = forwarded.await.is_ok();
        }
        captured.extend_from_slice(&buf[..n]);
    }

    Ok(captured)
}

/// Build the command line the shell runs from a program and its arguments.
pub fn command_line(program: &str, args: &[String]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line.trim().to_string()
}

/// Normalized output of a failed run, used as diagnosis input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedFailure {
    command: String,
    output: String,
}

impl CapturedFailure {
    /// Build from raw streams; `None` if nothing remains after normalization.
    pub fn from_streams(command: &str, stdout: &str, stderr: &str) -> Option<Self> {
        let output = normalize_output(stdout, stderr);
        if output.is_empty() {
            return None;
        }
        Some(Self {
            command: command.to_string(),
            output,
        })
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn output(&self) -> &str {
        &self.output
    }
}

/// Stdout then stderr, ANSI-stripped, `\n` line endings, trimmed.
pub fn normalize_output(stdout: &str, stderr: &str) -> String {
    let combined = [stdout, stderr]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    strip_ansi(&combined)
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .trim()
        .to_string()
}

fn ansi_regex() -> &'static Regex {
    static ANSI: OnceLock<Regex> = OnceLock::new();
    ANSI.get_or_init(|| {
        // CSI sequences, OSC sequences (BEL or ST terminated), then two-byte escapes
        Regex::new(r"\x1b\[[0-?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[@-Z\\-_]")
            .expect("ANSI pattern is valid")
    })
}

/// Remove terminal escape sequences (colors, cursor movement, hyperlinks).
pub fn strip_ansi(text: &str) -> String {
    ansi_regex().replace_all(text, "").into_owned()
}

/// Describe common shell exit codes
pub fn interpret_exit_code(code: i32) -> &'static str {
    match code {
        0 => "success",
        1 => "general error",
        2 => "misuse of shell command",
        126 => "permission problem or command not executable",
        127 => "command not found",
        130 => "terminated by Ctrl+C (SIGINT)",
        137 => "killed (SIGKILL)",
        139 => "segmentation fault (SIGSEGV)",
        143 => "terminated (SIGTERM)",
        _ if code > 128 && code < 256 => "terminated by signal",
        _ => "error",
    }
}
