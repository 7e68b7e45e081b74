//! Process runner
//!
//! Every external program the wizard touches (`tailscale`, `docker`,
//! `hostname`, `reboot`) runs through [`ProcessRunner`], so tests can swap in
//! a scripted double without spawning anything.

use std::pin::Pin;
use std::process::Stdio;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::errors::AgentError;
use crate::process::command::CommandSpec;

/// Lines buffered between a streaming child and its consumer
const STREAM_BUFFER: usize = 64;

/// Exit code reported when the child was killed by a signal
const SIGNALLED_EXIT_CODE: i32 = -1;

/// Result of a command run to completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedOutput {
    pub exit_code: i32,

    /// stdout followed by stderr
    pub output: String,
}

impl CapturedOutput {
    pub fn new(exit_code: i32, output: impl Into<String>) -> Self {
        Self {
            exit_code,
            output: output.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Output trimmed of surrounding whitespace, for error messages
    pub fn trimmed(&self) -> &str {
        self.output.trim()
    }
}

/// One item from a streaming child process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutput {
    /// A line of stdout or stderr, without its terminator
    Line(String),

    /// The child exited; always the last item
    Exited(i32),
}

/// Live output of a child process.
///
/// Yields lines as the child writes them and finishes with exactly one
/// [`ProcessOutput::Exited`]. Dropping the stream does not kill the child;
/// it runs to completion and is reaped in the background.
pub struct ProcessStream {
    rx: mpsc::Receiver<ProcessOutput>,
}

impl ProcessStream {
    /// Create a stream and the sender that feeds it
    pub fn channel() -> (mpsc::Sender<ProcessOutput>, Self) {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        (tx, Self { rx })
    }

    /// Next line or the exit code; `None` once the producer is gone
    pub async fn next_output(&mut self) -> Option<ProcessOutput> {
        self.rx.recv().await
    }
}

impl Stream for ProcessStream {
    type Item = ProcessOutput;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Executes external commands
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run to completion and return the exit code with combined output
    async fn run_captured(&self, command: &CommandSpec) -> Result<CapturedOutput, AgentError>;

    /// Start the command and forward its combined output line by line
    async fn run_streaming(&self, command: &CommandSpec) -> Result<ProcessStream, AgentError>;

    /// Start the command without waiting for it
    fn spawn_detached(&self, command: &CommandSpec) -> Result<(), AgentError>;
}

/// Production runner backed by `tokio::process`
#[derive(Debug, Clone)]
pub struct TokioProcessRunner {
    /// Upper bound for captured commands; the child is killed past it
    timeout: Duration,
}

impl TokioProcessRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn command(cmd: &CommandSpec) -> Command {
        let mut command = Command::new(&cmd.program);
        command.args(&cmd.args);
        if let Some(dir) = &cmd.current_dir {
            command.current_dir(dir);
        }
        command
    }
}

impl Default for TokioProcessRunner {
    fn default() -> Self {
        // Image pulls on a slow uplink can take several minutes
        Self::new(Duration::from_secs(900))
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run_captured(&self, cmd: &CommandSpec) -> Result<CapturedOutput, AgentError> {
        debug!("exec (capture): {}", cmd);

        let mut child = Self::command(cmd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AgentError::ProcessError(format!("Failed to spawn {}: {}", cmd, e)))?;

        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();

        // Drain both pipes while waiting, a full pipe would stall the child
        let collect = async {
            let (status, out, err) = tokio::join!(
                child.wait(),
                read_all(stdout.as_mut()),
                read_all(stderr.as_mut()),
            );
            (status, out, err)
        };

        let outcome = tokio::time::timeout(self.timeout, collect).await;
        let (status, out, err) = match outcome {
            Ok(result) => result,
            Err(_) => {
                let _ = child.kill().await;
                return Err(AgentError::ProcessError(format!(
                    "{} timed out after {}s",
                    cmd,
                    self.timeout.as_secs()
                )));
            }
        };

        let status = status
            .map_err(|e| AgentError::ProcessError(format!("Waiting for {} failed: {}", cmd, e)))?;

        let mut output = String::from_utf8_lossy(&out).into_owned();
        output.push_str(&String::from_utf8_lossy(&err));

        let exit_code = status.code().unwrap_or(SIGNALLED_EXIT_CODE);
        debug!("{} exited with {}", cmd, exit_code);
        Ok(CapturedOutput { exit_code, output })
    }

    async fn run_streaming(&self, cmd: &CommandSpec) -> Result<ProcessStream, AgentError> {
        debug!("exec (stream): {}", cmd);

        let mut child = Self::command(cmd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| AgentError::ProcessError(format!("Failed to spawn {}: {}", cmd, e)))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (tx, stream) = ProcessStream::channel();
        let label = cmd.to_string();

        tokio::spawn(async move {
            tokio::join!(
                forward_lines(stdout, tx.clone()),
                forward_lines(stderr, tx.clone()),
            );

            let exit_code = match child.wait().await {
                Ok(status) => status.code().unwrap_or(SIGNALLED_EXIT_CODE),
                Err(e) => {
                    warn!("Waiting for {} failed: {}", label, e);
                    let _ = tx
                        .send(ProcessOutput::Line(format!("failed to wait for process: {}", e)))
                        .await;
                    SIGNALLED_EXIT_CODE
                }
            };
            debug!("{} exited with {}", label, exit_code);
            let _ = tx.send(ProcessOutput::Exited(exit_code)).await;
        });

        Ok(stream)
    }

    fn spawn_detached(&self, cmd: &CommandSpec) -> Result<(), AgentError> {
        debug!("exec (detached): {}", cmd);

        let mut child = Self::command(cmd)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| AgentError::ProcessError(format!("Failed to spawn {}: {}", cmd, e)))?;

        let label = cmd.to_string();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => debug!("{} exited with {}", label, status),
                Err(e) => warn!("Waiting for {} failed: {}", label, e),
            }
        });
        Ok(())
    }
}

async fn read_all<R: AsyncRead + Unpin>(reader: Option<&mut R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(reader) = reader {
        let _ = reader.read_to_end(&mut buf).await;
    }
    buf
}

/// Forward lines until EOF. Once the consumer is gone the pipe is still
/// drained so the child never blocks on a full pipe.
async fn forward_lines<R: AsyncRead + Unpin>(reader: Option<R>, tx: mpsc::Sender<ProcessOutput>) {
    let Some(reader) = reader else {
        return;
    };
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut forwarding = true;

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                if !forwarding {
                    continue;
                }
                let line = String::from_utf8_lossy(&buf)
                    .trim_end_matches(['\r', '\n'])
                    .to_string();
                if tx.send(ProcessOutput::Line(line)).await.is_err() {
                    forwarding = false;
                }
            }
            Err(e) => {
                warn!("Reading child output failed: {}", e);
                break;
            }
        }
    }
}
