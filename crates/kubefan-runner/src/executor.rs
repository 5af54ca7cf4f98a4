//! External command execution.

use std::fmt;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::ExecError;

/// A fully specified command invocation.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,

    /// Variables set on top of the inherited environment.
    pub env: Vec<(String, String)>,

    /// Absolute deadline for the whole invocation.
    pub timeout: Duration,
}

/// How a command finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Exited(i32),
    /// Killed by a signal, no exit code.
    Signaled,
    /// Killed after the deadline passed.
    TimedOut(Duration),
}

impl Completion {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Exited(0))
    }
}

impl fmt::Display for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exited with code {}", code),
            Self::Signaled => write!(f, "terminated by signal"),
            Self::TimedOut(after) => write!(f, "timed out after {}s", after.as_secs()),
        }
    }
}

/// Combined stdout/stderr of a command and how it finished.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub output: Vec<u8>,
    pub completion: Completion,
}

/// Runs a program and captures its combined output.
///
/// A command that ran and exited non-zero is still `Ok`; `Err` is reserved
/// for failing to run it at all.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput, ExecError>;
}

/// Executes invocations as local child processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessExecutor;

impl ProcessExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandExecutor for ProcessExecutor {
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput, ExecError> {
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .envs(invocation.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(program = %invocation.program, args = ?invocation.args, "Spawning command");

        let mut child = cmd.spawn().map_err(|source| ExecError::Spawn {
            program: invocation.program.clone(),
            source,
        })?;

        let io_error = |source| ExecError::Io {
            program: invocation.program.clone(),
            source,
        };

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return Err(io_error(std::io::Error::other("child stdio not captured")));
        };

        // One deadline covers reading the output and waiting for exit, so a
        // command that closes its streams early still cannot outlive it.
        let mut output = Vec::new();
        let finished = tokio::time::timeout(invocation.timeout, async {
            drain_combined(stdout, stderr, &mut output).await?;
            child.wait().await
        })
        .await;

        match finished {
            Ok(result) => {
                let status = result.map_err(io_error)?;
                let completion = status
                    .code()
                    .map_or(Completion::Signaled, Completion::Exited);
                debug!(program = %invocation.program, %completion, "Command finished");
                Ok(CommandOutput { output, completion })
            }
            Err(_) => {
                warn!(
                    program = %invocation.program,
                    timeout_secs = invocation.timeout.as_secs(),
                    "Command deadline exceeded, killing it"
                );
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "Failed to kill timed out command");
                }
                Ok(CommandOutput {
                    output,
                    completion: Completion::TimedOut(invocation.timeout),
                })
            }
        }
    }
}

/// Read stdout and stderr concurrently, appending whole lines to `output` in
/// arrival order. Bytes already appended survive cancellation of this future.
async fn drain_combined<O, E>(stdout: O, stderr: E, output: &mut Vec<u8>) -> std::io::Result<()>
where
    O: AsyncRead + Unpin + Send + 'static,
    E: AsyncRead + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel();
    tokio::spawn(forward_lines(stdout, tx.clone()));
    tokio::spawn(forward_lines(stderr, tx));

    while let Some(line) = rx.recv().await {
        output.extend_from_slice(&line?);
    }
    Ok(())
}

async fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<std::io::Result<Vec<u8>>>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    loop {
        let mut line = Vec::new();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break, // EOF
            Ok(_) => {
                if !line.ends_with(b"\n") {
                    line.push(b'\n');
                }
                if tx.send(Ok(line)).is_err() {
                    break;
                }
            }
            Err(e) => {
                let _ = tx.send(Err(e));
                break;
            }
        }
    }
}
