//! Remote execution gateway
//!
//! The single place that turns "run this argv inside pod X" into an actual
//! local process. Synchronous executions capture output with per-chunk
//! stream tagging and fail with [`Error::ExecTimeout`] past a configurable
//! ceiling; backgrounded pipelines return a live [`RemoteProcess`] handle
//! immediately.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tempfile::NamedTempFile;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tracing::debug;

use crate::command::{compose, CommandPipeline, ComposedCommand};
use crate::credentials::ClusterCredentials;
use crate::{Error, Result, DEFAULT_EXEC_TIMEOUT_SECS};

/// Which stream a chunk of process output arrived on
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamKind {
    /// Standard output
    Stdout,
    /// Standard error
    Stderr,
}

struct OutputChunk {
    kind: StreamKind,
    data: Vec<u8>,
}

/// Captured output of a synchronous remote execution
#[derive(Clone, Debug)]
pub struct ExecOutput {
    /// Process exit code (-1 when terminated by a signal)
    pub exit_code: i32,
    /// Everything the process wrote to stdout
    pub stdout: String,
    /// Everything the process wrote to stderr
    pub stderr: String,
    /// Stdout split at line boundaries, for structured parsing
    pub stdout_lines: Vec<String>,
}

impl ExecOutput {
    /// Whether the process exited with code zero
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Accumulates partial output until a full line boundary is available
///
/// Only complete lines are classified as stdout lines; whatever remains at
/// stream end is flushed as a final line.
#[derive(Default)]
struct LineAccumulator {
    buffer: String,
    lines: Vec<String>,
}

impl LineAccumulator {
    fn push(&mut self, text: &str) {
        self.buffer.push_str(text);
        while let Some(boundary) = self.buffer.find('\n') {
            let rest = self.buffer.split_off(boundary + 1);
            let mut line = std::mem::replace(&mut self.buffer, rest);
            line.truncate(line.trim_end_matches(['\n', '\r']).len());
            self.lines.push(line);
        }
    }

    fn finish(mut self) -> Vec<String> {
        if !self.buffer.is_empty() {
            self.lines.push(self.buffer);
        }
        self.lines
    }
}

/// Gateway for running commands inside a pod
#[derive(Clone, Debug)]
pub struct ExecGateway {
    timeout: Duration,
}

impl Default for ExecGateway {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_EXEC_TIMEOUT_SECS))
    }
}

impl ExecGateway {
    /// Create a gateway with the given synchronous-execution ceiling
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// The configured ceiling
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run an argv inside the pod and wait for it, capturing output
    ///
    /// The invocation is wrapped with the kubectl exec prefix derived from
    /// the credentials. Past the ceiling the call fails with
    /// [`Error::ExecTimeout`] and the process is left to the OS to reap;
    /// callers must treat that as terminal for this call.
    pub async fn exec(
        &self,
        credentials: &ClusterCredentials,
        pod: &str,
        argv: &[String],
        working_dir: Option<&Path>,
    ) -> Result<ExecOutput> {
        let pipeline = CommandPipeline::remote(argv.to_vec());
        let composed = compose(credentials, pod, &pipeline)?;
        self.run_composed(composed, working_dir).await
    }

    /// Run an already-composed command and wait for it, capturing output
    pub async fn run_composed(
        &self,
        composed: ComposedCommand,
        working_dir: Option<&Path>,
    ) -> Result<ExecOutput> {
        debug!(program = %composed.program, args = ?composed.args, "Executing command");

        let mut command = Command::new(&composed.program);
        command
            .args(&composed.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| {
            Error::transport(format!("failed to spawn {}: {}", composed.program, e))
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (tx, mut rx) = mpsc::channel::<OutputChunk>(64);
        if let Some(stdout) = stdout {
            tokio::spawn(pump(stdout, StreamKind::Stdout, tx.clone()));
        }
        if let Some(stderr) = stderr {
            tokio::spawn(pump(stderr, StreamKind::Stderr, tx.clone()));
        }
        drop(tx);

        let collect = async {
            let mut stdout_text = String::new();
            let mut stderr_text = String::new();
            let mut stdout_lines = LineAccumulator::default();

            while let Some(chunk) = rx.recv().await {
                let text = String::from_utf8_lossy(&chunk.data);
                match chunk.kind {
                    StreamKind::Stdout => {
                        stdout_lines.push(&text);
                        stdout_text.push_str(&text);
                    }
                    StreamKind::Stderr => stderr_text.push_str(&text),
                }
            }

            let status = child.wait().await?;
            Ok::<_, Error>(ExecOutput {
                exit_code: status.code().unwrap_or(-1),
                stdout: stdout_text,
                stderr: stderr_text,
                stdout_lines: stdout_lines.finish(),
            })
        };

        tokio::time::timeout(self.timeout, collect)
            .await
            .map_err(|_| Error::ExecTimeout)?
    }

    /// Spawn a composed pipeline and return immediately with a live handle
    ///
    /// Used for the backgrounded sidecar+main pipeline: one spawned process
    /// whose sidecar half runs detached inside its process tree, so there is
    /// exactly one handle to track and later terminate.
    pub fn spawn(&self, mut composed: ComposedCommand) -> Result<RemoteProcess> {
        debug!(program = %composed.program, args = ?composed.args, "Spawning pipeline");

        let script = composed.take_script();
        let child = Command::new(&composed.program)
            .args(&composed.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                Error::transport(format!("failed to spawn {}: {}", composed.program, e))
            })?;

        Ok(RemoteProcess {
            child,
            _script: script,
        })
    }
}

async fn pump(
    mut reader: impl AsyncReadExt + Unpin,
    kind: StreamKind,
    tx: mpsc::Sender<OutputChunk>,
) {
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let chunk = OutputChunk {
                    kind,
                    data: buf[..n].to_vec(),
                };
                if tx.send(chunk).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Handle to a spawned pipeline
///
/// Terminating the handle kills the local process tree; anything left running
/// remotely is left to the remote shell to reap. Dropping the handle also
/// terminates the process.
#[derive(Debug)]
pub struct RemoteProcess {
    child: Child,
    _script: Option<NamedTempFile>,
}

impl RemoteProcess {
    /// OS process id, if the process is still running
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Take the stdin handle for writing to the pipeline, once
    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.child.stdin.take()
    }

    /// Take the stdout handle for streaming, once
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Take the stderr handle for streaming, once
    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    /// Wait for the process to exit
    pub async fn wait(&mut self) -> Result<i32> {
        let status = self.child.wait().await?;
        Ok(status.code().unwrap_or(-1))
    }

    /// Terminate the process and reap it
    pub async fn terminate(&mut self) -> Result<()> {
        let _ = self.child.start_kill();
        let _ = self.child.wait().await;
        Ok(())
    }
}

impl Drop for RemoteProcess {
    fn drop(&mut self) {
        let _ = self.child.start_kill();
    }
}
