// crates/core/src/generation/command.rs
//! Command provider: spawns a local process with the prompt as its last
//! argument and reads the generated code from stdout.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{ChildStderr, Command as TokioCommand};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

use super::provider::{log_excerpt, ChunkStream, GenerationProvider};
use crate::error::GenerationError;

/// Bytes of stderr kept from a streaming child for its failure message.
const STDERR_TAIL_BYTES: usize = 8 * 1024;

/// Generation provider backed by a local command.
pub struct CommandProvider {
    program: String,
    args: Vec<String>,
    timeout_secs: u64,
}

impl CommandProvider {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout_secs: 120,
        }
    }

    /// Build from a whitespace-separated command line.
    pub fn parse(command_line: &str) -> Result<Self, GenerationError> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts.next().ok_or_else(|| {
            GenerationError::NotAvailable("GENERATION_COMMAND is not set".into())
        })?;
        Ok(Self::new(program, parts.collect()))
    }

    /// Set the timeout in seconds for bulk invocations and for the gap
    /// between streamed lines.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    fn command(&self, prompt: &str) -> TokioCommand {
        let mut cmd = TokioCommand::new(&self.program);
        cmd.args(&self.args)
            .arg(prompt)
            // Null stdin so the child never blocks waiting for input
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl GenerationProvider for CommandProvider {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let t0 = std::time::Instant::now();
        tracing::info!(program = %self.program, timeout_secs = self.timeout_secs, "command provider: spawning");

        let output = timeout(
            Duration::from_secs(self.timeout_secs),
            self.command(prompt).output(),
        )
        .await
        .map_err(|_| {
            tracing::error!(elapsed_ms = t0.elapsed().as_millis() as u64, "command provider: timed out");
            GenerationError::Timeout(self.timeout_secs)
        })?
        .map_err(|e| {
            tracing::error!(error = %e, "command provider: failed to spawn process");
            GenerationError::SpawnFailed(e.to_string())
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::error!(exit_code = ?output.status.code(), stderr = %log_excerpt(&stderr), "command provider: non-zero exit");
            return Err(GenerationError::CommandFailed(stderr.trim().to_string()));
        }

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        tracing::info!(
            elapsed_ms = t0.elapsed().as_millis() as u64,
            stdout_len = stdout.len(),
            "command provider: response received"
        );
        if stdout.trim().is_empty() {
            return Err(GenerationError::EmptyResponse);
        }
        Ok(stdout)
    }

    /// Relay stdout line by line. Dropping the returned stream kills the
    /// child.
    async fn generate_streaming(&self, prompt: &str) -> Result<ChunkStream, GenerationError> {
        tracing::info!(program = %self.program, "command provider: spawning (streaming)");

        let mut child = self.command(prompt).spawn().map_err(|e| {
            tracing::error!(error = %e, "command provider: failed to spawn");
            GenerationError::SpawnFailed(e.to_string())
        })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| GenerationError::SpawnFailed("failed to capture stdout".into()))?;
        // Drained alongside stdout so a chatty child never blocks on a full pipe
        let stderr_tail = child.stderr.take().map(|s| tokio::spawn(read_stderr_tail(s)));

        let line_timeout = Duration::from_secs(self.timeout_secs);
        let timeout_secs = self.timeout_secs;
        let (tx, mut rx) = mpsc::channel::<Result<String, GenerationError>>(64);

        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                let line = match timeout(line_timeout, lines.next_line()).await {
                    Ok(Ok(Some(line))) => line,
                    Ok(Ok(None)) => break,
                    Ok(Err(e)) => {
                        let _ = tx.send(Err(GenerationError::CommandFailed(e.to_string()))).await;
                        let _ = child.kill().await;
                        return;
                    }
                    Err(_) => {
                        let _ = tx.send(Err(GenerationError::Timeout(timeout_secs))).await;
                        let _ = child.kill().await;
                        return;
                    }
                };
                if tx.send(Ok(format!("{line}\n"))).await.is_err() {
                    // Receiver dropped: abort the child
                    let _ = child.kill().await;
                    return;
                }
            }

            match child.wait().await {
                Ok(status) if status.success() => {}
                Ok(status) => {
                    let message = match stderr_tail {
                        Some(task) => task.await.unwrap_or_default(),
                        None => String::new(),
                    };
                    tracing::warn!(exit_code = ?status.code(), stderr = %log_excerpt(&message), "command provider: non-zero exit");
                    let _ = tx
                        .send(Err(GenerationError::CommandFailed(message.trim().to_string())))
                        .await;
                }
                Err(e) => {
                    let _ = tx
                        .send(Err(GenerationError::CommandFailed(format!(
                            "failed to wait for command: {e}"
                        ))))
                        .await;
                }
            }
        });

        Ok(Box::pin(async_stream::stream! {
            while let Some(item) = rx.recv().await {
                yield item;
            }
        }))
    }

    fn name(&self) -> &str {
        "command"
    }

    fn model(&self) -> &str {
        &self.program
    }
}

/// Read `stderr` to EOF, keeping only the last `STDERR_TAIL_BYTES`.
async fn read_stderr_tail(mut stderr: ChildStderr) -> String {
    let mut tail = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        match stderr.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                tail.extend_from_slice(&buf[..n]);
                if tail.len() > STDERR_TAIL_BYTES {
                    let excess = tail.len() - STDERR_TAIL_BYTES;
                    tail.drain(..excess);
                }
            }
        }
    }
    String::from_utf8_lossy(&tail).into_owned()
}
