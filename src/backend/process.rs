//! JSONL subprocess consumer.
//!
//! Owns the OS process boundary for one execution: spawns the CLI, writes the
//! prompt to stdin and closes it, then yields one parsed JSON value per stdout
//! line. The stream is pull-based; nothing is read ahead of the consumer.

use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;

use async_stream::stream;
use futures::Stream;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Child;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::error::ProcessFailure;
use crate::exec::CliLocation;

/// Bytes of stderr kept for error classification (the tail is kept).
const STDERR_LIMIT: usize = 64 * 1024;
/// Malformed lines are logged up to this many characters.
const LOG_LINE_CHARS: usize = 200;

/// Everything needed to launch one backend process.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub location: CliLocation,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Extra variables on top of the inherited environment.
    pub env: Vec<(String, String)>,
    /// Written to stdin, which is then closed.
    pub stdin: Option<String>,
}

pub type JsonlStream = Pin<Box<dyn Stream<Item = Result<Value, ProcessFailure>> + Send>>;

enum Step {
    Line(String),
    Eof,
    Failed(std::io::Error),
    Cancelled,
}

/// Spawn the process and stream its stdout as parsed JSON values.
///
/// The stream ends silently when `cancel` fires (the child is killed) and
/// ends with one `Err` when the process cannot start or exits unsuccessfully.
pub fn spawn_jsonl(invocation: Invocation, cancel: CancellationToken) -> JsonlStream {
    Box::pin(stream! {
        let mut cmd = invocation.location.command(
            invocation.cwd.as_deref(),
            &invocation.args,
            &invocation.env,
        );
        cmd.stdin(if invocation.stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        info!(
            path = %invocation.location.display_path(),
            args = ?invocation.args,
            cwd = ?invocation.cwd,
            "Spawning backend CLI"
        );

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                error!(path = %invocation.location.display_path(), error = %e, "Failed to spawn backend CLI");
                yield Err(ProcessFailure::Spawn(e));
                return;
            }
        };

        if let (Some(mut stdin), Some(prompt)) = (child.stdin.take(), invocation.stdin) {
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(prompt.as_bytes()).await {
                    warn!(error = %e, "Failed to write prompt to CLI stdin");
                }
                // stdin is dropped here, closing the pipe.
            });
        }

        let stderr_task = child.stderr.take().map(|s| tokio::spawn(collect_tail(s, STDERR_LIMIT)));

        let Some(stdout) = child.stdout.take() else {
            terminate(&mut child).await;
            yield Err(ProcessFailure::Io(std::io::Error::other("stdout was not captured")));
            return;
        };
        let mut lines = BufReader::new(stdout).lines();

        loop {
            let step = tokio::select! {
                biased;
                _ = cancel.cancelled() => Step::Cancelled,
                line = lines.next_line() => match line {
                    Ok(Some(line)) => Step::Line(line),
                    Ok(None) => Step::Eof,
                    Err(e) => Step::Failed(e),
                },
            };

            match step {
                Step::Line(line) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<Value>(trimmed) {
                        Ok(value) => yield Ok(value),
                        Err(e) => warn!(
                            error = %e,
                            line = %truncate(trimmed, LOG_LINE_CHARS),
                            "Skipping malformed JSONL line"
                        ),
                    }
                }
                Step::Eof => break,
                Step::Cancelled => {
                    debug!("Execution cancelled, terminating backend CLI");
                    terminate(&mut child).await;
                    return;
                }
                Step::Failed(e) => {
                    terminate(&mut child).await;
                    if !cancel.is_cancelled() {
                        yield Err(ProcessFailure::Io(e));
                    }
                    return;
                }
            }
        }

        let status = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            status = child.wait() => Some(status),
        };
        let status = match status {
            None => {
                terminate(&mut child).await;
                return;
            }
            Some(Ok(status)) => status,
            Some(Err(e)) => {
                error!(error = %e, "Failed to wait for backend CLI");
                yield Err(ProcessFailure::Io(e));
                return;
            }
        };

        if status.success() {
            debug!("Backend CLI exited successfully");
            return;
        }
        if cancel.is_cancelled() {
            return;
        }

        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };
        warn!(status = %status, stderr_len = stderr.len(), "Backend CLI exited with failure");
        yield Err(ProcessFailure::Exited { code: status.code(), stderr });
    })
}

async fn terminate(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        debug!(error = %e, "Backend CLI already exited");
    }
    if let Err(e) = child.wait().await {
        warn!(error = %e, "Failed to reap backend CLI");
    }
}

/// Drain `reader` to EOF, keeping at most the last `limit` bytes.
async fn collect_tail<R: AsyncRead + Unpin>(mut reader: R, limit: usize) -> String {
    let mut tail: Vec<u8> = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                tail.extend_from_slice(&buf[..n]);
                if tail.len() > limit {
                    let excess = tail.len() - limit;
                    tail.drain(..excess);
                }
            }
            Err(e) => {
                debug!(error = %e, "Stopped reading CLI stderr");
                break;
            }
        }
    }
    String::from_utf8_lossy(&tail).to_string()
}

fn truncate(line: &str, max_chars: usize) -> String {
    if line.chars().count() > max_chars {
        let head: String = line.chars().take(max_chars).collect();
        format!("{}...", head)
    } else {
        line.to_string()
    }
}
