//! Child-process execution with a wall-clock limit and bounded output capture.

use std::ffi::OsString;
use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;

/// How long to wait for pipes to drain once the child has exited or been killed.
const DRAIN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub(crate) struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

#[derive(Debug)]
pub(crate) enum RunError {
    Spawn(io::Error),
    Wait(io::Error),
    Timeout { elapsed: Duration, stderr: String },
}

/// Runs `program` to completion or until `timeout` fires, keeping at most
/// `capture_limit` trailing bytes of each stream.
pub(crate) async fn run(
    program: &Path,
    args: &[OsString],
    timeout: Duration,
    capture_limit: usize,
) -> Result<ProcessOutput, RunError> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let start = Instant::now();
    let mut child = cmd.spawn().map_err(RunError::Spawn)?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let stdout_task = tokio::spawn(read_tail(stdout, capture_limit));
    let stderr_task = tokio::spawn(read_tail(stderr, capture_limit));

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => {
            // A descendant may still hold the pipes open after the child exits.
            let stdout = drain(stdout_task).await;
            let stderr = drain(stderr_task).await;
            Ok(ProcessOutput {
                status,
                stdout: String::from_utf8_lossy(&stdout).into_owned(),
                stderr: String::from_utf8_lossy(&stderr).into_owned(),
                elapsed: start.elapsed(),
            })
        }
        Ok(Err(e)) => Err(RunError::Wait(e)),
        Err(_) => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            stdout_task.abort();
            let stderr = drain(stderr_task).await;
            Err(RunError::Timeout {
                elapsed: start.elapsed(),
                stderr: String::from_utf8_lossy(&stderr).into_owned(),
            })
        }
    }
}

/// Waits up to [`DRAIN_GRACE`] for a reader task, aborting it past that.
async fn drain(task: JoinHandle<Vec<u8>>) -> Vec<u8> {
    let abort = task.abort_handle();
    match tokio::time::timeout(DRAIN_GRACE, task).await {
        Ok(result) => result.unwrap_or_default(),
        Err(_) => {
            abort.abort();
            Vec::new()
        }
    }
}

/// Drains a stream to EOF so the child never blocks on a full pipe, keeping
/// only the last `limit` bytes.
async fn read_tail<R: AsyncRead + Unpin>(handle: Option<R>, limit: usize) -> Vec<u8> {
    let mut kept = Vec::new();
    let Some(mut handle) = handle else {
        return kept;
    };

    let mut chunk = [0u8; 8192];
    loop {
        match handle.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                kept.extend_from_slice(&chunk[..n]);
                if kept.len() > limit.saturating_mul(2) {
                    let excess = kept.len() - limit;
                    kept.drain(..excess);
                }
            }
        }
    }

    if kept.len() > limit {
        let excess = kept.len() - limit;
        kept.drain(..excess);
    }
    kept
}
