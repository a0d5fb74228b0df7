//! Node side of remote exec: fetch the job, run it and write results back.
//!
//! Every write goes through an acquire under the invocation's session, so once
//! the dispatcher destroys the session nothing more lands in its subtree.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{ApiError, Consistency, Kv};

use super::spec::{ExecEvent, JobBody, JobSpec};
use super::{job_key, node_key};

/// Largest value written per output key.
const OUTPUT_CHUNK: usize = 4 * 1024;
/// Buffered output is flushed this long after its first byte arrived.
const FLUSH_IDLE: Duration = Duration::from_millis(500);
/// Heartbeat interval when the job carries no wait.
const FALLBACK_WAIT: Duration = Duration::from_secs(1);
/// Exit code reported when the job could not be started or streamed.
const FAILED_EXIT: i32 = 255;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("failed to decode event payload: {0}")]
    Payload(#[source] serde_json::Error),

    #[error("failed to read job: {0}")]
    Read(#[source] ApiError),

    #[error("failed to decode job: {0}")]
    Spec(#[source] serde_json::Error),

    #[error("failed to write {key}: {reason}")]
    Write { key: String, reason: String },

    #[error("failed to start job: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("job has an empty argument list")]
    EmptyArgs,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub struct Executor<K: Kv + ?Sized> {
    kv: Arc<K>,
    node: String,
}

impl<K: Kv + ?Sized> Executor<K> {
    pub fn new(kv: Arc<K>, node: impl Into<String>) -> Self {
        Self {
            kv,
            node: node.into(),
        }
    }

    /// Handle one `_rexec` event payload.
    ///
    /// Returns `Ok(None)` when the job could not be found, which happens when
    /// the invocation already finished. Otherwise returns the exit code that
    /// was reported.
    pub async fn handle(
        &self,
        payload: &[u8],
        cancel: &CancellationToken,
    ) -> Result<Option<i32>, ExecutorError> {
        let event = ExecEvent::decode(payload).map_err(ExecutorError::Payload)?;
        let Some(spec) = self.fetch_spec(&event).await? else {
            debug!(target: "rexec::executor", session = %event.session, "job not found, ignoring event");
            return Ok(None);
        };

        let code = match self.execute(&event, &spec, cancel).await {
            Ok(code) => code,
            Err(e) => {
                warn!(target: "rexec::executor", session = %event.session, "remote exec failed: {e}");
                FAILED_EXIT
            }
        };

        self.write_key(&event, "exit", code.to_string().as_bytes())
            .await?;
        info!(target: "rexec::executor", session = %event.session, code, "job finished");
        Ok(Some(code))
    }

    /// Stale read first; a miss may be replication lag so retry consistently.
    async fn fetch_spec(&self, event: &ExecEvent) -> Result<Option<JobSpec>, ExecutorError> {
        let key = job_key(&event.prefix, &event.session);
        let mut pair = self
            .kv
            .get(&key, Consistency::Stale)
            .await
            .map_err(ExecutorError::Read)?;
        if pair.is_none() {
            pair = self
                .kv
                .get(&key, Consistency::Consistent)
                .await
                .map_err(ExecutorError::Read)?;
        }
        match pair {
            Some(pair) => Ok(Some(
                JobSpec::decode(&pair.value).map_err(ExecutorError::Spec)?,
            )),
            None => Ok(None),
        }
    }

    async fn execute(
        &self,
        event: &ExecEvent,
        spec: &JobSpec,
        cancel: &CancellationToken,
    ) -> Result<i32, ExecutorError> {
        self.write_key(event, "ack", b"").await?;

        // Keeps the script file alive until the job is done.
        let mut script: Option<ScriptFile> = None;
        let mut cmd = match spec.body() {
            JobBody::Script(body) => {
                let file = ScriptFile::create(body).await?;
                let cmd = shell_command(&file.path().to_string_lossy());
                script = Some(file);
                cmd
            }
            JobBody::Command(line) => shell_command(line),
            JobBody::Argv(args) => {
                let (program, rest) = args.split_first().ok_or(ExecutorError::EmptyArgs)?;
                let mut cmd = Command::new(program);
                cmd.args(rest);
                cmd
            }
        };
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(ExecutorError::Spawn)?;
        debug!(target: "rexec::executor", pid = child.id(), "job started");

        // stdout and stderr share one stream, interleaved as read.
        let (tx, rx) = mpsc::channel(16);
        if let Some(out) = child.stdout.take() {
            pump(out, tx.clone());
        }
        if let Some(err) = child.stderr.take() {
            pump(err, tx);
        }

        let wait = if spec.wait().is_zero() {
            FALLBACK_WAIT
        } else {
            spec.wait()
        };
        let streamed = tokio::select! {
            r = self.stream_output(event, rx, wait) => r,
            _ = cancel.cancelled() => {
                warn!(target: "rexec::executor", session = %event.session, "interrupted, killing job");
                Ok(())
            }
        };
        if let Err(e) = streamed {
            let _ = child.kill().await;
            return Err(e);
        }
        if cancel.is_cancelled() {
            let _ = child.kill().await;
        }

        let status = child.wait().await?;
        drop(script);
        Ok(status.code().unwrap_or(-1))
    }

    /// Forward output in chunks. A chunk goes out when it is full or when it
    /// has waited `FLUSH_IDLE`; after `wait` without any write a heartbeat is sent.
    async fn stream_output(
        &self,
        event: &ExecEvent,
        mut rx: mpsc::Receiver<Vec<u8>>,
        wait: Duration,
    ) -> Result<(), ExecutorError> {
        let mut seq: u64 = 0;
        let mut buf: Vec<u8> = Vec::with_capacity(OUTPUT_CHUNK);
        let mut flush_at: Option<Instant> = None;
        let mut quiet_until = Instant::now() + wait;

        loop {
            tokio::select! {
                read = rx.recv() => {
                    let Some(bytes) = read else { break };
                    buf.extend_from_slice(&bytes);
                    while buf.len() >= OUTPUT_CHUNK {
                        let rest = buf.split_off(OUTPUT_CHUNK);
                        let chunk = std::mem::replace(&mut buf, rest);
                        self.write_output(event, &mut seq, &chunk).await?;
                        quiet_until = Instant::now() + wait;
                    }
                    if buf.is_empty() {
                        flush_at = None;
                    } else if flush_at.is_none() {
                        flush_at = Some(Instant::now() + FLUSH_IDLE);
                    }
                }
                _ = sleep_until(flush_at.unwrap_or(quiet_until)), if flush_at.is_some() => {
                    let chunk = std::mem::take(&mut buf);
                    self.write_output(event, &mut seq, &chunk).await?;
                    flush_at = None;
                    quiet_until = Instant::now() + wait;
                }
                // Buffered output counts as activity; it goes out before any heartbeat.
                _ = sleep_until(quiet_until), if flush_at.is_none() => {
                    self.write_output(event, &mut seq, &[]).await?;
                    quiet_until = Instant::now() + wait;
                }
            }
        }

        if !buf.is_empty() {
            self.write_output(event, &mut seq, &buf).await?;
        }
        Ok(())
    }

    async fn write_output(
        &self,
        event: &ExecEvent,
        seq: &mut u64,
        data: &[u8],
    ) -> Result<(), ExecutorError> {
        self.write_key(event, &format!("out/{:05x}", *seq), data)
            .await?;
        *seq += 1;
        Ok(())
    }

    async fn write_key(
        &self,
        event: &ExecEvent,
        suffix: &str,
        value: &[u8],
    ) -> Result<(), ExecutorError> {
        let key = node_key(&event.prefix, &event.session, &self.node, suffix);
        match self.kv.acquire(&key, value, &event.session).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(ExecutorError::Write {
                key,
                reason: "session lock not acquired".to_string(),
            }),
            Err(e) => Err(ExecutorError::Write {
                key,
                reason: e.to_string(),
            }),
        }
    }
}

fn pump<R>(mut reader: R, tx: mpsc::Sender<Vec<u8>>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; OUTPUT_CHUNK];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!(target: "rexec::executor", "output read failed: {e}");
                    break;
                }
            }
        }
    });
}

#[cfg(unix)]
fn shell_command(line: &str) -> Command {
    let mut cmd = Command::new("/bin/sh");
    cmd.arg("-c").arg(line);
    cmd
}

#[cfg(windows)]
fn shell_command(line: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(line);
    cmd
}

/// Script body written to a private temp file, removed on drop.
struct ScriptFile {
    path: PathBuf,
}

impl ScriptFile {
    async fn create(body: &[u8]) -> std::io::Result<Self> {
        let path = std::env::temp_dir().join(format!("rexec-{}", uuid::Uuid::new_v4()));
        tokio::fs::write(&path, body).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o750)).await?;
        }
        Ok(Self { path })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScriptFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            debug!(target: "rexec::executor", path = %self.path.display(), "failed to remove script: {e}");
        }
    }
}
