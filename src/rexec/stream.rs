//! Fan-in of node results: long-poll the session subtree and classify new keys.

use std::collections::HashSet;
use std::num::ParseIntError;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::api::{BlockingQuery, Consistency, Kv};

use super::{ACK_SUFFIX, EXIT_SUFFIX, JOB_FILE, OUTPUT_DIVIDER};

/// Server-side wait for each blocking listing.
const LIST_WAIT: Duration = Duration::from_secs(300);

/// What a key below the session directory stands for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyKind<'a> {
    /// The job itself.
    Ignore,
    Ack(&'a str),
    Exit(&'a str),
    /// Output chunk or heartbeat; which one depends on the value.
    Output(&'a str),
    Unknown,
}

/// Classify a key relative to the session directory.
pub fn classify(rel: &str) -> KeyKind<'_> {
    if rel == JOB_FILE {
        KeyKind::Ignore
    } else if let Some(node) = rel.strip_suffix(ACK_SUFFIX) {
        KeyKind::Ack(node)
    } else if let Some(node) = rel.strip_suffix(EXIT_SUFFIX) {
        KeyKind::Exit(node)
    } else if let Some(at) = rel.rfind(OUTPUT_DIVIDER) {
        KeyKind::Output(&rel[..at])
    } else {
        KeyKind::Unknown
    }
}

/// Exit values are plain decimal, no surrounding whitespace.
pub fn parse_exit_code(raw: &[u8]) -> Result<i32, ParseIntError> {
    String::from_utf8_lossy(raw).parse()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub node: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heartbeat {
    pub node: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    pub node: String,
    pub output: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exit {
    pub node: String,
    pub code: i32,
}

pub struct ResultSenders {
    pub ack: mpsc::Sender<Ack>,
    pub heartbeat: mpsc::Sender<Heartbeat>,
    pub output: mpsc::Sender<Output>,
    pub exit: mpsc::Sender<Exit>,
}

pub struct ResultReceivers {
    pub ack: mpsc::Receiver<Ack>,
    pub heartbeat: mpsc::Receiver<Heartbeat>,
    pub output: mpsc::Receiver<Output>,
    pub exit: mpsc::Receiver<Exit>,
}

pub fn result_channels(capacity: usize) -> (ResultSenders, ResultReceivers) {
    let (ack_tx, ack_rx) = mpsc::channel(capacity);
    let (hb_tx, hb_rx) = mpsc::channel(capacity);
    let (out_tx, out_rx) = mpsc::channel(capacity);
    let (exit_tx, exit_rx) = mpsc::channel(capacity);
    (
        ResultSenders {
            ack: ack_tx,
            heartbeat: hb_tx,
            output: out_tx,
            exit: exit_tx,
        },
        ResultReceivers {
            ack: ack_rx,
            heartbeat: hb_rx,
            output: out_rx,
            exit: exit_rx,
        },
    )
}

/// Full keys already handed to a channel.
#[derive(Debug, Default)]
pub struct SeenKeys(HashSet<String>);

impl SeenKeys {
    /// `true` the first time a key is seen.
    pub fn insert(&mut self, key: &str) -> bool {
        if self.0.contains(key) {
            return false;
        }
        self.0.insert(key.to_string())
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Background task state. Owns the seen set; counts live in the convergence loop.
pub struct ResultStream<K: Kv + ?Sized> {
    kv: Arc<K>,
    dir: String,
    index: u64,
    seen: SeenKeys,
    tx: ResultSenders,
}

enum Flow {
    Continue,
    Stop,
}

impl<K: Kv + ?Sized> ResultStream<K> {
    /// `dir` is the session directory including its trailing slash.
    pub fn new(kv: Arc<K>, dir: impl Into<String>, tx: ResultSenders) -> Self {
        Self {
            kv,
            dir: dir.into(),
            index: 0,
            seen: SeenKeys::default(),
            tx,
        }
    }

    /// Poll until `done` fires. The first failed listing is reported on `errors`
    /// and ends the task.
    pub async fn run(mut self, done: CancellationToken, errors: mpsc::Sender<String>) {
        loop {
            if done.is_cancelled() {
                return;
            }

            let query = BlockingQuery {
                index: self.index,
                wait: Some(LIST_WAIT),
            };
            let listed = tokio::select! {
                _ = done.cancelled() => return,
                r = self.kv.keys(&self.dir, "", query) => r,
            };
            let (keys, meta) = match listed {
                Ok(v) => v,
                Err(e) => {
                    error!(target: "rexec::stream", dir = %self.dir, "failed to read results: {e}");
                    let _ = errors.try_send(e.to_string());
                    return;
                }
            };

            if meta.last_index == self.index {
                continue;
            }
            // The index only moves forward unless the server state was reset.
            self.index = if meta.last_index < self.index {
                0
            } else {
                meta.last_index
            };

            let flow = tokio::select! {
                _ = done.cancelled() => return,
                r = self.ingest(&keys) => r,
            };
            match flow {
                Ok(Flow::Continue) => {}
                Ok(Flow::Stop) => return,
                Err(msg) => {
                    error!(target: "rexec::stream", dir = %self.dir, "{msg}");
                    let _ = errors.try_send(msg);
                    return;
                }
            }
        }
    }

    /// Classify each unseen key and forward it.
    async fn ingest(&mut self, keys: &[String]) -> Result<Flow, String> {
        for full in keys {
            if !self.seen.insert(full) {
                continue;
            }
            let rel = full.strip_prefix(self.dir.as_str()).unwrap_or(full.as_str());

            let sent = match classify(rel) {
                KeyKind::Ignore => true,
                KeyKind::Ack(node) => self
                    .tx
                    .ack
                    .send(Ack {
                        node: node.to_string(),
                    })
                    .await
                    .is_ok(),
                KeyKind::Exit(node) => {
                    let Some(value) = self.fetch(full).await? else {
                        continue;
                    };
                    match parse_exit_code(&value) {
                        Ok(code) => self
                            .tx
                            .exit
                            .send(Exit {
                                node: node.to_string(),
                                code,
                            })
                            .await
                            .is_ok(),
                        Err(e) => {
                            warn!(target: "rexec::stream", key = %full, "failed to decode exit code: {e}");
                            continue;
                        }
                    }
                }
                KeyKind::Output(node) => {
                    let Some(value) = self.fetch(full).await? else {
                        continue;
                    };
                    let node = node.to_string();
                    if value.is_empty() {
                        self.tx.heartbeat.send(Heartbeat { node }).await.is_ok()
                    } else {
                        self.tx
                            .output
                            .send(Output {
                                node,
                                output: value,
                            })
                            .await
                            .is_ok()
                    }
                }
                KeyKind::Unknown => {
                    warn!(target: "rexec::stream", key = %full, "unknown key, ignoring");
                    true
                }
            };

            // The loop dropped its receivers; nobody is listening any more.
            if !sent {
                return Ok(Flow::Stop);
            }
        }
        Ok(Flow::Continue)
    }

    async fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>, String> {
        match self.kv.get(key, Consistency::Default).await {
            Ok(Some(pair)) => Ok(Some(pair.value)),
            Ok(None) => {
                debug!(target: "rexec::stream", key, "key vanished before it was read");
                Ok(None)
            }
            Err(e) => Err(format!("failed to read key {key}: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rexec::memory::MemoryBackend;

    const DIR: &str = "_rexec/s1/";

    fn stream(backend: &Arc<MemoryBackend>) -> (ResultStream<MemoryBackend>, ResultReceivers) {
        let (tx, rx) = result_channels(16);
        (ResultStream::new(Arc::clone(backend), DIR, tx), rx)
    }

    fn drained(rx: &mut ResultReceivers) -> (usize, usize, usize, usize) {
        let mut counts = (0, 0, 0, 0);
        while rx.ack.try_recv().is_ok() {
            counts.0 += 1;
        }
        while rx.heartbeat.try_recv().is_ok() {
            counts.1 += 1;
        }
        while rx.output.try_recv().is_ok() {
            counts.2 += 1;
        }
        while rx.exit.try_recv().is_ok() {
            counts.3 += 1;
        }
        counts
    }

    #[test]
    fn classify_keys() {
        assert_eq!(classify("job"), KeyKind::Ignore);
        assert_eq!(classify("web-1/ack"), KeyKind::Ack("web-1"));
        assert_eq!(classify("web-1/exit"), KeyKind::Exit("web-1"));
        assert_eq!(classify("web-1/out/00000"), KeyKind::Output("web-1"));
        assert_eq!(classify("web-1/out/0000a"), KeyKind::Output("web-1"));
        assert_eq!(classify("web-1/status"), KeyKind::Unknown);
        assert_eq!(classify("web-1/job"), KeyKind::Unknown);
    }

    #[test]
    fn exit_code_parsing() {
        assert_eq!(parse_exit_code(127.to_string().as_bytes()).unwrap(), 127);
        assert_eq!(parse_exit_code(b"-1").unwrap(), -1);
        assert!(parse_exit_code(b"oops").is_err());
        assert!(parse_exit_code(b"").is_err());
        assert!(parse_exit_code(b" 0").is_err());
    }

    #[test]
    fn seen_keys_dedupe() {
        let mut seen = SeenKeys::default();
        assert!(seen.insert("_rexec/s1/a/ack"));
        assert!(!seen.insert("_rexec/s1/a/ack"));
        assert_eq!(seen.len(), 1);
    }

    #[tokio::test]
    async fn same_key_twice_emits_once() {
        let backend = Arc::new(MemoryBackend::new());
        let (mut s, mut rx) = stream(&backend);
        let keys = vec![format!("{DIR}node-a/ack")];
        s.ingest(&keys).await.unwrap();
        s.ingest(&keys).await.unwrap();
        assert_eq!(drained(&mut rx), (1, 0, 0, 0));
    }

    #[tokio::test]
    async fn empty_output_is_heartbeat() {
        let backend = Arc::new(MemoryBackend::new());
        backend.put(&format!("{DIR}node-a/out/00000"), b"");
        backend.put(&format!("{DIR}node-a/out/00001"), b"hello\n");
        let (mut s, mut rx) = stream(&backend);

        s.ingest(&[format!("{DIR}node-a/out/00000")]).await.unwrap();
        let hb = rx.heartbeat.try_recv().unwrap();
        assert_eq!(hb.node, "node-a");
        assert!(rx.output.try_recv().is_err());

        s.ingest(&[format!("{DIR}node-a/out/00001")]).await.unwrap();
        let out = rx.output.try_recv().unwrap();
        assert_eq!(out.output, b"hello\n");
        assert!(rx.heartbeat.try_recv().is_err());
    }

    #[tokio::test]
    async fn exit_codes_decode_or_skip() {
        let backend = Arc::new(MemoryBackend::new());
        backend.put(&format!("{DIR}node-a/exit"), b"127");
        backend.put(&format!("{DIR}node-b/exit"), b"not a number");
        backend.put(&format!("{DIR}node-c/ack"), b"");
        let (mut s, mut rx) = stream(&backend);

        s.ingest(&[
            format!("{DIR}job"),
            format!("{DIR}node-b/exit"),
            format!("{DIR}node-a/exit"),
            format!("{DIR}node-c/ack"),
            format!("{DIR}node-c/unknown"),
        ])
        .await
        .unwrap();

        let exit = rx.exit.try_recv().unwrap();
        assert_eq!(
            exit,
            Exit {
                node: "node-a".into(),
                code: 127
            }
        );
        assert!(rx.exit.try_recv().is_err());
        assert_eq!(rx.ack.try_recv().unwrap().node, "node-c");
    }

    #[tokio::test(start_paused = true)]
    async fn run_streams_until_done() {
        let backend = Arc::new(MemoryBackend::new());
        backend.put(&format!("{DIR}job"), b"{}");
        let (s, mut rx) = stream(&backend);
        let (err_tx, mut err_rx) = mpsc::channel(1);
        let done = CancellationToken::new();
        let task = tokio::spawn(s.run(done.clone(), err_tx));

        backend.put(&format!("{DIR}node-a/ack"), b"");
        assert_eq!(rx.ack.recv().await.unwrap().node, "node-a");

        backend.put(&format!("{DIR}node-a/exit"), b"0");
        assert_eq!(rx.exit.recv().await.unwrap().code, 0);

        done.cancel();
        task.await.unwrap();
        assert!(err_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_index_waits_and_lower_index_resets() {
        let backend = Arc::new(MemoryBackend::new());
        let ack_a = format!("{DIR}node-a/ack");
        let ack_b = format!("{DIR}node-b/ack");
        backend.script_listing(5, &[ack_a.clone()]);
        // Same index: the new key is not looked at yet.
        backend.script_listing(5, &[ack_a.clone(), ack_b.clone()]);
        // Index went backwards: start over from 0, still without repeats.
        backend.script_listing(3, &[ack_a.clone(), ack_b.clone()]);

        let (s, mut rx) = stream(&backend);
        let (err_tx, mut err_rx) = mpsc::channel(1);
        let done = CancellationToken::new();
        let task = tokio::spawn(s.run(done.clone(), err_tx));

        assert_eq!(rx.ack.recv().await.unwrap().node, "node-a");
        assert_eq!(rx.ack.recv().await.unwrap().node, "node-b");
        assert!(backend.list_indexes().len() >= 3);

        while backend.list_indexes().len() < 4 {
            tokio::task::yield_now().await;
        }
        assert_eq!(backend.list_indexes()[..4], [0, 5, 5, 0]);
        assert!(rx.ack.try_recv().is_err());

        done.cancel();
        task.await.unwrap();
        assert!(err_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn failed_value_read_ends_aggregation() {
        for suffix in ["exit", "out/00000"] {
            let backend = Arc::new(MemoryBackend::new());
            let key = format!("{DIR}node-a/{suffix}");
            backend.put(&key, b"0");
            backend.fail_get("No cluster leader");

            let (s, mut rx) = stream(&backend);
            let (err_tx, mut err_rx) = mpsc::channel(1);
            s.run(CancellationToken::new(), err_tx).await;

            let msg = err_rx.recv().await.unwrap();
            assert!(msg.contains(&key), "{msg}");
            assert!(msg.contains("No cluster leader"), "{msg}");
            assert_eq!(drained(&mut rx), (0, 0, 0, 0));
        }
    }

    #[tokio::test]
    async fn listing_failure_is_reported() {
        let backend = Arc::new(MemoryBackend::new());
        backend.fail_keys("agent unreachable");
        let (s, _rx) = stream(&backend);
        let (err_tx, mut err_rx) = mpsc::channel(1);
        s.run(CancellationToken::new(), err_tx).await;
        let msg = err_rx.recv().await.unwrap();
        assert!(msg.contains("agent unreachable"), "{msg}");
    }
}
