//! Adaptive wait over node results.
//!
//! The set of participating nodes is unknown, so completion is a heuristic: the
//! loop ends after a quiet period with no new results. While some node has
//! acknowledged without exiting, the quiet period is stretched.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::error::RexecError;
use super::stream::ResultReceivers;

/// Factor applied to the base wait while acks outnumber exits.
const OUTSTANDING_FACTOR: u32 = 4;

/// Sink for user-facing progress.
pub trait Report: Send {
    /// Line about a node, such as an ack or an exit code.
    fn info(&mut self, node: &str, msg: &str);
    /// Raw output captured on a node.
    fn output(&mut self, node: &str, output: &[u8]);
    /// Line not tied to a node.
    fn notice(&mut self, msg: &str);
}

/// Quiet period for the next iteration.
pub fn effective_wait(base: Duration, acks: usize, exits: usize) -> Duration {
    if acks > exits {
        base * OUTSTANDING_FACTOR
    } else {
        base
    }
}

/// Counts gathered by one convergence run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub acks: usize,
    pub exits: usize,
    /// Nodes that exited non-zero. Informational only.
    pub failed: usize,
}

/// Drain results until the adaptive timer fires.
///
/// Returns `Ok` only on the timer path. An aggregator error or `shutdown`
/// ends the loop with an error; the caller cleans up either way.
pub async fn converge(
    mut rx: ResultReceivers,
    mut errors: mpsc::Receiver<String>,
    shutdown: &CancellationToken,
    base_wait: Duration,
    verbose: bool,
    ui: &mut dyn Report,
) -> Result<Tally, RexecError> {
    let start = Instant::now();
    let mut tally = Tally::default();

    loop {
        let wait = effective_wait(base_wait, tally.acks, tally.exits);
        tokio::select! {
            Some(ack) = rx.ack.recv() => {
                tally.acks += 1;
                ui.info(&ack.node, "acknowledged");
            }
            Some(hb) = rx.heartbeat.recv() => {
                if verbose {
                    ui.info(&hb.node, "heartbeat received");
                }
            }
            Some(out) = rx.output.recv() => {
                ui.output(&out.node, &out.output);
            }
            Some(exit) = rx.exit.recv() => {
                tally.exits += 1;
                if exit.code != 0 {
                    tally.failed += 1;
                }
                ui.info(&exit.node, &format!("exited with code {}", exit.code));
            }
            _ = tokio::time::sleep(wait) => {
                ui.notice(&format!(
                    "{} / {} node(s) completed / acknowledged",
                    tally.exits, tally.acks
                ));
                if verbose && tally.failed > 0 {
                    ui.notice(&format!("{} node(s) exited with a non-zero code", tally.failed));
                }
                ui.notice(&format!("Total time: {:.2}s", start.elapsed().as_secs_f64()));
                debug!(target: "rexec::converge", acks = tally.acks, exits = tally.exits, "converged");
                return Ok(tally);
            }
            Some(msg) = errors.recv() => {
                return Err(RexecError::Aggregation(msg));
            }
            _ = shutdown.cancelled() => {
                return Err(RexecError::Interrupted);
            }
        }
    }
}
