/*!
`handle.rs`

Implements the `handle` subcommand: the node side of remote exec, meant to
run as a watch handler for user events (`consul watch -type=event -name=_rexec`).

Input:
  A JSON array of events on stdin (or `--events PATH`), as delivered to watch
  handlers. Events not named `_rexec` are skipped.

Per event:
  - look up the job (stale read, then one consistent retry)
  - write `<node>/ack`, run the job, stream `<node>/out/<seq>`
  - write `<node>/exit`

Exit status:
  0  every event handled (or nothing to do)
  1  at least one event could not be handled
*/

use anyhow::{Context, Result};
use clap::Args;
use std::io::{self, Read};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::api::{Agent, ReceivedEvent};
use crate::cmd::shared::Connection;
use crate::rexec::{EVENT_NAME, Executor};

/* -------------------------------------------------------------------------- */
/* Argument Struct                                                            */
/* -------------------------------------------------------------------------- */

#[derive(Args, Debug)]
pub struct HandleArgs {
    /// Node name to report results under (defaults to the agent's node name)
    #[arg(long)]
    pub node: Option<String>,

    /// Read the event array from a file instead of stdin
    #[arg(long, value_name = "PATH")]
    pub events: Option<String>,
}

/* -------------------------------------------------------------------------- */
/* Public Entry Point                                                         */
/* -------------------------------------------------------------------------- */

pub fn execute_handle(args: HandleArgs, conn: &Connection) -> Result<i32> {
    let raw = match &args.events {
        Some(path) => {
            std::fs::read(path).with_context(|| format!("failed to read events file: {path}"))?
        }
        None => {
            let mut buf = Vec::new();
            io::stdin()
                .read_to_end(&mut buf)
                .context("failed to read events from stdin")?;
            buf
        }
    };

    let events = exec_events(parse_events(&raw)?);
    if events.is_empty() {
        debug!(target: "rexec::handle", "no remote exec events");
        return Ok(0);
    }

    // Jobs always live in the local datacenter's KV store.
    let client = Arc::new(conn.client(None)?);
    let rt = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
    rt.block_on(async {
        let node = match args.node {
            Some(node) if !node.is_empty() => node,
            _ => {
                client
                    .self_info()
                    .await
                    .context("failed to query agent for node name")?
                    .node_name
            }
        };

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!(target: "rexec::handle", "interrupt received, stopping job");
                trigger.cancel();
            }
        });

        let executor = Executor::new(Arc::clone(&client), node);
        let mut failures = 0usize;
        for event in &events {
            let payload = match event.payload_bytes() {
                Ok(p) => p,
                Err(e) => {
                    error!(target: "rexec::handle", event = %event.id, "failed to decode event payload: {e}");
                    failures += 1;
                    continue;
                }
            };
            match executor.handle(&payload, &cancel).await {
                Ok(Some(code)) => {
                    info!(target: "rexec::handle", event = %event.id, code, "remote exec complete")
                }
                Ok(None) => {}
                Err(e) => {
                    error!(target: "rexec::handle", event = %event.id, "remote exec failed: {e}");
                    failures += 1;
                }
            }
            if cancel.is_cancelled() {
                break;
            }
        }

        Ok::<_, anyhow::Error>(if failures > 0 { 1 } else { 0 })
    })
}

/* -------------------------------------------------------------------------- */
/* Event Parsing                                                              */
/* -------------------------------------------------------------------------- */

/// Watch handlers get a JSON array; an empty input means no events.
fn parse_events(raw: &[u8]) -> Result<Vec<ReceivedEvent>> {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    serde_json::from_slice(raw).context("failed to parse events (expected a JSON array)")
}

fn exec_events(events: Vec<ReceivedEvent>) -> Vec<ReceivedEvent> {
    events
        .into_iter()
        .filter(|e| e.name == EVENT_NAME)
        .collect()
}

/* -------------------------------------------------------------------------- */
/* Tests                                                                      */
/* -------------------------------------------------------------------------- */
