/*!
`exec.rs`

Implements the `exec` subcommand: run a command on every node matching the
filters and stream their results back.

Flow:
  - Build the job from the command words (`--shell=false` sends an argv
    instead of a shell line; a single `-` reads a script from stdin)
  - Dispatch: session, job upload, replication wait, `_rexec` event
  - Print acks / output / exit codes per node as they arrive
  - Stop after a quiet period (stretched while acks outnumber exits)
  - Remove the session and its job data, always

Exit status:
  0  the quiet period elapsed (individual nodes may still have failed)
  1  validation, connection or aggregation failure, or an interrupt

Interrupts:
  First Ctrl-C stops waiting and cleans up; a second one exits at once.
*/

use anyhow::{Context, Result};
use clap::{ArgAction, Args};
use std::io::{self, Read};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cmd::format::{Role, StyleOptions, TargetedUi, color};
use crate::cmd::shared::{Connection, parse_duration};
use crate::rexec::{DEFAULT_PREFIX, ExecConfig, RemoteExec};

/* -------------------------------------------------------------------------- */
/* Argument Struct                                                            */
/* -------------------------------------------------------------------------- */

#[derive(Args, Debug)]
pub struct ExecArgs {
    /// Datacenter to run in (defaults to the agent's)
    #[arg(long, value_name = "DC")]
    pub datacenter: Option<String>,

    /// Regular expression to filter on node names
    #[arg(long, default_value = "", value_name = "REGEXP")]
    pub node: String,

    /// Regular expression to filter on service instances
    #[arg(long, default_value = "", value_name = "REGEXP")]
    pub service: String,

    /// Regular expression to filter on service tags (requires --service)
    #[arg(long, default_value = "", value_name = "REGEXP")]
    pub tag: String,

    /// KV prefix used to store job data
    #[arg(long, default_value = DEFAULT_PREFIX)]
    pub prefix: String,

    /// Run the command through the node's shell; false sends an argv
    #[arg(long, default_value_t = true, action = ArgAction::Set, value_name = "BOOL")]
    pub shell: bool,

    /// Quiet period before results are considered complete
    #[arg(long, default_value = "1s", value_parser = parse_duration)]
    pub wait: Duration,

    /// Wait between uploading the job and firing the event
    #[arg(long = "wait-repl", default_value = "100ms", value_parser = parse_duration)]
    pub wait_repl: Duration,

    /// Report session, event and heartbeat details
    #[arg(long)]
    pub verbose: bool,

    /// Command to run, or `-` to read a script from stdin
    #[arg(
        required = true,
        trailing_var_arg = true,
        allow_hyphen_values = true,
        value_name = "COMMAND"
    )]
    pub command: Vec<String>,
}

/* -------------------------------------------------------------------------- */
/* Public Entry Point                                                         */
/* -------------------------------------------------------------------------- */

pub fn execute_exec(args: ExecArgs, conn: &Connection) -> Result<i32> {
    let config = build_config(args, conn, &mut io::stdin())?;
    let client = conn.client(config.datacenter.as_deref())?;
    info!(target: "rexec::cmd", addr = %client.address(), "dispatching remote exec");

    let rt = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
    rt.block_on(async {
        let shutdown = CancellationToken::new();
        watch_interrupts(shutdown.clone());

        let style = StyleOptions::detect();
        let mut ui = TargetedUi::new(io::stdout(), style.clone());
        let exec = RemoteExec::new(Arc::new(client), config);

        match exec.run(&mut ui, shutdown).await {
            Ok(_) => Ok(0),
            Err(e) => {
                eprintln!("{}", color(Role::Error, format!("Error: {e}"), &style));
                Ok(1)
            }
        }
    })
}

/* -------------------------------------------------------------------------- */
/* Config Building                                                            */
/* -------------------------------------------------------------------------- */

fn build_config(args: ExecArgs, conn: &Connection, stdin: &mut impl Read) -> Result<ExecConfig> {
    let mut config = ExecConfig {
        prefix: args.prefix,
        shell: args.shell,
        datacenter: args
            .datacenter
            .filter(|dc| !dc.is_empty())
            .or_else(|| conn.datacenter.clone()),
        node: args.node,
        service: args.service,
        tag: args.tag,
        wait: args.wait,
        replication_wait: args.wait_repl,
        verbose: args.verbose,
        ..ExecConfig::default()
    };

    if args.command.len() == 1 && args.command[0] == "-" {
        stdin
            .read_to_end(&mut config.script)
            .context("failed to read script from stdin")?;
    } else if config.shell {
        config.command = args.command.join(" ");
    } else {
        config.args = args.command;
    }
    Ok(config)
}

/* -------------------------------------------------------------------------- */
/* Interrupts                                                                 */
/* -------------------------------------------------------------------------- */

fn watch_interrupts(shutdown: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!(target: "rexec::cmd", "interrupt received, cleaning up");
        shutdown.cancel();

        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Second interrupt, exiting without cleanup");
            std::process::exit(1);
        }
    });
}

/* -------------------------------------------------------------------------- */
/* Tests                                                                      */
/* -------------------------------------------------------------------------- */
