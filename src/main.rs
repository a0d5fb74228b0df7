use anyhow::Result;
use clap::{Parser, Subcommand};

mod api;
mod cmd;
mod rexec;
mod utils;

use cmd::shared::Connection;
use cmd::{ExecArgs, HandleArgs};
use utils::LogFormat;

/// rexec - run commands across a Consul cluster
///
/// Command layout:
///   rexec exec [--node RE] [--service RE] [--tag RE] [--wait 1s] <command...>
///   rexec exec -                      (script read from stdin)
///   rexec handle [--node NAME]        (watch handler run on each node)
///
/// Global flags / env:
///   -v / -vv / -vvv   Increase log verbosity (info, debug, trace)
///   -q / --quiet      Errors only
///   --log-format      text | json
///   --http-addr       Agent address (or CONSUL_HTTP_ADDR)
///   --token           ACL token (or CONSUL_HTTP_TOKEN)
///   --config          YAML or JSON file with http_addr / token / datacenter
///   RUST_LOG          Overrides the level derived from -v / -q
///
/// Examples:
///   rexec exec uptime
///   rexec exec --node 'web-.*' --wait 2s -- ls -l /var/log
///   rexec exec --shell=false echo '$HOME'
///   consul watch -type=event -name=_rexec rexec handle
#[derive(Parser, Debug)]
#[command(
    name = "rexec",
    version,
    author,
    about = "Remote execution over Consul sessions, KV and user events",
    propagate_version = true,
    disable_help_subcommand = true
)]
pub struct Cli {
    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', action = clap::ArgAction::Count, global = true)]
    log_verbosity: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    /// Consul agent HTTP address
    #[arg(long, global = true, value_name = "ADDR")]
    http_addr: Option<String>,

    /// ACL token
    #[arg(long, global = true, value_name = "TOKEN")]
    token: Option<String>,

    /// Config file (YAML or JSON)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a command on every matching node and stream the results
    Exec(ExecArgs),

    /// Handle `_rexec` events on this node (consul watch handler)
    Handle(HandleArgs),
}

fn main() {
    let cli = Cli::parse();

    let level = utils::derive_level(cli.log_verbosity, cli.quiet);
    utils::init_logging(level, cli.log_format);

    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let conn = Connection::resolve(cli.http_addr, cli.token, cli.config.as_deref())?;
    match cli.command {
        Commands::Exec(args) => cmd::execute_exec(args, &conn),
        Commands::Handle(args) => cmd::execute_handle(args, &conn),
    }
}
