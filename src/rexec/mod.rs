//! Remote execution over the KV store.
//!
//! Key layout under a per-invocation session:
//!
//! ```text
//! <prefix>/<session>/job                 encoded JobSpec, locked by the session
//! <prefix>/<session>/<node>/ack          node accepted the job
//! <prefix>/<session>/<node>/out/<seq>    output chunk; empty value is a heartbeat
//! <prefix>/<session>/<node>/exit         decimal exit code
//! ```
//!
//! The dispatching side (`RemoteExec`) uploads the job, fires an event and fans
//! results back in; the node side (`Executor`) runs the job and writes results.

use std::time::Duration;

mod config;
mod converge;
mod dispatch;
mod error;
mod executor;
mod run;
mod spec;
mod stream;

#[cfg(test)]
pub(crate) mod memory;

pub use config::ExecConfig;
pub use converge::{Report, Tally, converge, effective_wait};
pub use dispatch::{Dispatcher, Origin, Session};
pub use error::{RexecError, ValidationError};
pub use executor::{Executor, ExecutorError};
pub use run::RemoteExec;
pub use spec::{ExecEvent, JobBody, JobSpec};
pub use stream::{
    Ack, Exit, Heartbeat, KeyKind, Output, ResultReceivers, ResultSenders, ResultStream, SeenKeys,
    classify, parse_exit_code, result_channels,
};

/// Default KV prefix for job data.
pub const DEFAULT_PREFIX: &str = "_rexec";
/// Name of the user event announcing a job.
pub const EVENT_NAME: &str = "_rexec";

pub(crate) const JOB_FILE: &str = "job";
pub(crate) const ACK_SUFFIX: &str = "/ack";
pub(crate) const EXIT_SUFFIX: &str = "/exit";
pub(crate) const OUTPUT_DIVIDER: &str = "/out/";

/// Base quiet period when nothing else is configured.
pub const DEFAULT_WAIT: Duration = Duration::from_secs(1);
/// Grace period between uploading the job and firing the event.
pub const DEFAULT_REPLICATION_WAIT: Duration = Duration::from_millis(100);

pub(crate) const SESSION_TTL: &str = "15s";
pub(crate) const RENEW_INTERVAL: Duration = Duration::from_secs(5);
/// Capacity of each result channel between the stream task and the loop.
pub(crate) const RESULT_BUFFER: usize = 128;

/// `<prefix>/<session>/`, the subtree owned by one invocation.
pub fn session_dir(prefix: &str, session: &str) -> String {
    format!("{}/{}/", prefix.trim_matches('/'), session)
}

pub fn job_key(prefix: &str, session: &str) -> String {
    format!("{}{}", session_dir(prefix, session), JOB_FILE)
}

/// `<prefix>/<session>/<node>/<suffix>` where `suffix` has no leading slash.
pub fn node_key(prefix: &str, session: &str, node: &str, suffix: &str) -> String {
    format!("{}{}/{}", session_dir(prefix, session), node, suffix)
}
