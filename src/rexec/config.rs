//! Invocation settings for `exec` and their pre-flight validation.

use std::time::Duration;

use regex::Regex;

use super::error::ValidationError;
use super::spec::JobSpec;
use super::{DEFAULT_PREFIX, DEFAULT_REPLICATION_WAIT, DEFAULT_WAIT};

/// Settings for one remote exec invocation.
#[derive(Debug, Clone)]
pub struct ExecConfig {
    pub prefix: String,
    /// Run through the node's shell (`Command`) rather than as an argv (`Args`).
    pub shell: bool,
    /// Target datacenter when it differs from the local agent's.
    pub datacenter: Option<String>,
    pub node: String,
    pub service: String,
    pub tag: String,
    /// Quiet period: how long to wait for new results before converging.
    pub wait: Duration,
    /// Grace period between uploading the job and firing the event.
    pub replication_wait: Duration,
    pub command: String,
    pub args: Vec<String>,
    /// Script read from stdin; wins over `command` and `args`.
    pub script: Vec<u8>,
    pub verbose: bool,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            shell: true,
            datacenter: None,
            node: String::new(),
            service: String::new(),
            tag: String::new(),
            wait: DEFAULT_WAIT,
            replication_wait: DEFAULT_REPLICATION_WAIT,
            command: String::new(),
            args: Vec::new(),
            script: Vec::new(),
            verbose: false,
        }
    }
}

impl ExecConfig {
    /// Check filters and the job body. Empty filters are valid.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.node.is_empty() {
            Regex::new(&self.node).map_err(ValidationError::NodeFilter)?;
        }
        if !self.service.is_empty() {
            Regex::new(&self.service).map_err(ValidationError::ServiceFilter)?;
        }
        if !self.tag.is_empty() {
            Regex::new(&self.tag).map_err(ValidationError::TagFilter)?;
        }
        if !self.tag.is_empty() && self.service.is_empty() {
            return Err(ValidationError::TagWithoutService);
        }
        if !self.script.is_empty() && !self.shell {
            return Err(ValidationError::ShellRequiredForStdin);
        }
        if self.script.is_empty() && self.args.is_empty() && self.command.trim().is_empty() {
            return Err(ValidationError::EmptyCommand);
        }
        Ok(())
    }

    pub fn job(&self) -> JobSpec {
        if !self.script.is_empty() {
            JobSpec::script(self.script.clone(), self.wait)
        } else if !self.shell && !self.args.is_empty() {
            JobSpec::argv(self.args.clone(), self.wait)
        } else {
            JobSpec::command(self.command.clone(), self.wait)
        }
    }
}
