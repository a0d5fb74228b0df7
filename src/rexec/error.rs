//! Error types for the dispatching side of remote exec.

use thiserror::Error;

use crate::api::ApiError;

/// Pre-flight configuration problems; nothing has touched the network yet.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("failed to compile node filter regexp: {0}")]
    NodeFilter(#[source] regex::Error),
    #[error("failed to compile service filter regexp: {0}")]
    ServiceFilter(#[source] regex::Error),
    #[error("failed to compile tag filter regexp: {0}")]
    TagFilter(#[source] regex::Error),
    #[error("cannot provide tag filter without service filter")]
    TagWithoutService,
    #[error("cannot configure -shell=false when reading from stdin")]
    ShellRequiredForStdin,
    #[error("must specify a command to execute")]
    EmptyCommand,
}

#[derive(Debug, Error)]
pub enum RexecError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("failed to encode job: {0}")]
    Encode(#[from] serde_json::Error),

    /// The agent could not be reached, or refused, at `step`.
    #[error("{step}: {source}")]
    Connectivity {
        step: &'static str,
        source: ApiError,
    },

    #[error("no passing consul server found in datacenter {datacenter}")]
    NoServers { datacenter: String },

    /// The job key acquire was refused under a fresh session.
    #[error("failed to acquire key {key}")]
    UploadConflict { key: String },

    #[error("failed to read results: {0}")]
    Aggregation(String),

    #[error("interrupted")]
    Interrupted,
}

impl RexecError {
    pub(crate) fn connectivity(step: &'static str) -> impl FnOnce(ApiError) -> Self {
        move |source| RexecError::Connectivity { step, source }
    }
}
