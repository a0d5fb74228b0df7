//! Request and response shapes shared by the API client and its callers.

use std::time::Duration;

use base64::prelude::*;
use serde::{Deserialize, Serialize};

/// A single key/value entry as returned by `GET /v1/kv/<key>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvPair {
    pub key: String,
    pub value: Vec<u8>,
    pub session: Option<String>,
    pub modify_index: u64,
}

/// Wire form of a KV entry; `Value` is base64 and may be `null`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct RawKvPair {
    pub key: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub session: Option<String>,
    #[serde(default)]
    pub modify_index: u64,
}

impl TryFrom<RawKvPair> for KvPair {
    type Error = base64::DecodeError;

    fn try_from(raw: RawKvPair) -> Result<Self, Self::Error> {
        let value = match raw.value {
            Some(v) if !v.is_empty() => BASE64_STANDARD.decode(v)?,
            _ => Vec::new(),
        };
        Ok(KvPair {
            key: raw.key,
            value,
            session: raw.session.filter(|s| !s.is_empty()),
            modify_index: raw.modify_index,
        })
    }
}

/// Read consistency mode for KV reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Consistency {
    #[default]
    Default,
    /// Any server may answer, possibly with slightly old data.
    Stale,
    /// Leader verifies it is still leader before answering.
    Consistent,
}

/// Cursor for a blocking (long-poll) query.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockingQuery {
    /// Zero means "answer immediately with the current state".
    pub index: u64,
    pub wait: Option<Duration>,
}

/// Metadata returned alongside a blocking query result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryMeta {
    pub last_index: u64,
}

/// What happens to locks held by a session when it is invalidated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionBehavior {
    Release,
    Delete,
}

/// Body of `PUT /v1/session/create`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SessionEntry {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    /// `Some(vec![])` explicitly disables the default serf health check.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checks: Option<Vec<String>>,
    pub behavior: SessionBehavior,
    #[serde(rename = "TTL", skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct IdResponse {
    #[serde(rename = "ID")]
    pub id: String,
}

/// A user event to broadcast through `PUT /v1/event/fire/<name>`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserEvent {
    pub name: String,
    pub payload: Vec<u8>,
    pub node_filter: String,
    pub service_filter: String,
    pub tag_filter: String,
}

/// A user event as delivered to watch handlers.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReceivedEvent {
    #[serde(rename = "ID", default)]
    pub id: String,
    pub name: String,
    /// Base64 payload, `null` when the event carried none.
    #[serde(default)]
    pub payload: Option<String>,
    #[serde(rename = "LTime", default)]
    pub ltime: u64,
}

impl ReceivedEvent {
    pub fn payload_bytes(&self) -> Result<Vec<u8>, base64::DecodeError> {
        match self.payload.as_deref() {
            Some(p) if !p.is_empty() => BASE64_STANDARD.decode(p),
            _ => Ok(Vec::new()),
        }
    }
}

/// The subset of `GET /v1/agent/self` the remote exec flow needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSelf {
    pub datacenter: String,
    pub node_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct RawAgentSelf {
    pub config: RawAgentConfig,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct RawAgentConfig {
    pub datacenter: String,
    pub node_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct RawServiceEntry {
    pub node: RawNode,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct RawNode {
    pub node: String,
}
