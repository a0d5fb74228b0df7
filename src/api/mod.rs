//! HTTP API client for the agent (KV store, sessions, user events, agent info).
//!
//! The remote exec protocol only depends on the contracts below; `Client`
//! implements them over HTTP, tests implement them in memory.

use async_trait::async_trait;

mod agent;
mod client;
mod error;
mod event;
mod kv;
mod session;
mod types;

pub use client::Client;
pub use error::{ApiError, Result};
pub use types::{
    AgentSelf, BlockingQuery, Consistency, KvPair, QueryMeta, ReceivedEvent, SessionBehavior,
    SessionEntry, UserEvent,
};

/// Linearizable key/value store with session locks and blocking listings.
#[async_trait]
pub trait Kv: Send + Sync {
    /// Read a single key. `Ok(None)` when the key does not exist.
    async fn get(&self, key: &str, consistency: Consistency) -> Result<Option<KvPair>>;

    /// Write `value` at `key` while taking the lock for `session`.
    /// Returns `false` when the lock is held by someone else or the session is gone.
    async fn acquire(&self, key: &str, value: &[u8], session: &str) -> Result<bool>;

    /// List keys under `prefix`, blocking until the index moves past `query.index`
    /// or the wait time elapses.
    async fn keys(
        &self,
        prefix: &str,
        separator: &str,
        query: BlockingQuery,
    ) -> Result<(Vec<String>, QueryMeta)>;

    /// Recursively delete every key under `prefix`.
    async fn delete_tree(&self, prefix: &str) -> Result<()>;
}

#[async_trait]
pub trait Sessions: Send + Sync {
    async fn create(&self, entry: &SessionEntry) -> Result<String>;
    /// Destroying an unknown session is not an error.
    async fn destroy(&self, id: &str) -> Result<()>;
    async fn renew(&self, id: &str) -> Result<()>;
}

#[async_trait]
pub trait Events: Send + Sync {
    /// Broadcast a user event, returning its id.
    async fn fire(&self, event: &UserEvent) -> Result<String>;
}

#[async_trait]
pub trait Agent: Send + Sync {
    async fn self_info(&self) -> Result<AgentSelf>;

    /// Names of nodes running a passing `consul` service in the client's datacenter.
    async fn server_nodes(&self) -> Result<Vec<String>>;
}

/// Everything the remote exec flow talks to.
pub trait Backend: Kv + Sessions + Events + Agent + 'static {}

impl<T> Backend for T where T: Kv + Sessions + Events + Agent + 'static {}
