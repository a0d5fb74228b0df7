//! Session lifecycle, job upload and event broadcast.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::{ApiError, Backend, SessionBehavior, SessionEntry, UserEvent};

use super::config::ExecConfig;
use super::error::RexecError;
use super::spec::ExecEvent;
use super::{EVENT_NAME, RENEW_INTERVAL, SESSION_TTL, job_key};

/// Where the invocation comes from, used to name the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub datacenter: String,
    pub node: String,
    /// Jobs target a datacenter other than the local agent's.
    pub foreign: bool,
}

/// A live coordination session. `destroy` only reaches the agent once.
pub struct Session<B: Backend> {
    id: String,
    backend: Arc<B>,
    destroyed: AtomicBool,
    renewal: CancellationToken,
}

impl<B: Backend> Session<B> {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Keep the TTL session alive until it is destroyed.
    pub fn spawn_renewal(&self) -> JoinHandle<()> {
        let backend = Arc::clone(&self.backend);
        let id = self.id.clone();
        let stop = self.renewal.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop.cancelled() => return,
                    _ = tokio::time::sleep(RENEW_INTERVAL) => {}
                }
                if let Err(e) = backend.renew(&id).await {
                    warn!(target: "rexec::session", session = %id, "session renew failed: {e}");
                    return;
                }
                debug!(target: "rexec::session", session = %id, "session renewed");
            }
        })
    }

    /// Invalidate the session. Once it is gone every acquire under it fails,
    /// so no late node can write results. Repeated calls are no-ops.
    pub async fn destroy(&self) -> Result<(), ApiError> {
        self.renewal.cancel();
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.backend.destroy(&self.id).await
    }
}

/// Establishes the session, publishes the job and announces it.
pub struct Dispatcher<B: Backend> {
    backend: Arc<B>,
    config: Arc<ExecConfig>,
}

impl<B: Backend> Dispatcher<B> {
    pub fn new(backend: Arc<B>, config: Arc<ExecConfig>) -> Self {
        Self { backend, config }
    }

    pub async fn create_session(&self, origin: &Origin) -> Result<Session<B>, RexecError> {
        let entry = if origin.foreign {
            // The local agent is not a member of the remote datacenter, so bind
            // the session to one of its servers and skip the serf health check.
            let servers = self
                .backend
                .server_nodes()
                .await
                .map_err(RexecError::connectivity("failed to find Consul server"))?;
            let Some(server) = servers.into_iter().next() else {
                return Err(RexecError::NoServers {
                    datacenter: self.config.datacenter.clone().unwrap_or_default(),
                });
            };
            SessionEntry {
                name: format!("Remote Exec via {}@{}", origin.node, origin.datacenter),
                node: Some(server),
                checks: Some(Vec::new()),
                behavior: SessionBehavior::Delete,
                ttl: Some(SESSION_TTL.to_string()),
            }
        } else {
            SessionEntry {
                name: "Remote Exec".to_string(),
                node: None,
                checks: None,
                behavior: SessionBehavior::Delete,
                ttl: Some(SESSION_TTL.to_string()),
            }
        };

        let id = self
            .backend
            .create(&entry)
            .await
            .map_err(RexecError::connectivity("failed to create session"))?;
        debug!(target: "rexec::dispatch", session = %id, name = %entry.name, "session created");

        Ok(Session {
            id,
            backend: Arc::clone(&self.backend),
            destroyed: AtomicBool::new(false),
            renewal: CancellationToken::new(),
        })
    }

    /// Write the encoded job under the session's lock.
    pub async fn upload_payload(&self, session: &str, payload: &[u8]) -> Result<(), RexecError> {
        let key = job_key(&self.config.prefix, session);
        let acquired = self
            .backend
            .acquire(&key, payload, session)
            .await
            .map_err(RexecError::connectivity("failed to upload job"))?;
        if !acquired {
            return Err(RexecError::UploadConflict { key });
        }
        Ok(())
    }

    pub async fn fire_event(&self, session: &str) -> Result<String, RexecError> {
        let payload = ExecEvent {
            prefix: self.config.prefix.clone(),
            session: session.to_string(),
        }
        .encode()?;
        let event = UserEvent {
            name: EVENT_NAME.to_string(),
            payload,
            node_filter: self.config.node.clone(),
            service_filter: self.config.service.clone(),
            tag_filter: self.config.tag.clone(),
        };
        self.backend
            .fire(&event)
            .await
            .map_err(RexecError::connectivity("failed to fire event"))
    }

    /// Upload, wait for replication, fire. Returns the event id.
    ///
    /// The replication wait lets nodes find the job with a stale read most of
    /// the time; nodes fall back to a consistent read when it is not there yet.
    pub async fn dispatch(
        &self,
        session: &str,
        payload: &[u8],
        shutdown: &CancellationToken,
    ) -> Result<String, RexecError> {
        self.upload_payload(session, payload).await?;
        debug!(target: "rexec::dispatch", session, "job uploaded");

        tokio::select! {
            _ = tokio::time::sleep(self.config.replication_wait) => {}
            _ = shutdown.cancelled() => return Err(RexecError::Interrupted),
        }

        let id = self.fire_event(session).await?;
        debug!(target: "rexec::dispatch", session, event = %id, "event fired");
        Ok(id)
    }
}
