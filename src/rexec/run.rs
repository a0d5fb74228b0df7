//! One remote exec invocation from validation to cleanup.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::Backend;

use super::config::ExecConfig;
use super::converge::{Report, Tally, converge};
use super::dispatch::{Dispatcher, Origin, Session};
use super::error::RexecError;
use super::stream::{ResultStream, result_channels};
use super::{RESULT_BUFFER, session_dir};

pub struct RemoteExec<B: Backend> {
    backend: Arc<B>,
    config: Arc<ExecConfig>,
}

impl<B: Backend> RemoteExec<B> {
    pub fn new(backend: Arc<B>, config: ExecConfig) -> Self {
        Self {
            backend,
            config: Arc::new(config),
        }
    }

    /// Run the job and wait for nodes to converge.
    ///
    /// Once a session exists it is destroyed and its subtree deleted exactly
    /// once, whichever way this returns.
    pub async fn run(
        &self,
        ui: &mut dyn Report,
        shutdown: CancellationToken,
    ) -> Result<Tally, RexecError> {
        self.config.validate()?;
        let payload = self.config.job().encode()?;

        let origin = self.origin().await?;
        let dispatcher = Dispatcher::new(Arc::clone(&self.backend), Arc::clone(&self.config));
        let session = dispatcher.create_session(&origin).await?;
        let renewal = session.spawn_renewal();

        let result = async {
            if self.config.verbose {
                ui.notice(&format!("Created remote execution session {}", session.id()));
            }
            let event = dispatcher
                .dispatch(session.id(), &payload, &shutdown)
                .await?;
            info!(target: "rexec::run", session = session.id(), event = %event, "job dispatched");
            if self.config.verbose {
                ui.notice(&format!("Uploaded job and fired event {event}"));
            }
            self.wait_for_job(&session, ui, &shutdown).await
        }
        .await;

        self.cleanup(&session).await;
        renewal.abort();
        result
    }

    async fn origin(&self) -> Result<Origin, RexecError> {
        let me = self
            .backend
            .self_info()
            .await
            .map_err(RexecError::connectivity("failed to query agent"))?;
        let foreign = self
            .config
            .datacenter
            .as_deref()
            .is_some_and(|dc| !dc.is_empty() && dc != me.datacenter);
        Ok(Origin {
            datacenter: me.datacenter,
            node: me.node_name,
            foreign,
        })
    }

    async fn wait_for_job(
        &self,
        session: &Session<B>,
        ui: &mut dyn Report,
        shutdown: &CancellationToken,
    ) -> Result<Tally, RexecError> {
        let (tx, rx) = result_channels(RESULT_BUFFER);
        let (err_tx, err_rx) = mpsc::channel(1);
        let done = shutdown.child_token();

        let dir = session_dir(&self.config.prefix, session.id());
        let stream = ResultStream::new(Arc::clone(&self.backend), dir, tx);
        let task = tokio::spawn(stream.run(done.clone(), err_tx));

        let result = converge(
            rx,
            err_rx,
            shutdown,
            self.config.wait,
            self.config.verbose,
            ui,
        )
        .await;

        done.cancel();
        if let Err(e) = task.await {
            warn!(target: "rexec::run", "result stream task failed: {e}");
        }

        // Invalidate before the subtree goes so late acquires cannot recreate keys.
        if let Err(e) = session.destroy().await {
            warn!(target: "rexec::run", session = session.id(), "failed to destroy session: {e}");
        }
        result
    }

    async fn cleanup(&self, session: &Session<B>) {
        if let Err(e) = session.destroy().await {
            warn!(target: "rexec::run", session = session.id(), "failed to destroy session: {e}");
        }
        let dir = session_dir(&self.config.prefix, session.id());
        match self.backend.delete_tree(&dir).await {
            Ok(()) => debug!(target: "rexec::run", dir = %dir, "job data removed"),
            Err(e) => warn!(target: "rexec::run", dir = %dir, "failed to remove job data: {e}"),
        }
    }
}
