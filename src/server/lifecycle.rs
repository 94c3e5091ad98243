//! Managed server lifecycle
//!
//! `NotRunning` → `Running` on the first deploy, then `Running` → `Running`
//! (restart in place) on every later deploy. All reads and writes of the
//! state happen under one lock, which also serializes overlapping deploys.

use crate::error::PullshipResult;
use crate::server::starter::{ServerHandle, ServerStarter};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// Whether the managed server has been started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    NotRunning,
    Running,
}

/// What a deploy did to the managed server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The server was spawned for the first time
    Started,
    /// The running server was asked to restart gracefully
    Restarted,
}

enum Inner {
    NotRunning,
    Running(ServerHandle),
}

/// State machine owning the managed server
pub struct ServerLifecycle {
    starter: Arc<dyn ServerStarter>,
    inner: Mutex<Inner>,
}

impl ServerLifecycle {
    pub fn new(starter: Arc<dyn ServerStarter>) -> Self {
        Self {
            starter,
            inner: Mutex::new(Inner::NotRunning),
        }
    }

    /// Current state
    pub async fn state(&self) -> ServerState {
        match *self.inner.lock().await {
            Inner::NotRunning => ServerState::NotRunning,
            Inner::Running(_) => ServerState::Running,
        }
    }

    /// Handle of the running server, if any
    pub async fn handle(&self) -> Option<ServerHandle> {
        match &*self.inner.lock().await {
            Inner::NotRunning => None,
            Inner::Running(handle) => Some(handle.clone()),
        }
    }

    /// React to a completed deploy under the deployment `root`
    ///
    /// Failures leave the state unchanged; the deploy itself is not undone.
    pub async fn on_deploy(&self, root: &Path) -> PullshipResult<Transition> {
        let mut inner = self.inner.lock().await;

        match &*inner {
            Inner::NotRunning => {
                info!("Start server via {} starter", self.starter.name());
                let handle = self.starter.start_managed(root).await?;
                *inner = Inner::Running(handle);
                Ok(Transition::Started)
            }
            Inner::Running(handle) => {
                self.starter.request_graceful_restart(handle).await?;
                Ok(Transition::Restarted)
            }
        }
    }

    /// Stop the server if it is running
    pub async fn shutdown(&self) -> PullshipResult<()> {
        let mut inner = self.inner.lock().await;
        if let Inner::Running(handle) = &*inner {
            info!(pid = handle.pid, "Stopping server {}", handle.program);
            self.starter.stop(handle).await?;
            *inner = Inner::NotRunning;
        }
        Ok(())
    }
}
