//! Poll daemon
//!
//! Each cycle runs `resolve → resolve_deploy_key → deploy → lifecycle →
//! record_ship`. Cycles are driven by a fixed interval; a cycle that is
//! still running when the next tick fires causes that tick to be skipped.
//! Termination signals cancel the shared token, which aborts in-flight
//! remote calls; local deploy steps run to completion before exit.

use crate::cache::FileCache;
use crate::config::{Config, ConfigManager, Provider};
use crate::deploy::Deployer;
use crate::error::{PullshipError, PullshipResult};
use crate::notify::{self, Field, NoticeSource, Notifier};
use crate::release::{CacheKey, GithubReleases, ReleaseHost, Resolver};
use crate::server::{CommandStarter, RestartSignal, ServerLifecycle, ServerState, Transition};
use crate::stamp;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What the daemon does after a deploy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Start or restart a managed server
    Server,
    /// Only deploy files
    Assets,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::Assets => "assets",
        }
    }
}

/// Result of a cycle that deployed something
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    pub tag: String,
    pub key: CacheKey,
    pub slot: PathBuf,
    pub downloaded: bool,
    pub transition: Option<Transition>,
}

/// Drives deploy cycles for one repository
pub struct Daemon {
    resolver: Resolver,
    deployer: Deployer,
    lifecycle: Option<ServerLifecycle>,
    server_command: Vec<String>,
    notifier: Arc<dyn Notifier>,
    interval: Duration,
    busy: Mutex<()>,
    shutdown: CancellationToken,
}

impl Daemon {
    /// Create a daemon in assets mode
    pub fn new(
        resolver: Resolver,
        deployer: Deployer,
        notifier: Arc<dyn Notifier>,
        interval: Duration,
    ) -> Self {
        Self {
            resolver,
            deployer,
            lifecycle: None,
            server_command: vec![],
            notifier,
            interval,
            busy: Mutex::new(()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Switch to server mode, supervising through `lifecycle`
    pub fn with_server(mut self, lifecycle: ServerLifecycle, command: Vec<String>) -> Self {
        self.lifecycle = Some(lifecycle);
        self.server_command = command;
        self
    }

    /// Wire a daemon from configuration
    pub async fn from_config(config: &Config, mode: Mode) -> PullshipResult<Self> {
        let repo = config.repository.clone();
        repo.validate()?;

        let timeout = Duration::from_secs(config.http.timeout_secs.max(1));
        let host: Arc<dyn ReleaseHost> = match repo.provider {
            Provider::Github => Arc::new(GithubReleases::new(&repo, timeout)),
        };

        let cache_dir = config
            .deploy
            .cache_dir
            .clone()
            .unwrap_or_else(ConfigManager::default_cache_dir);
        let cache = Arc::new(FileCache::open(cache_dir.clone()).await?);
        debug!("Using cache directory {}", cache_dir.display());

        let root = match &config.deploy.root {
            Some(root) => std::path::absolute(root)
                .map_err(|e| PullshipError::io("resolving deployment root", e))?,
            None => std::env::current_dir()
                .map_err(|e| PullshipError::io("reading working directory", e))?,
        };

        let resolver = Resolver::new(host, cache.clone(), repo);
        let source = NoticeSource {
            name: resolver.repository().slug(),
            link: resolver.repository_url(),
            icon_url: resolver.owner_icon_url(),
            host: stamp::hostname(),
        };
        let notifier = notify::from_config(&config.notify, source, timeout);
        let interval = Duration::from_secs(config.schedule.interval_secs.max(1));

        let daemon = Self::new(resolver, Deployer::new(root, cache), notifier, interval);

        match mode {
            Mode::Assets => Ok(daemon),
            Mode::Server => {
                let signal = RestartSignal::parse(&config.server.restart_signal)?;
                let starter = CommandStarter::new(
                    &config.server.command,
                    config.server.env.clone(),
                    signal,
                )?;
                let lifecycle = ServerLifecycle::new(Arc::new(starter));
                Ok(daemon.with_server(lifecycle, config.server.command.clone()))
            }
        }
    }

    pub fn mode(&self) -> Mode {
        if self.lifecycle.is_some() {
            Mode::Server
        } else {
            Mode::Assets
        }
    }

    pub fn deployer(&self) -> &Deployer {
        &self.deployer
    }

    /// Token cancelled when the daemon shuts down
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run one full cycle
    ///
    /// `NothingToDeploy` and `Cancelled` come back as errors; check
    /// `is_skip()` before treating them as failures.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> PullshipResult<Deployment> {
        let artifact = self.resolver.resolve(cancel).await?;
        let deploy_key = self.resolver.resolve_deploy_key(&artifact, cancel).await?;

        if deploy_key.downloaded {
            let message = format!(
                "New release <{}|{}> was downloaded",
                artifact.release_url, artifact.tag
            );
            self.notify(&message, &[], cancel).await;
        }

        let slot = self.deployer.deploy(&deploy_key.key).await?;

        let (transition, lifecycle_error) = match &self.lifecycle {
            Some(lifecycle) => match self.transition(lifecycle, cancel).await {
                Ok(transition) => (Some(transition), None),
                Err(e) => {
                    error!("Server lifecycle failed after deploying {}: {}", slot.display(), e);
                    (None, Some(e))
                }
            },
            None => (None, None),
        };

        // The link already moved, so the shipment is recorded either way
        if let Err(e) = self.resolver.record_ship(&artifact, cancel).await {
            if e.is_skip() {
                debug!("{}", e);
            } else {
                warn!("{}", e);
            }
        }

        if let Some(e) = lifecycle_error {
            return Err(e);
        }

        Ok(Deployment {
            tag: artifact.tag,
            key: deploy_key.key,
            slot,
            downloaded: deploy_key.downloaded,
            transition,
        })
    }

    async fn transition(
        &self,
        lifecycle: &ServerLifecycle,
        cancel: &CancellationToken,
    ) -> PullshipResult<Transition> {
        let message = match lifecycle.state().await {
            ServerState::NotRunning => "Server starting",
            ServerState::Running => "Server restarting",
        };
        self.notify(message, &[], cancel).await;

        lifecycle.on_deploy(self.deployer.root()).await
    }

    async fn notify(&self, message: &str, fields: &[Field], cancel: &CancellationToken) {
        if let Err(e) = self.notifier.notify(message, fields, cancel).await {
            warn!("Notification failed: {}", e);
        }
    }

    /// Run one guarded cycle and log its outcome
    ///
    /// Returns `None` when the previous cycle is still in progress.
    pub async fn tick(&self) -> Option<PullshipResult<Deployment>> {
        let Ok(_guard) = self.busy.try_lock() else {
            warn!("Previous cycle still running, skipping this tick");
            return None;
        };

        let cancel = self.shutdown.child_token();
        let result = self.run_cycle(&cancel).await;

        match &result {
            Ok(deployment) => info!(
                tag = %deployment.tag,
                slot = %deployment.slot.display(),
                "Deployed {}",
                deployment.key
            ),
            Err(e) if e.is_skip() => debug!("{}", e),
            Err(e) => error!("Cycle failed: {}", e),
        }

        Some(result)
    }

    async fn poll_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let daemon = self.clone();
                    in_flight.spawn(async move {
                        daemon.tick().await;
                    });
                }
            }
            while in_flight.try_join_next().is_some() {}
        }

        if !in_flight.is_empty() {
            info!("Waiting for the running cycle to finish");
        }
        while in_flight.join_next().await.is_some() {}
    }

    /// Fields of the start notification
    fn start_fields(&self) -> Vec<Field> {
        let command = if self.server_command.is_empty() {
            self.mode().as_str().to_string()
        } else {
            format!("{} ({})", self.mode().as_str(), self.server_command.join(" "))
        };
        let user = std::env::var("USER")
            .or_else(|_| std::env::var("LOGNAME"))
            .unwrap_or_else(|_| "unknown".to_string());

        vec![
            Field::new("Command", command, true),
            Field::new("User", user, true),
            Field::new("Artifact", self.resolver.repository().artifact.clone(), true),
            Field::new(
                "Working directory",
                self.deployer.root().display().to_string(),
                false,
            ),
        ]
    }

    /// Poll until a termination signal arrives
    pub async fn run(self: Arc<Self>) -> PullshipResult<()> {
        self.run_until(wait_for_signal()).await
    }

    /// Poll until `stop` resolves with the name of the stop reason
    pub async fn run_until<F>(self: Arc<Self>, stop: F) -> PullshipResult<()>
    where
        F: Future<Output = String>,
    {
        info!(
            mode = self.mode().as_str(),
            interval_secs = self.interval.as_secs(),
            "Watching {}",
            self.resolver.repository_url()
        );
        self.notify("Automatic shipping started by pullship", &self.start_fields(), &self.shutdown)
            .await;

        let poller = tokio::spawn(self.clone().poll_loop());

        let reason = stop.await;
        info!("Received {}, stopping", reason);
        self.shutdown.cancel();

        poller
            .await
            .map_err(|e| PullshipError::Internal(format!("poll loop failed: {}", e)))?;

        // The shutdown token is already cancelled
        self.notify(
            &format!("Stop receiving {} signal", reason),
            &[],
            &CancellationToken::new(),
        )
        .await;

        if let Some(lifecycle) = &self.lifecycle {
            lifecycle.shutdown().await?;
        }
        Ok(())
    }

    /// Run a single cycle; skip outcomes yield `None`
    pub async fn run_once(&self) -> PullshipResult<Option<Deployment>> {
        let shutdown = self.shutdown.clone();
        let watcher = tokio::spawn(async move {
            let reason = wait_for_signal().await;
            info!("Received {}, aborting cycle", reason);
            shutdown.cancel();
        });

        let result = self.run_cycle(&self.shutdown).await;
        watcher.abort();

        match result {
            Ok(deployment) => Ok(Some(deployment)),
            Err(e) if e.is_skip() => {
                info!("{}", e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

/// Wait for SIGINT, SIGTERM or SIGQUIT and return its name
#[cfg(unix)]
pub async fn wait_for_signal() -> String {
    use tokio::signal::unix::{signal, SignalKind};

    let listen = |kind: SignalKind, name: &'static str| async move {
        match signal(kind) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install {} handler: {}", name, e);
                std::future::pending::<()>().await;
            }
        }
        name
    };

    let name = tokio::select! {
        name = listen(SignalKind::interrupt(), "SIGINT") => name,
        name = listen(SignalKind::terminate(), "SIGTERM") => name,
        name = listen(SignalKind::quit(), "SIGQUIT") => name,
    };
    debug!("PID {} received {}", std::process::id(), name);
    name.to_string()
}

#[cfg(not(unix))]
pub async fn wait_for_signal() -> String {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to install Ctrl+C handler: {}", e);
        std::future::pending::<()>().await;
    }
    "Ctrl+C".to_string()
}
