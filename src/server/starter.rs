//! Managed server starters
//!
//! A starter owns the mechanics of launching a server and asking it to
//! restart gracefully. Listening-socket continuity across restarts is the
//! starter's (or the wrapped supervisor's) job, so the handoff mechanism can
//! be swapped per platform without touching the lifecycle.

use crate::deploy::CURRENT_LINK;
use crate::error::{PullshipError, PullshipResult};
use async_trait::async_trait;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, info, warn};

/// Environment variable carrying the active-version link path
pub const CURRENT_ENV: &str = "PULLSHIP_CURRENT";

/// Handle to a started server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHandle {
    /// Process id of the supervised process
    pub pid: u32,
    /// Program that was started, for logs
    pub program: String,
}

/// Graceful-restart-capable server starter
#[async_trait]
pub trait ServerStarter: Send + Sync {
    /// Start the server from the deployment `root` and return its handle
    async fn start_managed(&self, root: &Path) -> PullshipResult<ServerHandle>;

    /// Ask the running server to restart in place
    async fn request_graceful_restart(&self, handle: &ServerHandle) -> PullshipResult<()>;

    /// Ask the running server to terminate
    async fn stop(&self, handle: &ServerHandle) -> PullshipResult<()>;

    /// Human-readable starter name for logs
    fn name(&self) -> &'static str;
}

/// Signals accepted as restart requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartSignal {
    Hup,
    Usr1,
    Usr2,
    Term,
}

impl RestartSignal {
    /// Parse `HUP`, `SIGHUP`, `hup`, ...
    pub fn parse(name: &str) -> PullshipResult<Self> {
        let upper = name.trim().to_ascii_uppercase();
        match upper.strip_prefix("SIG").unwrap_or(&upper) {
            "HUP" => Ok(Self::Hup),
            "USR1" => Ok(Self::Usr1),
            "USR2" => Ok(Self::Usr2),
            "TERM" => Ok(Self::Term),
            _ => Err(PullshipError::ConfigInvalid {
                path: "server.restart_signal".into(),
                reason: format!("unsupported signal {:?}", name),
            }),
        }
    }

    fn as_signal(self) -> Signal {
        match self {
            Self::Hup => Signal::SIGHUP,
            Self::Usr1 => Signal::SIGUSR1,
            Self::Usr2 => Signal::SIGUSR2,
            Self::Term => Signal::SIGTERM,
        }
    }
}

/// Signal delivery requested from the task owning a child
struct SignalRequest {
    signal: Signal,
    reply: oneshot::Sender<nix::Result<()>>,
}

/// Own `child` until it exits, delivering signals on request
///
/// Signals are only sent while the child is unreaped, so its pid cannot
/// have been handed to another process.
async fn supervise(
    mut child: Child,
    pid: u32,
    program: String,
    mut requests: mpsc::Receiver<SignalRequest>,
) {
    #[allow(clippy::cast_possible_wrap)]
    let target = Pid::from_raw(pid as i32);
    let mut open = true;

    loop {
        tokio::select! {
            status = child.wait() => {
                match status {
                    Ok(status) if status.success() => info!(pid, "Server {} exited", program),
                    Ok(status) => warn!(pid, %status, "Server {} exited", program),
                    Err(e) => error!(pid, "Failed to wait for server {}: {}", program, e),
                }
                return;
            }
            request = requests.recv(), if open => match request {
                Some(request) => {
                    let _ = request.reply.send(kill(target, request.signal));
                }
                None => open = false,
            },
        }
    }
}

/// Starter running a configured command, restarting it with a signal
///
/// Point the command at a socket-handoff supervisor (e.g. `start_server`)
/// to get zero-downtime restarts; the supervisor catches the restart signal.
/// The command runs from the deployment root and should reach the artifact
/// through `current/`, so every restart picks up the newly linked slot.
pub struct CommandStarter {
    program: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    restart_signal: RestartSignal,
    children: Mutex<HashMap<u32, mpsc::Sender<SignalRequest>>>,
}

impl CommandStarter {
    /// Create a starter from `command` (program followed by arguments)
    pub fn new(
        command: &[String],
        env: HashMap<String, String>,
        restart_signal: RestartSignal,
    ) -> PullshipResult<Self> {
        let (program, args) = command
            .split_first()
            .ok_or(PullshipError::ConfigMissing("server.command"))?;

        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            env,
            restart_signal,
            children: Mutex::new(HashMap::new()),
        })
    }

    async fn signal(&self, handle: &ServerHandle, signal: Signal) -> PullshipResult<()> {
        let gone = || {
            PullshipError::ServerLifecycle(format!(
                "server {} (pid {}) is no longer running",
                handle.program, handle.pid
            ))
        };

        let sender = self
            .children
            .lock()
            .await
            .get(&handle.pid)
            .cloned()
            .ok_or_else(gone)?;

        let (reply, response) = oneshot::channel();
        if sender.send(SignalRequest { signal, reply }).await.is_err() {
            self.children.lock().await.remove(&handle.pid);
            return Err(gone());
        }

        // The supervising task drops the reply if the child exits first
        let delivered = response.await.map_err(|_| gone())?;
        delivered.map_err(|e| {
            PullshipError::ServerLifecycle(format!(
                "failed to send {} to {} (pid {}): {}",
                signal, handle.program, handle.pid, e
            ))
        })
    }
}

#[async_trait]
impl ServerStarter for CommandStarter {
    async fn start_managed(&self, root: &Path) -> PullshipResult<ServerHandle> {
        debug!("Executing: {} {:?} in {}", self.program, self.args, root.display());

        let child = Command::new(&self.program)
            .args(&self.args)
            .envs(&self.env)
            .env(CURRENT_ENV, root.join(CURRENT_LINK))
            .current_dir(root)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| {
                PullshipError::ServerLifecycle(format!("failed to spawn {}: {}", self.program, e))
            })?;

        let pid = child.id().ok_or_else(|| {
            PullshipError::ServerLifecycle(format!("{} exited immediately", self.program))
        })?;

        let (requests, receiver) = mpsc::channel(4);
        self.children.lock().await.insert(pid, requests);
        tokio::spawn(supervise(child, pid, self.program.clone(), receiver));

        info!(pid, "Started server {}", self.program);
        Ok(ServerHandle {
            pid,
            program: self.program.clone(),
        })
    }

    async fn request_graceful_restart(&self, handle: &ServerHandle) -> PullshipResult<()> {
        let signal = self.restart_signal.as_signal();
        self.signal(handle, signal).await?;

        info!(pid = handle.pid, "Sent {} for server restart", signal);
        Ok(())
    }

    async fn stop(&self, handle: &ServerHandle) -> PullshipResult<()> {
        self.signal(handle, Signal::SIGTERM).await
    }

    fn name(&self) -> &'static str {
        "command"
    }
}
