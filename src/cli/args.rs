//! CLI argument definitions using clap derive

use crate::config::{Config, Provider};
use crate::error::PullshipResult;
use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;

/// Pullship - pull-based continuous deployment
///
/// Polls a release host for new artifacts, extracts them into versioned
/// slots and switches a `current` link, optionally restarting a server.
#[derive(Parser, Debug)]
#[command(name = "pullship")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "PULLSHIP_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Deploy releases and supervise a server started from the deployment root
    Server(ServerArgs),

    /// Deploy releases without managing a server
    Assets(AssetsArgs),

    /// Show or initialize configuration
    Config(ConfigArgs),
}

/// Flags shared by the deploying commands
#[derive(Args, Debug, Default)]
pub struct WatchArgs {
    /// Repository to watch, as owner/name
    #[arg(short, long)]
    pub repository: Option<String>,

    /// Release asset name to deploy
    #[arg(short, long)]
    pub artifact: Option<String>,

    /// Release host provider
    #[arg(long)]
    pub provider: Option<Provider>,

    /// Seconds between poll cycles
    #[arg(short, long)]
    pub interval: Option<u64>,

    /// Consider pre-releases
    #[arg(long)]
    pub prerelease: bool,

    /// Do not upload a shipping record after deploying
    #[arg(long)]
    pub no_record_shipping: bool,

    /// Deployment root holding `releases/` and `current`
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Run a single cycle and exit
    #[arg(long)]
    pub once: bool,
}

impl WatchArgs {
    /// Overlay the flags onto file configuration
    pub fn apply(&self, config: &mut Config) -> PullshipResult<()> {
        if let Some(slug) = &self.repository {
            config.repository.set_slug(slug)?;
        }
        if let Some(artifact) = &self.artifact {
            config.repository.artifact = artifact.clone();
        }
        if let Some(provider) = self.provider {
            config.repository.provider = provider;
        }
        if let Some(interval) = self.interval {
            config.schedule.interval_secs = interval;
        }
        if self.prerelease {
            config.repository.prerelease = true;
        }
        if self.no_record_shipping {
            config.repository.disable_record_shipping = true;
        }
        if let Some(root) = &self.root {
            config.deploy.root = Some(root.clone());
        }
        Ok(())
    }
}

/// Arguments for the server command
#[derive(Parser, Debug)]
pub struct ServerArgs {
    #[command(flatten)]
    pub watch: WatchArgs,

    /// Signal asking the server to restart (HUP, USR1, USR2, TERM)
    #[arg(long)]
    pub restart_signal: Option<String>,

    /// Additional server environment variables (KEY=VALUE)
    #[arg(short, long, value_parser = parse_env_var)]
    pub env: Vec<(String, String)>,

    /// Server command and arguments, run from the deployment root
    ///
    /// Reference the artifact through `current/`, e.g. `-- start_server -- current/app`.
    #[arg(last = true)]
    pub command: Vec<String>,
}

impl ServerArgs {
    /// Overlay the flags onto file configuration
    pub fn apply(&self, config: &mut Config) -> PullshipResult<()> {
        self.watch.apply(config)?;
        if !self.command.is_empty() {
            config.server.command = self.command.clone();
        }
        if let Some(signal) = &self.restart_signal {
            config.server.restart_signal = signal.clone();
        }
        config.server.env.extend(self.env.iter().cloned());
        Ok(())
    }
}

/// Arguments for the assets command
#[derive(Parser, Debug)]
pub struct AssetsArgs {
    #[command(flatten)]
    pub watch: WatchArgs,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show,

    /// Show configuration file path
    Path,

    /// Write a default configuration file
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },
}

/// Parse environment variable in KEY=VALUE format
fn parse_env_var(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE format: no '=' found in '{s}'"))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}
