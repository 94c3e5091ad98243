//! Pullship - pull-based continuous deployment
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use pullship::cli::{commands, Cli, Commands};
use pullship::config::ConfigManager;
use pullship::error::PullshipResult;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> PullshipResult<()> {
    let cli = Cli::parse();

    let manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };

    // Config commands load (or skip) the file themselves
    if let Commands::Config(args) = cli.command {
        init_logging(cli.verbose, "text");
        return commands::config(args, &manager).await;
    }

    let config = manager.load().await?;
    init_logging(cli.verbose, &config.general.log_format);
    debug!("Loaded configuration from {}", manager.path().display());

    match cli.command {
        Commands::Config(_) => unreachable!("Config handled above"),
        Commands::Server(args) => commands::server(args, config).await,
        Commands::Assets(args) => commands::assets(args, config).await,
    }
}

/// Initialize logging: 0 = info, 1 = debug, 2+ = trace; RUST_LOG wins when set
fn init_logging(verbose: u8, format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| match verbose {
        0 => EnvFilter::new("pullship=info"),
        1 => EnvFilter::new("pullship=debug"),
        _ => EnvFilter::new("pullship=trace"),
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format.eq_ignore_ascii_case("json") {
        builder.json().init();
    } else {
        builder.init();
    }
}
