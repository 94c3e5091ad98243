//! Config command - show or initialize configuration

use crate::cli::args::{ConfigAction, ConfigArgs};
use crate::config::{Config, ConfigManager};
use crate::error::PullshipResult;
use console::style;

/// Execute the config command
pub async fn execute(args: ConfigArgs, manager: &ConfigManager) -> PullshipResult<()> {
    match args.action {
        None | Some(ConfigAction::Show) => show_config(&manager.load().await?),
        Some(ConfigAction::Path) => {
            println!("{}", manager.path().display());
            Ok(())
        }
        Some(ConfigAction::Init { force }) => init_config(manager, force).await,
    }
}

fn show_config(config: &Config) -> PullshipResult<()> {
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

async fn init_config(manager: &ConfigManager, force: bool) -> PullshipResult<()> {
    let path = manager.path();

    if path.exists() && !force {
        eprintln!(
            "{} Config already exists at {}",
            style("!").yellow(),
            path.display()
        );
        eprintln!("  Use --force to overwrite");
        return Ok(());
    }

    manager.save(&Config::default()).await?;
    println!(
        "{} Configuration initialized at {}",
        style("✓").green(),
        path.display()
    );
    Ok(())
}
