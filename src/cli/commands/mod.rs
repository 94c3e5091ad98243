//! CLI command implementations

pub mod assets;
pub mod config;
pub mod server;

pub use assets::execute as assets;
pub use config::execute as config;
pub use server::execute as server;

use crate::daemon::Daemon;
use crate::error::PullshipResult;
use console::style;
use std::sync::Arc;

/// Run `daemon` until signalled, or for a single cycle with `once`
async fn drive(daemon: Daemon, once: bool) -> PullshipResult<()> {
    if !once {
        return Arc::new(daemon).run().await;
    }

    match daemon.run_once().await? {
        Some(deployment) => println!(
            "{} Deployed {} to {}",
            style("✓").green(),
            style(&deployment.tag).bold(),
            deployment.slot.display()
        ),
        None => println!("{} Nothing to deploy", style("·").dim()),
    }
    Ok(())
}
