//! Server command - deploy releases and supervise a server

use crate::cli::args::ServerArgs;
use crate::config::Config;
use crate::daemon::{Daemon, Mode};
use crate::error::PullshipResult;
use tracing::debug;

/// Execute the server command
pub async fn execute(args: ServerArgs, mut config: Config) -> PullshipResult<()> {
    args.apply(&mut config)?;
    debug!("Server command: {:?}", config.server.command);

    let daemon = Daemon::from_config(&config, Mode::Server).await?;
    super::drive(daemon, args.watch.once).await
}
