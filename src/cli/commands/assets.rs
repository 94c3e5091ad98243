//! Assets command - deploy releases only

use crate::cli::args::AssetsArgs;
use crate::config::Config;
use crate::daemon::{Daemon, Mode};
use crate::error::PullshipResult;

/// Execute the assets command
pub async fn execute(args: AssetsArgs, mut config: Config) -> PullshipResult<()> {
    args.watch.apply(&mut config)?;

    let daemon = Daemon::from_config(&config, Mode::Assets).await?;
    super::drive(daemon, args.watch.once).await
}
