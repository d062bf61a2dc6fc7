//! `statusfeed feed`: read the daemon's live feed.

use anyhow::{Context, Result};
use clap::Args;

use statusfeed_daemon::{request_feed, DaemonError};

use super::render::{print_entries, PrincipalArgs};

#[derive(Args, Debug)]
pub struct FeedArgs {
    #[command(flatten)]
    pub principal: PrincipalArgs,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl FeedArgs {
    pub fn run(self) -> Result<()> {
        let home = dirs::home_dir().context("could not determine home directory")?;
        match request_feed(&home, self.principal.principal()) {
            Ok(entries) => print_entries(&entries, self.json),
            Err(err @ DaemonError::DaemonNotRunning { .. }) => {
                Err(err).context("start it with `statusfeed daemon start`, or use `statusfeed snapshot`")
            }
            Err(err) => Err(err).context("failed to read feed from daemon"),
        }
    }
}
