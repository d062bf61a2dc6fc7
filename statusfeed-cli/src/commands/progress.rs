//! `statusfeed progress "<pipeline> :: <stage>[ :: <job>]" ...`

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args;

use statusfeed_core::ProjectName;
use statusfeed_daemon::request_progress;
use statusfeed_sync::ProgressEvent;

/// Report a stage or job's execution state to the running daemon.
#[derive(Args, Debug)]
pub struct ProgressArgs {
    /// Unit name, e.g. "build-linux :: compile :: unit-tests".
    pub name: String,

    #[arg(long, default_value = "Building")]
    pub activity: String,

    #[arg(long, default_value = "Unknown")]
    pub outcome: String,

    /// Build label shown next to the unit.
    #[arg(long)]
    pub label: String,

    /// Link to the execution's details page.
    #[arg(long = "url", default_value = "")]
    pub web_url: String,
}

impl ProgressArgs {
    pub fn run(self) -> Result<()> {
        let home = dirs::home_dir().context("could not determine home directory")?;
        let name = ProjectName::parse(&self.name)?;
        let event = ProgressEvent {
            name: name.clone(),
            activity: self.activity,
            outcome: self.outcome,
            label: self.label,
            web_url: self.web_url,
            at: Utc::now(),
        };

        let data = request_progress(&home, event).context("failed to send progress to daemon")?;
        match data.get("outcome").and_then(|v| v.as_str()) {
            Some("applied") => println!("recorded progress for '{name}'"),
            _ => println!("'{name}' is not in the feed; progress ignored"),
        }
        Ok(())
    }
}
