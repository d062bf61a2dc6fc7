//! statusfeed: pipeline status feed CLI.
//!
//! # Usage
//!
//! ```text
//! statusfeed snapshot [--pipeline <name>] [--config <path>] [--history <path>] [--user <u> --role <r>...] [--json]
//! statusfeed feed [--user <u> --role <r>...] [--json]
//! statusfeed progress "<pipeline> :: <stage>[ :: <job>]" --activity <a> --outcome <o> --label <l> --url <u>
//! statusfeed daemon start|stop|status|sync [--pipeline <name>]
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    daemon::DaemonCommand, feed::FeedArgs, progress::ProgressArgs, snapshot::SnapshotArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "statusfeed",
    version,
    about = "Keep a pipeline status feed in step with its configuration",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Reconcile the configuration once and print the resulting feed.
    Snapshot(SnapshotArgs),

    /// Print the live feed held by the running daemon.
    Feed(FeedArgs),

    /// Report execution progress for one stage or job to the daemon.
    Progress(ProgressArgs),

    /// Run or control the background feed daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Snapshot(args) => args.run(),
        Commands::Feed(args) => args.run(),
        Commands::Progress(args) => args.run(),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}
