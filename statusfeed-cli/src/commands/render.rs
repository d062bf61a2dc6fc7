//! Shared feed rendering and reader arguments.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use statusfeed_core::{EntryStatus, Principal, StatusEntry};

/// Filter the feed down to what one reader may see.
#[derive(Args, Debug, Default)]
pub struct PrincipalArgs {
    /// Show only entries this user may view.
    #[arg(long)]
    pub user: Option<String>,

    /// Role held by `--user`; repeatable.
    #[arg(long = "role", requires = "user", value_name = "ROLE")]
    pub roles: Vec<String>,
}

impl PrincipalArgs {
    pub fn principal(&self) -> Option<Principal> {
        let user = self.user.as_deref()?;
        Some(
            self.roles
                .iter()
                .fold(Principal::new(user), |principal, role| {
                    principal.with_role(role.as_str())
                }),
        )
    }
}

#[derive(Tabled)]
struct FeedRow {
    #[tabled(rename = "name")]
    name: String,
    #[tabled(rename = "activity")]
    activity: String,
    #[tabled(rename = "last build")]
    outcome: String,
    #[tabled(rename = "label")]
    label: String,
    #[tabled(rename = "updated")]
    updated: String,
}

pub fn print_entries(entries: &[StatusEntry], json: bool) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(entries).context("failed to serialize feed JSON")?
        );
        return Ok(());
    }

    let placeholders = entries.iter().filter(|e| e.is_placeholder()).count();
    println!(
        "statusfeed v{} | {} entries | {} never built",
        env!("CARGO_PKG_VERSION"),
        entries.len(),
        placeholders,
    );
    if entries.is_empty() {
        println!("Feed is empty.");
        return Ok(());
    }

    let rows: Vec<FeedRow> = entries.iter().map(feed_row).collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    Ok(())
}

fn feed_row(entry: &StatusEntry) -> FeedRow {
    let name = if entry.name.is_job() {
        format!("  {}", entry.name)
    } else {
        entry.name.to_string().bold().to_string()
    };
    match &entry.status {
        EntryStatus::Placeholder => FeedRow {
            name,
            activity: "Sleeping".bright_black().to_string(),
            outcome: "Unknown".bright_black().to_string(),
            label: String::new(),
            updated: "never".to_string(),
        },
        EntryStatus::Known(status) => FeedRow {
            name,
            activity: status.activity.clone(),
            outcome: colorize_outcome(&status.outcome),
            label: status.label.clone(),
            updated: format_age(status.last_updated),
        },
    }
}

fn colorize_outcome(outcome: &str) -> String {
    match outcome.to_ascii_lowercase().as_str() {
        "success" => outcome.green().to_string(),
        "failure" => outcome.red().to_string(),
        "exception" => outcome.magenta().to_string(),
        _ => outcome.yellow().to_string(),
    }
}

fn format_age(at: DateTime<Utc>) -> String {
    let seconds = (Utc::now() - at).num_seconds().max(0);
    match seconds {
        0..=59 => format!("{seconds}s ago"),
        60..=3_599 => format!("{}m ago", seconds / 60),
        3_600..=86_399 => format!("{}h ago", seconds / 3_600),
        _ => format!("{}d ago", seconds / 86_400),
    }
}
