//! Execution-progress updates.
//!
//! A running stage or job reports its new state; the recorder rewrites the
//! matching entry in place through `StatusStore::update`. The resolver is not
//! involved and viewers are carried over from the entry being replaced.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use statusfeed_core::{ExecutionStatus, ProjectName, StatusEntry};

use crate::store::StatusStore;

/// A progress report for one stage or job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub name: ProjectName,
    pub activity: String,
    pub outcome: String,
    pub label: String,
    pub web_url: String,
    #[serde(default = "Utc::now")]
    pub at: DateTime<Utc>,
}

/// Outcome of [`record`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressOutcome {
    Applied,
    /// The unit is not in the feed (not in the configuration); nothing changed.
    UnknownUnit,
}

/// Apply `event` to the store.
pub fn record(store: &StatusStore, event: ProgressEvent) -> ProgressOutcome {
    let ProgressEvent {
        name,
        activity,
        outcome,
        label,
        web_url,
        at,
    } = event;
    let status = ExecutionStatus {
        activity,
        outcome,
        label,
        last_updated: at,
        web_url,
    };

    // Viewers come from the entry current at commit time.
    let updated = store.update(&name, |existing| {
        StatusEntry::known(existing.name.clone(), status).with_viewers(existing.viewers.clone())
    });
    match updated {
        Some(entry) => {
            tracing::debug!(name = %entry.name, "progress recorded");
            ProgressOutcome::Applied
        }
        None => {
            tracing::debug!(name = %name, "progress for unit not in feed; ignored");
            ProgressOutcome::UnknownUnit
        }
    }
}
