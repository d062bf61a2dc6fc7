//! `statusfeed snapshot`: one reconciliation pass, no daemon involved.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;

use statusfeed_core::{config, CaseInsensitiveName, StatusEntry};
use statusfeed_sync::{
    history, ConfigPermissionsAuthority, JsonHistoryStore, StatusStore, SyncEngine, SyncScope,
};

use super::render::{print_entries, PrincipalArgs};

/// Arguments for `statusfeed snapshot`.
#[derive(Args, Debug)]
pub struct SnapshotArgs {
    /// Limit the pass to one pipeline.
    #[arg(long)]
    pub pipeline: Option<String>,

    /// Configuration file (default: ~/.statusfeed/config.yaml).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// History file (default: ~/.statusfeed/history.json).
    #[arg(long)]
    pub history: Option<PathBuf>,

    #[command(flatten)]
    pub principal: PrincipalArgs,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl SnapshotArgs {
    pub fn run(self) -> Result<()> {
        let entries = self.reconcile()?;
        print_entries(&entries, self.json)
    }

    fn reconcile(&self) -> Result<Vec<StatusEntry>> {
        let home = || dirs::home_dir().context("could not determine home directory");
        let config_path = match &self.config {
            Some(path) => path.clone(),
            None => config::config_path_at(&home()?),
        };
        let history_path = match &self.history {
            Some(path) => path.clone(),
            None => history::history_path_at(&home()?),
        };

        let config = config::load_from(&config_path)
            .with_context(|| format!("failed to load '{}'", config_path.display()))?;

        let store = Arc::new(StatusStore::new());
        let engine = SyncEngine::new(
            store.clone(),
            Arc::new(JsonHistoryStore::new(history_path)),
            Arc::new(ConfigPermissionsAuthority::new(&config)),
        );
        let scope = match &self.pipeline {
            Some(name) => SyncScope::Pipeline(CaseInsensitiveName::from(name.as_str())),
            None => SyncScope::All,
        };
        engine
            .run(&config, &scope)
            .with_context(|| format!("reconciliation failed for scope '{}'", scope.label()))?;

        Ok(match self.principal.principal() {
            Some(principal) => store.snapshot_visible_to(&principal),
            None => store.snapshot(),
        })
    }
}
