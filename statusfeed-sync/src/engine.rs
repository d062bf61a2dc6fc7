//! Reconciliation passes: configuration in, ordered feed entries committed.
//!
//! A full pass rebuilds every entry and swaps the store's content in one
//! step. A single-pipeline pass merges that pipeline's entries and leaves
//! every other pipeline untouched. Passes are one-shot batch transforms;
//! callers serialize them.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use statusfeed_core::{CaseInsensitiveName, CruiseConfig, PipelineConfig, StatusEntry};

use crate::annotator;
use crate::history::HistoryStore;
use crate::permissions::PermissionsAuthority;
use crate::resolver::{ResolvedFrom, StageGroupResolver};
use crate::store::StatusStore;
use crate::SyncError;

/// Scope for a reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncScope {
    /// Rebuild the whole feed.
    All,
    /// Merge a single named pipeline.
    Pipeline(CaseInsensitiveName),
}

impl SyncScope {
    pub fn label(&self) -> String {
        match self {
            SyncScope::All => "all".to_string(),
            SyncScope::Pipeline(name) => name.to_string(),
        }
    }
}

/// How a pass committed its entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitMode {
    Replace,
    Merge,
}

/// Outcome of a reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub scope: String,
    pub commit: CommitMode,
    pub pipelines: usize,
    pub entries: usize,
    pub placeholders: usize,
    pub stages_from_cache: usize,
    pub stages_from_history: usize,
    pub unannotated: usize,
    pub duration_ms: u128,
}

#[derive(Default)]
struct Collected {
    entries: Vec<StatusEntry>,
    pipelines: usize,
    from_cache: usize,
    from_history: usize,
}

/// Orchestrates resolution, permission annotation and commit.
pub struct SyncEngine {
    store: Arc<StatusStore>,
    history: Arc<dyn HistoryStore>,
    permissions: Arc<dyn PermissionsAuthority>,
}

impl SyncEngine {
    pub fn new(
        store: Arc<StatusStore>,
        history: Arc<dyn HistoryStore>,
        permissions: Arc<dyn PermissionsAuthority>,
    ) -> Self {
        Self {
            store,
            history,
            permissions,
        }
    }

    pub fn store(&self) -> &Arc<StatusStore> {
        &self.store
    }

    /// Run the pass selected by `scope` against `config`.
    pub fn run(&self, config: &CruiseConfig, scope: &SyncScope) -> Result<SyncReport, SyncError> {
        match scope {
            SyncScope::All => Ok(self.on_full_configuration_change(config)),
            SyncScope::Pipeline(name) => {
                let pipeline = config
                    .pipeline(name)
                    .ok_or_else(|| SyncError::PipelineNotFound(name.clone()))?;
                Ok(self.on_pipeline_configuration_change(pipeline))
            }
        }
    }

    /// Rebuild every entry from `config` and replace the store's content.
    pub fn on_full_configuration_change(&self, config: &CruiseConfig) -> SyncReport {
        let started = Instant::now();
        let mut collected = self.collect(config.pipelines());

        let viewers = self.permissions.viewers_for_all_pipelines();
        let unannotated = annotator::annotate_with_map(&mut collected.entries, &viewers);

        let report = build_report(
            SyncScope::All,
            CommitMode::Replace,
            &collected,
            unannotated,
            started,
        );
        self.store.replace_all_entries_in_cache_with(collected.entries);
        tracing::info!(
            entries = report.entries,
            placeholders = report.placeholders,
            pipelines = report.pipelines,
            "full reconciliation committed",
        );
        report
    }

    /// Rebuild `pipeline`'s entries and merge them into the store.
    pub fn on_pipeline_configuration_change(&self, pipeline: &PipelineConfig) -> SyncReport {
        let started = Instant::now();
        let mut collected = self.collect(std::iter::once(pipeline));

        let viewers = self.permissions.viewers_for_pipeline(&pipeline.name);
        let unannotated = annotator::annotate(&mut collected.entries, |_| viewers.clone());

        let scope = SyncScope::Pipeline(pipeline.name.clone());
        let report = build_report(scope, CommitMode::Merge, &collected, unannotated, started);
        self.store.put_all(collected.entries);
        tracing::info!(
            pipeline = %pipeline.name,
            entries = report.entries,
            placeholders = report.placeholders,
            "pipeline reconciliation committed",
        );
        report
    }

    fn collect<'c>(&self, pipelines: impl Iterator<Item = &'c PipelineConfig>) -> Collected {
        let resolver = StageGroupResolver::new(&self.store, self.history.as_ref());
        let mut collected = Collected::default();
        for pipeline in pipelines {
            collected.pipelines += 1;
            for stage in &pipeline.stages {
                let group = resolver.resolve(pipeline, stage);
                match group.source {
                    ResolvedFrom::Cache => collected.from_cache += 1,
                    ResolvedFrom::History => collected.from_history += 1,
                    ResolvedFrom::Placeholder => {}
                }
                collected.entries.extend(group.entries);
            }
        }
        collected
    }
}

fn build_report(
    scope: SyncScope,
    commit: CommitMode,
    collected: &Collected,
    unannotated: usize,
    started: Instant,
) -> SyncReport {
    SyncReport {
        scope: scope.label(),
        commit,
        pipelines: collected.pipelines,
        entries: collected.entries.len(),
        placeholders: collected
            .entries
            .iter()
            .filter(|entry| entry.is_placeholder())
            .count(),
        stages_from_cache: collected.from_cache,
        stages_from_history: collected.from_history,
        unannotated,
        duration_ms: started.elapsed().as_millis(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use statusfeed_core::{StageConfig, Viewers};

    use crate::history::EmptyHistory;

    use super::*;

    fn engine(store: Arc<StatusStore>) -> SyncEngine {
        let permissions: HashMap<CaseInsensitiveName, Viewers> =
            [("pipeline1".into(), Viewers::Everyone)].into_iter().collect();
        SyncEngine::new(store, Arc::new(EmptyHistory), Arc::new(permissions))
    }

    fn config() -> CruiseConfig {
        let mut config = CruiseConfig::default();
        config.add_pipeline(
            "group",
            PipelineConfig::new("pipeline1", vec![StageConfig::new("stage", ["job"])]),
        );
        config
    }

    #[test]
    fn run_all_replaces_store() {
        let store = Arc::new(StatusStore::new());
        let report = engine(store.clone())
            .run(&config(), &SyncScope::All)
            .expect("run");
        assert_eq!(report.commit, CommitMode::Replace);
        assert_eq!(report.entries, 2);
        assert_eq!(report.placeholders, 2);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn run_single_pipeline_merges() {
        let store = Arc::new(StatusStore::new());
        let report = engine(store.clone())
            .run(&config(), &SyncScope::Pipeline("PIPELINE1".into()))
            .expect("run");
        assert_eq!(report.commit, CommitMode::Merge);
        assert_eq!(report.scope, "pipeline1");
        assert_eq!(report.pipelines, 1);
    }

    #[test]
    fn run_unknown_pipeline_is_an_error() {
        let store = Arc::new(StatusStore::new());
        let err = engine(store.clone())
            .run(&config(), &SyncScope::Pipeline("nope".into()))
            .unwrap_err();
        assert!(matches!(err, SyncError::PipelineNotFound(_)));
        assert!(store.is_empty());
        assert_eq!(store.generation(), 0);
    }
}
