//! Stage group resolution.
//!
//! Tier precedence for one stage group (the stage entry, then one entry per
//! job in declared order):
//! 1. `Cache`: the stage is in the store; the whole group comes from the
//!    store and missing jobs become placeholders. History is not consulted.
//! 2. `History`: the history store returned records; each expected name
//!    takes its matching record or a placeholder, and records that match no
//!    expected name are dropped.
//! 3. `Placeholder`: history returned nothing or failed; every expected name
//!    becomes a placeholder.

use std::collections::HashMap;

use statusfeed_core::{PipelineConfig, ProjectName, StageConfig, StatusEntry};

use crate::history::HistoryStore;
use crate::store::StatusStore;

/// Which tier served a stage group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedFrom {
    Cache,
    History,
    Placeholder,
}

/// The ordered entries for one stage and where they came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageGroup {
    pub entries: Vec<StatusEntry>,
    pub source: ResolvedFrom,
}

/// Resolves stage groups against a store and a history collaborator.
pub struct StageGroupResolver<'a> {
    store: &'a StatusStore,
    history: &'a dyn HistoryStore,
}

impl<'a> StageGroupResolver<'a> {
    pub fn new(store: &'a StatusStore, history: &'a dyn HistoryStore) -> Self {
        Self { store, history }
    }

    /// Entries for `stage` of `pipeline`: stage first, then its jobs as declared.
    pub fn resolve(&self, pipeline: &PipelineConfig, stage: &StageConfig) -> StageGroup {
        let expected = pipeline.project_names(stage);

        if let Some(cached_stage) = self.store.get(&expected[0]) {
            let entries = std::iter::once(cached_stage)
                .chain(expected[1..].iter().map(|name| {
                    self.store
                        .get(name)
                        .unwrap_or_else(|| StatusEntry::placeholder(name.clone()))
                }))
                .collect();
            tracing::debug!(pipeline = %pipeline.name, stage = %stage.name, "stage group served from cache");
            return StageGroup {
                entries,
                source: ResolvedFrom::Cache,
            };
        }

        let records = match self.history.statuses_for_stage_and_jobs(pipeline, stage) {
            Ok(records) => records,
            Err(err) => {
                tracing::warn!(
                    pipeline = %pipeline.name,
                    stage = %stage.name,
                    error = %err,
                    "history lookup failed; treating stage as unknown",
                );
                Vec::new()
            }
        };

        if records.is_empty() {
            tracing::debug!(pipeline = %pipeline.name, stage = %stage.name, "no history; using placeholders");
            return StageGroup {
                entries: expected.into_iter().map(StatusEntry::placeholder).collect(),
                source: ResolvedFrom::Placeholder,
            };
        }

        let entries = match_records(expected, records);
        tracing::debug!(pipeline = %pipeline.name, stage = %stage.name, "stage group served from history");
        StageGroup {
            entries,
            source: ResolvedFrom::History,
        }
    }
}

/// Pair each expected name with its record; the first record per name wins.
fn match_records(expected: Vec<ProjectName>, records: Vec<StatusEntry>) -> Vec<StatusEntry> {
    let mut by_name: HashMap<ProjectName, StatusEntry> = HashMap::with_capacity(records.len());
    for record in records {
        by_name.entry(record.name.clone()).or_insert(record);
    }

    let entries: Vec<StatusEntry> = expected
        .into_iter()
        .map(|name| {
            by_name
                .remove(&name)
                .unwrap_or_else(|| StatusEntry::placeholder(name))
        })
        .collect();

    if !by_name.is_empty() {
        tracing::debug!(discarded = by_name.len(), "history records matched no configured unit");
    }
    entries
}
