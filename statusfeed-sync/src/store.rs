//! The shared, ordered, concurrently readable feed cache.
//!
//! ## Concurrency contract
//!
//! The store holds an `Arc` to an immutable [`Contents`] value behind a
//! `RwLock`. Readers take the read lock only long enough to clone the `Arc`,
//! then work on their own copy, so every read sees one complete generation.
//!
//! Writers are serialized by a separate mutex. Every commit builds its new
//! contents while holding only that mutex and takes the `RwLock` in write
//! mode for the pointer swap alone.
//!
//! - [`StatusStore::replace_all_entries_in_cache_with`] installs contents
//!   built from the given entries.
//! - [`StatusStore::put_all`] installs a merged copy of the current contents.
//! - [`StatusStore::update`] rewrites one existing entry; the read and the
//!   write happen inside the same writer turn.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use statusfeed_core::{CaseInsensitiveName, Principal, ProjectName, StatusEntry};

/// Entries by name plus the order they are served in.
#[derive(Debug, Clone, Default)]
struct Contents {
    entries: HashMap<ProjectName, StatusEntry>,
    order: Vec<ProjectName>,
    /// Position of every name in `order`.
    index: HashMap<ProjectName, usize>,
}

impl Contents {
    fn from_ordered(entries: Vec<StatusEntry>) -> Self {
        let mut contents = Contents {
            entries: HashMap::with_capacity(entries.len()),
            order: Vec::with_capacity(entries.len()),
            index: HashMap::with_capacity(entries.len()),
        };
        for entry in entries {
            let name = entry.name.clone();
            // A repeated name keeps its first position and its last value.
            if contents.entries.insert(name.clone(), entry).is_none() {
                contents.order.push(name);
            }
        }
        contents.reindex();
        contents
    }

    fn reindex(&mut self) {
        self.index = self
            .order
            .iter()
            .enumerate()
            .map(|(pos, name)| (name.clone(), pos))
            .collect();
    }

    /// Index just past the last entry owned by `pipeline`.
    fn end_of_pipeline(&self, pipeline: &CaseInsensitiveName) -> Option<usize> {
        self.order
            .iter()
            .rposition(|n| n.pipeline() == pipeline)
            .map(|pos| pos + 1)
    }

    /// Merge `entries`, one run of same-pipeline entries at a time.
    ///
    /// A run is served in batch order. It takes the place of the earliest of
    /// its names already present; a run with no present names follows the
    /// previous run, or closes its pipeline's block, or starts one at the end.
    fn merge(&mut self, entries: Vec<StatusEntry>) {
        let mut after_previous_run: Option<usize> = None;
        for run in runs_by_pipeline(entries) {
            let mut names: Vec<ProjectName> = Vec::with_capacity(run.len());
            let mut seen = HashSet::with_capacity(run.len());
            for entry in &run {
                if seen.insert(entry.name.clone()) {
                    names.push(entry.name.clone());
                }
            }

            let earliest = names.iter().filter_map(|n| self.index.get(n)).min().copied();
            let at = match earliest {
                Some(pos) => {
                    // Nothing before `pos` belongs to the run, so removal keeps it valid.
                    self.order.retain(|n| !seen.contains(n));
                    pos
                }
                None => after_previous_run
                    .or_else(|| self.end_of_pipeline(run[0].name.pipeline()))
                    .unwrap_or(self.order.len()),
            };
            let placed = names.len();
            self.order.splice(at..at, names);
            for entry in run {
                self.entries.insert(entry.name.clone(), entry);
            }
            self.reindex();
            after_previous_run = Some(at + placed);
        }
    }

    fn ordered(&self) -> impl Iterator<Item = &StatusEntry> {
        self.order.iter().filter_map(|name| self.entries.get(name))
    }
}

/// Split a batch into maximal runs of consecutive entries sharing a pipeline.
fn runs_by_pipeline(entries: Vec<StatusEntry>) -> Vec<Vec<StatusEntry>> {
    let mut runs: Vec<Vec<StatusEntry>> = Vec::new();
    for entry in entries {
        match runs.last_mut() {
            Some(run) if run[0].name.pipeline() == entry.name.pipeline() => run.push(entry),
            _ => runs.push(vec![entry]),
        }
    }
    runs
}

/// Shared cache of feed entries. Hold it as `Arc<StatusStore>`.
#[derive(Debug, Default)]
pub struct StatusStore {
    current: RwLock<Arc<Contents>>,
    writer: Mutex<()>,
    generation: AtomicU64,
}

impl StatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point lookup by name.
    pub fn get(&self, name: &ProjectName) -> Option<StatusEntry> {
        self.load().entries.get(name).cloned()
    }

    pub fn contains(&self, name: &ProjectName) -> bool {
        self.load().entries.contains_key(name)
    }

    /// Merge `entries` by name. Names not mentioned keep their value and
    /// position; mentioned names are served in batch order.
    pub fn put_all(&self, entries: Vec<StatusEntry>) {
        if entries.is_empty() {
            return;
        }
        let _turn = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = Contents::clone(&self.load());
        next.merge(entries);
        self.install(next);
    }

    /// Single-entry form of [`put_all`](Self::put_all).
    pub fn put(&self, entry: StatusEntry) {
        self.put_all(vec![entry]);
    }

    /// Rewrite the entry stored under `name` with `f`, keeping its position.
    ///
    /// Returns the stored result, or `None` (and commits nothing) when
    /// `name` is absent. No other commit can land between the read and the
    /// write.
    pub fn update<F>(&self, name: &ProjectName, f: F) -> Option<StatusEntry>
    where
        F: FnOnce(&StatusEntry) -> StatusEntry,
    {
        let _turn = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.load();
        let existing = current.entries.get(name)?;
        let mut updated = f(existing);
        updated.name = existing.name.clone();

        let mut next = Contents::clone(&current);
        next.entries.insert(updated.name.clone(), updated.clone());
        self.install(next);
        Some(updated)
    }

    /// Swap the whole content for `entries`, served in the given order.
    pub fn replace_all_entries_in_cache_with(&self, entries: Vec<StatusEntry>) {
        let replacement = Contents::from_ordered(entries);
        let _turn = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        self.install(replacement);
    }

    /// Every entry in served order.
    pub fn snapshot(&self) -> Vec<StatusEntry> {
        self.load().ordered().cloned().collect()
    }

    /// The entries `principal` may view, in served order.
    pub fn snapshot_visible_to(&self, principal: &Principal) -> Vec<StatusEntry> {
        self.load()
            .ordered()
            .filter(|entry| entry.can_be_viewed_by(principal))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.load().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of commits applied since creation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn load(&self) -> Arc<Contents> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Pointer swap. Callers hold the writer turn.
    fn install(&self, contents: Contents) {
        let contents = Arc::new(contents);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = contents;
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}
