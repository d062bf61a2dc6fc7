//! Applies viewer sets to a batch of entries.

use std::collections::HashMap;

use statusfeed_core::{CaseInsensitiveName, StatusEntry, Viewers};

/// Replace each entry's viewers with the set `viewers_for` returns for the
/// entry's pipeline.
///
/// When the lookup returns `None` the entry keeps what it has: a reused cache
/// entry keeps its previous viewers, and a fresh entry keeps the deny-all set
/// it was created with. Returns the number of entries left unannotated.
pub fn annotate<F>(entries: &mut [StatusEntry], mut viewers_for: F) -> usize
where
    F: FnMut(&CaseInsensitiveName) -> Option<Viewers>,
{
    let mut memo: HashMap<CaseInsensitiveName, Option<Viewers>> = HashMap::new();
    let mut unresolved = 0;
    for entry in entries.iter_mut() {
        let pipeline = entry.pipeline();
        if !memo.contains_key(pipeline) {
            let looked_up = viewers_for(pipeline);
            memo.insert(pipeline.clone(), looked_up);
        }
        match memo.get(entry.pipeline()).cloned().flatten() {
            Some(viewers) => entry.viewers = viewers,
            None => unresolved += 1,
        }
    }
    if unresolved > 0 {
        tracing::debug!(unresolved, "no viewer set for some entries; previous viewers kept");
    }
    unresolved
}

/// [`annotate`] against a precomputed pipeline → viewers map.
pub fn annotate_with_map(
    entries: &mut [StatusEntry],
    viewers: &HashMap<CaseInsensitiveName, Viewers>,
) -> usize {
    annotate(entries, |pipeline| viewers.get(pipeline).cloned())
}
