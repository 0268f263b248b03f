//! Reverse-transitive closure over reference edges.

use super::CascadeError;
use crate::model::document::DocumentId;
use crate::repo::DocumentStore;
use log::debug;
use std::collections::BTreeSet;

/// Collects `seeds` plus every document that transitively cites one of them.
///
/// Each id is inserted into the result before it is expanded and is never
/// expanded again, which bounds store lookups to one per collected id and
/// makes cycles harmless. Any lookup failure aborts the traversal.
pub fn collect_affected<S>(
    store: &S,
    seeds: &BTreeSet<DocumentId>,
) -> Result<BTreeSet<DocumentId>, CascadeError>
where
    S: DocumentStore + ?Sized,
{
    let mut affected = BTreeSet::new();
    let mut pending: Vec<DocumentId> = seeds.iter().rev().copied().collect();

    while let Some(id) = pending.pop() {
        if !affected.insert(id) {
            continue;
        }

        for citing in store.find_referencing(id)? {
            if !affected.contains(&citing.id) {
                pending.push(citing.id);
            }
        }
    }

    debug!(
        "event=cascade_collect module=cascade status=ok seeds={} affected={}",
        seeds.len(),
        affected.len()
    );
    Ok(affected)
}
