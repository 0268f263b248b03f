//! Reference-edge pruning confined to a closed document set.

use super::CascadeError;
use crate::model::document::{Document, DocumentId};
use crate::repo::DocumentStore;
use log::debug;
use std::collections::BTreeSet;

/// Record of the writes a prune run has applied so far.
///
/// Stores without native transactions replay it backwards to undo a
/// failed cascade.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PruneJournal {
    entries: Vec<JournalEntry>,
    edges_removed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct JournalEntry {
    /// Document as read before the write.
    pub(crate) before: Document,
    /// Version the store assigned to the write.
    pub(crate) written_version: i64,
}

impl PruneJournal {
    /// Number of documents written.
    pub fn writes(&self) -> usize {
        self.entries.len()
    }

    /// Number of reference edges removed across all writes.
    pub fn edges_removed(&self) -> usize {
        self.edges_removed
    }

    pub(crate) fn entries(&self) -> &[JournalEntry] {
        &self.entries
    }
}

/// Removes every reference edge whose both endpoints lie in `document_ids`.
///
/// Every document in the set is written exactly once with its full reference
/// set replaced, even when nothing changed. Writes are appended to `journal`
/// as they succeed.
pub fn prune_edges_within<S>(
    store: &S,
    document_ids: &BTreeSet<DocumentId>,
    journal: &mut PruneJournal,
) -> Result<(), CascadeError>
where
    S: DocumentStore + ?Sized,
{
    for &id in document_ids {
        let document = store
            .get_document(id)?
            .ok_or(CascadeError::DocumentMissing { document_id: id })?;
        if document.id != id {
            return Err(CascadeError::IdentityMismatch {
                requested: id,
                found: document.id,
            });
        }

        let references: BTreeSet<DocumentId> = document
            .references
            .difference(document_ids)
            .copied()
            .collect();
        let removed = document.references.len() - references.len();

        let pruned = Document {
            references,
            ..document.clone()
        };
        let stored = store.save_document(&pruned)?;

        journal.edges_removed += removed;
        journal.entries.push(JournalEntry {
            before: document,
            written_version: stored.version,
        });
        debug!(
            "event=cascade_prune module=cascade status=ok document_id={} edges_removed={}",
            id, removed
        );
    }
    Ok(())
}
