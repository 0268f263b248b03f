//! Cascade coordinator: collect, prune and delete as one unit.
//!
//! # Responsibility
//! - Run the author cascade inside the store's transaction scope.
//! - Undo all effects on failure, natively or by compensation.
//! - Log every outcome with the author id.
//!
//! # Invariants
//! - The closure is fully known before the first prune write.
//! - A missing author performs no writes.
//! - Failures are logged, then returned; they are never swallowed.

use super::collector::collect_affected;
use super::pruner::{prune_edges_within, PruneJournal};
use super::{CascadeError, CascadeErrorKind};
use crate::model::author::AuthorId;
use crate::model::document::{Document, DocumentId};
use crate::repo::{CascadeStore, RepoError, TransactionMode};
use log::{error, info, warn};
use std::collections::BTreeSet;
use std::time::Instant;

/// Summary of a committed cascade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CascadeReport {
    pub author_id: AuthorId,
    /// Owned documents plus everything that transitively cites them.
    pub affected: BTreeSet<DocumentId>,
    pub edges_removed: usize,
}

/// Orchestrates `cascade_delete_author` over a `CascadeStore`.
pub struct CascadeCoordinator<S: CascadeStore> {
    store: S,
}

impl<S: CascadeStore> CascadeCoordinator<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Removes an author after pruning every reference edge inside the
    /// closure of its documents.
    ///
    /// # Errors
    /// - `AuthorNotFound` when the author does not exist; nothing is written.
    /// - `DocumentMissing` / `IdentityMismatch` when the store contradicts
    ///   the collected closure.
    /// - `Conflict` / `Store` for rejected or failed store calls.
    /// - `RollbackFailed` when undoing a failed run also failed.
    pub fn cascade_delete_author(
        &self,
        author_id: AuthorId,
    ) -> Result<CascadeReport, CascadeError> {
        let started_at = Instant::now();
        info!("event=cascade_delete module=cascade status=start author_id={author_id}");

        if let Err(err) = self.store.begin() {
            let err = CascadeError::from(err);
            log_failure(author_id, &err, started_at);
            return Err(err);
        }

        let mut journal = PruneJournal::default();
        let outcome = self
            .run(author_id, &mut journal)
            .and_then(|report| match self.store.commit() {
                Ok(()) => Ok(report),
                Err(err) => Err(err.into()),
            });

        match outcome {
            Ok(report) => {
                info!(
                    "event=cascade_delete module=cascade status=ok author_id={} affected={} edges_removed={} duration_ms={}",
                    author_id,
                    report.affected.len(),
                    report.edges_removed,
                    started_at.elapsed().as_millis()
                );
                Ok(report)
            }
            Err(err) => {
                let err = self.abort(err, &journal);
                log_failure(author_id, &err, started_at);
                Err(err)
            }
        }
    }

    fn run(
        &self,
        author_id: AuthorId,
        journal: &mut PruneJournal,
    ) -> Result<CascadeReport, CascadeError> {
        let author = self
            .store
            .get_author(author_id)?
            .ok_or(CascadeError::AuthorNotFound(author_id))?;

        let affected = collect_affected(&self.store, &author.document_ids)?;
        if !affected.is_empty() {
            prune_edges_within(&self.store, &affected, journal)?;
        }

        self.store.delete_author(author_id)?;

        Ok(CascadeReport {
            author_id,
            affected,
            edges_removed: journal.edges_removed(),
        })
    }

    fn abort(&self, cause: CascadeError, journal: &PruneJournal) -> CascadeError {
        let undone = match self.store.transaction_mode() {
            TransactionMode::Native => self.store.rollback(),
            TransactionMode::Compensating => self.compensate(journal),
        };

        match undone {
            Ok(()) => cause,
            Err(rollback) => CascadeError::RollbackFailed {
                cause: Box::new(cause),
                rollback,
            },
        }
    }

    /// Restores every journaled document to its pre-cascade state, newest first.
    fn compensate(&self, journal: &PruneJournal) -> Result<(), RepoError> {
        for entry in journal.entries().iter().rev() {
            let restore = Document {
                version: entry.written_version,
                ..entry.before.clone()
            };
            self.store.save_document(&restore)?;
        }
        if journal.writes() > 0 {
            info!(
                "event=cascade_compensate module=cascade status=ok documents_restored={}",
                journal.writes()
            );
        }
        Ok(())
    }
}

fn log_failure(author_id: AuthorId, err: &CascadeError, started_at: Instant) {
    match err.kind() {
        CascadeErrorKind::NotFound => warn!(
            "event=cascade_delete module=cascade status=skipped author_id={} reason=author_not_found duration_ms={}",
            author_id,
            started_at.elapsed().as_millis()
        ),
        kind => error!(
            "event=cascade_delete module=cascade status=error author_id={} error_kind={} duration_ms={} error={}",
            author_id,
            kind.as_str(),
            started_at.elapsed().as_millis(),
            err
        ),
    }
}
