//! Reference-graph cascade engine.
//!
//! # Responsibility
//! - Collect the reverse-transitive closure of an author's documents.
//! - Prune reference edges confined to that closure.
//! - Remove the author, atomically with the pruning.
//!
//! # Invariants
//! - Traversal never expands a document id twice, so cyclic graphs terminate.
//! - Edges to documents outside the collected set are never touched.
//! - Either every prune and the author removal commit together, or none do.

use crate::model::author::AuthorId;
use crate::model::document::DocumentId;
use crate::repo::RepoError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod collector;
pub mod coordinator;
pub mod pruner;

pub use collector::collect_affected;
pub use coordinator::{CascadeCoordinator, CascadeReport};
pub use pruner::{prune_edges_within, PruneJournal};

/// Coarse failure classes used for logging and delivery decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadeErrorKind {
    /// The author is already gone; redelivery is harmless.
    NotFound,
    /// A collected document vanished from the store mid-cascade.
    ConsistencyViolation,
    /// A write was rejected because of a concurrent writer.
    ConcurrencyConflict,
    /// Any other storage failure.
    Store,
}

impl CascadeErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::ConsistencyViolation => "consistency_violation",
            Self::ConcurrencyConflict => "concurrency_conflict",
            Self::Store => "store",
        }
    }
}

/// Errors from a cascade run.
#[derive(Debug)]
pub enum CascadeError {
    AuthorNotFound(AuthorId),
    /// A collected id has no stored document.
    DocumentMissing { document_id: DocumentId },
    /// The store answered a lookup with a different document.
    IdentityMismatch {
        requested: DocumentId,
        found: DocumentId,
    },
    Conflict(RepoError),
    Store(RepoError),
    /// Undoing the failed run failed as well; the store may hold partial writes.
    RollbackFailed {
        cause: Box<CascadeError>,
        rollback: RepoError,
    },
}

impl CascadeError {
    pub fn kind(&self) -> CascadeErrorKind {
        match self {
            Self::AuthorNotFound(_) => CascadeErrorKind::NotFound,
            Self::DocumentMissing { .. } | Self::IdentityMismatch { .. } => {
                CascadeErrorKind::ConsistencyViolation
            }
            Self::Conflict(_) => CascadeErrorKind::ConcurrencyConflict,
            Self::Store(_) | Self::RollbackFailed { .. } => CascadeErrorKind::Store,
        }
    }
}

impl Display for CascadeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AuthorNotFound(id) => write!(f, "author not found: {id}"),
            Self::DocumentMissing { document_id } => write!(
                f,
                "collected document {document_id} no longer exists in the document store"
            ),
            Self::IdentityMismatch { requested, found } => write!(
                f,
                "document lookup for {requested} returned document {found}"
            ),
            Self::Conflict(err) => write!(f, "concurrent modification: {err}"),
            Self::Store(err) => write!(f, "{err}"),
            Self::RollbackFailed { cause, rollback } => {
                write!(f, "{cause}; rollback also failed: {rollback}")
            }
        }
    }
}

impl Error for CascadeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Conflict(err) | Self::Store(err) => Some(err),
            Self::RollbackFailed { cause, .. } => Some(cause.as_ref()),
            _ => None,
        }
    }
}

/// `AuthorNotFound` is never produced here: only the coordinator's own
/// author lookup decides that the cascaded author is gone. A store reporting
/// some other missing author mid-run is a plain store failure.
impl From<RepoError> for CascadeError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::DocumentNotFound(document_id) => Self::DocumentMissing { document_id },
            other if other.is_conflict() => Self::Conflict(other),
            other => Self::Store(other),
        }
    }
}
