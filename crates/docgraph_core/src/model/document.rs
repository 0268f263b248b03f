//! Document domain model.
//!
//! # Responsibility
//! - Define the document record and its outgoing reference edges.
//! - Validate document payloads before they reach storage.
//!
//! # Invariants
//! - `references` never contains the document's own id.
//! - Ids `0` are never valid for authors or references.
//! - `version` is owned by the store and only moves forward.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

use super::author::AuthorId;

/// Stable integer identifier assigned by the document store.
pub type DocumentId = i64;

/// Persisted document with its contributors and outgoing reference edges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub title: String,
    pub body: String,
    /// Contributing authors.
    pub author_ids: BTreeSet<AuthorId>,
    /// Documents this one cites (edges `id -> reference`).
    pub references: BTreeSet<DocumentId>,
    /// Optimistic concurrency token; a save must carry the stored value.
    pub version: i64,
}

impl Document {
    /// Validates document invariants before persistence.
    ///
    /// An empty author set is allowed: deleting an author strips its
    /// authorship links and the document row survives.
    pub fn validate(&self) -> Result<(), DocumentValidationError> {
        validate_fields(
            &self.title,
            &self.body,
            &self.author_ids,
            &self.references,
            Some(self.id),
        )
    }

    /// Returns whether this document cites `target`.
    pub fn cites(&self, target: DocumentId) -> bool {
        self.references.contains(&target)
    }
}

/// Unsaved document payload used by create and update requests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentDraft {
    pub title: String,
    pub body: String,
    pub author_ids: BTreeSet<AuthorId>,
    #[serde(default)]
    pub references: BTreeSet<DocumentId>,
}

impl DocumentDraft {
    /// Validates the draft; `target_id` is the id being updated, if any.
    ///
    /// Unlike stored documents, a draft must name at least one author.
    pub fn validate(&self, target_id: Option<DocumentId>) -> Result<(), DocumentValidationError> {
        if self.author_ids.is_empty() {
            return Err(DocumentValidationError::NoAuthors);
        }
        validate_fields(
            &self.title,
            &self.body,
            &self.author_ids,
            &self.references,
            target_id,
        )
    }
}

/// Validation errors for document payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentValidationError {
    BlankTitle,
    BlankBody,
    NoAuthors,
    InvalidAuthorId(AuthorId),
    InvalidReferenceId(DocumentId),
    SelfReference(DocumentId),
}

impl Display for DocumentValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BlankTitle => write!(f, "document title must not be blank"),
            Self::BlankBody => write!(f, "document body must not be blank"),
            Self::NoAuthors => write!(f, "document must have at least one author"),
            Self::InvalidAuthorId(id) => write!(f, "invalid author id: {id}"),
            Self::InvalidReferenceId(id) => write!(f, "invalid reference id: {id}"),
            Self::SelfReference(id) => write!(f, "document {id} must not reference itself"),
        }
    }
}

impl Error for DocumentValidationError {}

fn validate_fields(
    title: &str,
    body: &str,
    author_ids: &BTreeSet<AuthorId>,
    references: &BTreeSet<DocumentId>,
    self_id: Option<DocumentId>,
) -> Result<(), DocumentValidationError> {
    if title.trim().is_empty() {
        return Err(DocumentValidationError::BlankTitle);
    }
    if body.trim().is_empty() {
        return Err(DocumentValidationError::BlankBody);
    }
    if let Some(invalid) = author_ids.iter().find(|id| **id <= 0) {
        return Err(DocumentValidationError::InvalidAuthorId(*invalid));
    }
    if let Some(invalid) = references.iter().find(|id| **id <= 0) {
        return Err(DocumentValidationError::InvalidReferenceId(*invalid));
    }
    if let Some(self_id) = self_id {
        if references.contains(&self_id) {
            return Err(DocumentValidationError::SelfReference(self_id));
        }
    }
    Ok(())
}
