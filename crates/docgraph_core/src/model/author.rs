//! Author domain model.
//!
//! # Responsibility
//! - Define the author record and its owned-document view.
//! - Validate name fields before persistence.
//!
//! # Invariants
//! - `document_ids` mirrors the authorship links owned by documents; it is a
//!   read-side projection and never written through the author record.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

use super::document::DocumentId;

/// Stable integer identifier assigned by the author store.
pub type AuthorId = i64;

/// Author record with the set of documents it wrote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub id: AuthorId,
    pub first_name: String,
    pub last_name: String,
    /// Documents listing this author as a contributor.
    pub document_ids: BTreeSet<DocumentId>,
}

impl Author {
    /// Validates author invariants before persistence.
    pub fn validate(&self) -> Result<(), AuthorValidationError> {
        validate_names(&self.first_name, &self.last_name)
    }
}

/// Validation errors for author names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorValidationError {
    BlankFirstName,
    BlankLastName,
}

impl Display for AuthorValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BlankFirstName => write!(f, "author first name must not be blank"),
            Self::BlankLastName => write!(f, "author last name must not be blank"),
        }
    }
}

impl Error for AuthorValidationError {}

/// Checks that both names contain non-whitespace text.
pub fn validate_names(first_name: &str, last_name: &str) -> Result<(), AuthorValidationError> {
    if first_name.trim().is_empty() {
        return Err(AuthorValidationError::BlankFirstName);
    }
    if last_name.trim().is_empty() {
        return Err(AuthorValidationError::BlankLastName);
    }
    Ok(())
}
