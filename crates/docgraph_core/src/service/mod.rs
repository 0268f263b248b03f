//! Use-case services over the SQLite stores.
//!
//! # Responsibility
//! - Expose author/document CRUD with cross-entity checks the stores do not
//!   make on their own (existence of linked rows, guarded author delete).
//! - Hand cascade requests to the messaging producer.
//!
//! # Invariants
//! - Services never bypass repository validation.
//! - Authors that still own documents are removed only through the cascade.

use crate::messaging::MessagingError;
use crate::model::author::{AuthorId, AuthorValidationError};
use crate::model::document::{DocumentId, DocumentValidationError};
use crate::repo::RepoError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod author_service;
pub mod document_service;

pub use author_service::AuthorService;
pub use document_service::DocumentService;

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Service error for CRUD and cascade-request use-cases.
#[derive(Debug)]
pub enum ServiceError {
    AuthorValidation(AuthorValidationError),
    DocumentValidation(DocumentValidationError),
    AuthorNotFound(AuthorId),
    DocumentNotFound(DocumentId),
    /// Direct delete refused; the author must go through the cascade.
    AuthorHasDocuments {
        author_id: AuthorId,
        document_ids: Vec<DocumentId>,
    },
    MissingAuthors(Vec<AuthorId>),
    MissingReferences(Vec<DocumentId>),
    Repo(RepoError),
    Messaging(MessagingError),
}

impl Display for ServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AuthorValidation(err) => write!(f, "{err}"),
            Self::DocumentValidation(err) => write!(f, "{err}"),
            Self::AuthorNotFound(id) => write!(f, "author not found: {id}"),
            Self::DocumentNotFound(id) => write!(f, "document not found: {id}"),
            Self::AuthorHasDocuments {
                author_id,
                document_ids,
            } => write!(
                f,
                "author {author_id} still owns documents {}; request a cascade delete instead",
                join_ids(document_ids)
            ),
            Self::MissingAuthors(ids) => write!(f, "unknown author ids: {}", join_ids(ids)),
            Self::MissingReferences(ids) => {
                write!(f, "unknown referenced document ids: {}", join_ids(ids))
            }
            Self::Repo(err) => write!(f, "{err}"),
            Self::Messaging(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::AuthorValidation(err) => Some(err),
            Self::DocumentValidation(err) => Some(err),
            Self::Repo(err) => Some(err),
            Self::Messaging(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for ServiceError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::AuthorValidation(err) => Self::AuthorValidation(err),
            RepoError::DocumentValidation(err) => Self::DocumentValidation(err),
            RepoError::AuthorNotFound(id) => Self::AuthorNotFound(id),
            RepoError::DocumentNotFound(id) => Self::DocumentNotFound(id),
            other => Self::Repo(other),
        }
    }
}

impl From<MessagingError> for ServiceError {
    fn from(value: MessagingError) -> Self {
        Self::Messaging(value)
    }
}

fn join_ids(ids: &[i64]) -> String {
    ids.iter()
        .map(i64::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::ServiceError;
    use crate::repo::RepoError;

    #[test]
    fn not_found_repo_errors_keep_their_meaning() {
        let err = ServiceError::from(RepoError::DocumentNotFound(4));
        assert!(matches!(err, ServiceError::DocumentNotFound(4)));

        let err = ServiceError::from(RepoError::InvalidData("bad".to_string()));
        assert!(matches!(err, ServiceError::Repo(_)));
    }

    #[test]
    fn has_documents_message_lists_ids() {
        let err = ServiceError::AuthorHasDocuments {
            author_id: 1,
            document_ids: vec![2, 5],
        };
        assert!(err.to_string().contains("2,5"));
    }
}
