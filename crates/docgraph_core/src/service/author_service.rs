//! Author use-case service.
//!
//! # Responsibility
//! - Author CRUD over `SqliteAuthorRepository`.
//! - Turn an author deletion request into a published cascade snapshot.
//!
//! # Invariants
//! - `delete_author` only removes authors that own no documents.
//! - `request_author_cascade` returns once the snapshot is stored; it never
//!   waits for the cascade to run.

use crate::messaging::{CascadeProducer, MessageChannel, MessageId};
use crate::model::author::{Author, AuthorId};
use crate::repo::author_repo::SqliteAuthorRepository;
use crate::repo::query::{AuthorListQuery, AuthorSortField, Page};
use crate::repo::AuthorStore;
use crate::service::{ServiceError, ServiceResult};
use log::{info, warn};
use rusqlite::Connection;

/// Author CRUD plus the cascade request entry point.
pub struct AuthorService<'conn> {
    authors: SqliteAuthorRepository<'conn>,
}

impl<'conn> AuthorService<'conn> {
    pub fn try_new(conn: &'conn Connection) -> ServiceResult<Self> {
        Ok(Self {
            authors: SqliteAuthorRepository::try_new(conn)?,
        })
    }

    pub fn create_author(&self, first_name: &str, last_name: &str) -> ServiceResult<Author> {
        let author = self.authors.create_author(first_name, last_name)?;
        info!(
            "event=author_create module=service status=ok author_id={}",
            author.id
        );
        Ok(author)
    }

    pub fn update_author(
        &self,
        id: AuthorId,
        first_name: &str,
        last_name: &str,
    ) -> ServiceResult<Author> {
        Ok(self.authors.update_author(id, first_name, last_name)?)
    }

    /// Loads one author with the ids of the documents it contributes to.
    pub fn get_author(&self, id: AuthorId) -> ServiceResult<Author> {
        self.authors
            .get_author(id)?
            .ok_or(ServiceError::AuthorNotFound(id))
    }

    pub fn list_authors(
        &self,
        query: &AuthorListQuery,
    ) -> ServiceResult<Page<Author, AuthorSortField>> {
        Ok(self.authors.list_authors(query)?)
    }

    /// Deletes an author that owns no documents.
    ///
    /// Authors with documents are refused with `AuthorHasDocuments`; their
    /// removal goes through `request_author_cascade`.
    pub fn delete_author(&self, id: AuthorId) -> ServiceResult<()> {
        let author = self.get_author(id)?;
        if !author.document_ids.is_empty() {
            warn!(
                "event=author_delete module=service status=rejected author_id={} owned_documents={}",
                id,
                author.document_ids.len()
            );
            return Err(ServiceError::AuthorHasDocuments {
                author_id: id,
                document_ids: author.document_ids.into_iter().collect(),
            });
        }
        self.authors.delete_author(id)?;
        info!("event=author_delete module=service status=ok author_id={id}");
        Ok(())
    }

    /// Publishes the author's snapshot so the consumer runs the cascade.
    pub fn request_author_cascade<C: MessageChannel>(
        &self,
        producer: &CascadeProducer<C>,
        author_id: AuthorId,
    ) -> ServiceResult<MessageId> {
        let author = self.get_author(author_id)?;
        Ok(producer.publish_author_snapshot(&author)?)
    }
}
