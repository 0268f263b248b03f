//! Document use-case service.
//!
//! # Responsibility
//! - Document CRUD over `SqliteDocumentRepository`.
//! - Reject drafts whose authors or referenced documents do not exist.
//!
//! # Invariants
//! - Existence checks and the write run in one savepoint.
//! - Updates carry the stored version, so a concurrent cascade surfaces as a
//!   conflict instead of being overwritten.

use crate::model::author::AuthorId;
use crate::model::document::{Document, DocumentDraft, DocumentId};
use crate::repo::author_repo::SqliteAuthorRepository;
use crate::repo::document_repo::SqliteDocumentRepository;
use crate::repo::query::{DocumentListQuery, DocumentSortField, Page};
use crate::repo::{in_savepoint, DocumentStore, RepoError};
use crate::service::{ServiceError, ServiceResult};
use log::info;
use rusqlite::Connection;

/// Document CRUD with link existence checks.
pub struct DocumentService<'conn> {
    conn: &'conn Connection,
    documents: SqliteDocumentRepository<'conn>,
    authors: SqliteAuthorRepository<'conn>,
}

impl<'conn> DocumentService<'conn> {
    pub fn try_new(conn: &'conn Connection) -> ServiceResult<Self> {
        Ok(Self {
            conn,
            documents: SqliteDocumentRepository::try_new(conn)?,
            authors: SqliteAuthorRepository::try_new(conn)?,
        })
    }

    pub fn create_document(&self, draft: &DocumentDraft) -> ServiceResult<Document> {
        draft.validate(None).map_err(RepoError::from)?;
        let create = || -> ServiceResult<Document> {
            self.ensure_links_exist(draft)?;
            Ok(self.documents.create_document(draft)?)
        };
        let document = in_savepoint(self.conn, "create_document_checked", create)?;
        info!(
            "event=document_create module=service status=ok document_id={} references={}",
            document.id,
            document.references.len()
        );
        Ok(document)
    }

    /// Replaces title, body, authors and references of document `id`.
    pub fn update_document(
        &self,
        id: DocumentId,
        draft: &DocumentDraft,
    ) -> ServiceResult<Document> {
        draft.validate(Some(id)).map_err(RepoError::from)?;
        let update = || -> ServiceResult<Document> {
            let current = self.get_document(id)?;
            self.ensure_links_exist(draft)?;
            let next = Document {
                id,
                title: draft.title.clone(),
                body: draft.body.clone(),
                author_ids: draft.author_ids.clone(),
                references: draft.references.clone(),
                version: current.version,
            };
            Ok(self.documents.save_document(&next)?)
        };
        in_savepoint(self.conn, "update_document_checked", update)
    }

    pub fn get_document(&self, id: DocumentId) -> ServiceResult<Document> {
        self.documents
            .get_document(id)?
            .ok_or(ServiceError::DocumentNotFound(id))
    }

    pub fn list_documents(
        &self,
        query: &DocumentListQuery,
    ) -> ServiceResult<Page<Document, DocumentSortField>> {
        Ok(self.documents.list_documents(query)?)
    }

    /// Deletes a document; its edges in both directions go with it.
    pub fn delete_document(&self, id: DocumentId) -> ServiceResult<()> {
        self.documents.delete_document(id)?;
        info!("event=document_delete module=service status=ok document_id={id}");
        Ok(())
    }

    fn ensure_links_exist(&self, draft: &DocumentDraft) -> ServiceResult<()> {
        let mut missing_authors: Vec<AuthorId> = Vec::new();
        for author_id in &draft.author_ids {
            if !self.authors.author_exists(*author_id)? {
                missing_authors.push(*author_id);
            }
        }
        if !missing_authors.is_empty() {
            return Err(ServiceError::MissingAuthors(missing_authors));
        }

        let missing_references = self.documents.missing_documents(&draft.references)?;
        if !missing_references.is_empty() {
            return Err(ServiceError::MissingReferences(missing_references));
        }
        Ok(())
    }
}
