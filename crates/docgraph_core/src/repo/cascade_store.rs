//! SQLite composite store for cascade runs.
//!
//! # Responsibility
//! - Expose document and author stores behind one `CascadeStore`.
//! - Map cascade transaction control onto SQLite `BEGIN IMMEDIATE`.
//!
//! # Invariants
//! - `begin` takes the database write lock up front, so no other connection
//!   can insert reference edges until `commit` or `rollback`.
//! - Lock waits are bounded by the connection busy timeout; expiry surfaces
//!   as a contention error (`RepoError::is_conflict`).

use crate::model::author::{Author, AuthorId};
use crate::model::document::{Document, DocumentId};
use crate::repo::author_repo::SqliteAuthorRepository;
use crate::repo::document_repo::SqliteDocumentRepository;
use crate::repo::{AuthorStore, CascadeStore, DocumentStore, RepoResult, TransactionMode};
use log::debug;
use rusqlite::Connection;

/// Document + author store sharing one connection and one transaction.
pub struct SqliteCascadeStore<'conn> {
    conn: &'conn Connection,
    documents: SqliteDocumentRepository<'conn>,
    authors: SqliteAuthorRepository<'conn>,
}

impl<'conn> SqliteCascadeStore<'conn> {
    /// Creates the composite store from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        Ok(Self {
            conn,
            documents: SqliteDocumentRepository::try_new(conn)?,
            authors: SqliteAuthorRepository::try_new(conn)?,
        })
    }
}

impl DocumentStore for SqliteCascadeStore<'_> {
    fn get_document(&self, id: DocumentId) -> RepoResult<Option<Document>> {
        self.documents.get_document(id)
    }

    fn save_document(&self, document: &Document) -> RepoResult<Document> {
        self.documents.save_document(document)
    }

    fn find_referencing(&self, id: DocumentId) -> RepoResult<Vec<Document>> {
        self.documents.find_referencing(id)
    }
}

impl AuthorStore for SqliteCascadeStore<'_> {
    fn get_author(&self, id: AuthorId) -> RepoResult<Option<Author>> {
        self.authors.get_author(id)
    }

    fn delete_author(&self, id: AuthorId) -> RepoResult<()> {
        self.authors.delete_author(id)
    }
}

impl CascadeStore for SqliteCascadeStore<'_> {
    fn transaction_mode(&self) -> TransactionMode {
        TransactionMode::Native
    }

    fn begin(&self) -> RepoResult<()> {
        debug!("event=tx_begin module=repo behavior=immediate");
        self.conn.execute_batch("BEGIN IMMEDIATE;")?;
        Ok(())
    }

    fn commit(&self) -> RepoResult<()> {
        debug!("event=tx_commit module=repo");
        self.conn.execute_batch("COMMIT;")?;
        Ok(())
    }

    fn rollback(&self) -> RepoResult<()> {
        debug!("event=tx_rollback module=repo");
        if self.conn.is_autocommit() {
            return Ok(());
        }
        self.conn.execute_batch("ROLLBACK;")?;
        Ok(())
    }
}
