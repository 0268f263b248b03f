//! Store contracts and persistence implementations.
//!
//! # Responsibility
//! - Define the capability traits the cascade engine consumes
//!   (`DocumentStore`, `AuthorStore`, `CascadeStore`).
//! - Isolate SQLite query details from service/cascade orchestration.
//!
//! # Invariants
//! - Repository writes enforce model `validate()` before persistence.
//! - Repository APIs return semantic errors (`*NotFound`, `VersionConflict`)
//!   in addition to DB transport errors.

use crate::db::migrations::{current_user_version, latest_version};
use crate::db::DbError;
use crate::model::author::{Author, AuthorId, AuthorValidationError};
use crate::model::document::{Document, DocumentId, DocumentValidationError};
use log::warn;
use rusqlite::Connection;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod author_repo;
pub mod cascade_store;
pub mod document_repo;
pub mod memory_repo;
pub mod query;

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error shared by author and document stores.
#[derive(Debug)]
pub enum RepoError {
    AuthorValidation(AuthorValidationError),
    DocumentValidation(DocumentValidationError),
    Db(DbError),
    AuthorNotFound(AuthorId),
    DocumentNotFound(DocumentId),
    /// Stored version moved past the caller's copy.
    VersionConflict {
        document_id: DocumentId,
        expected_version: i64,
    },
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    MissingRequiredTable(&'static str),
    InvalidData(String),
}

impl RepoError {
    /// Returns whether the write was rejected because of a concurrent writer.
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::VersionConflict { .. } => true,
            Self::Db(err) => err.is_contention(),
            _ => false,
        }
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AuthorValidation(err) => write!(f, "{err}"),
            Self::DocumentValidation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::AuthorNotFound(id) => write!(f, "author not found: {id}"),
            Self::DocumentNotFound(id) => write!(f, "document not found: {id}"),
            Self::VersionConflict {
                document_id,
                expected_version,
            } => write!(
                f,
                "document {document_id} was modified concurrently (expected version {expected_version})"
            ),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "repository requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "repository requires table `{table}`")
            }
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::AuthorValidation(err) => Some(err),
            Self::DocumentValidation(err) => Some(err),
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<AuthorValidationError> for RepoError {
    fn from(value: AuthorValidationError) -> Self {
        Self::AuthorValidation(value)
    }
}

impl From<DocumentValidationError> for RepoError {
    fn from(value: DocumentValidationError) -> Self {
        Self::DocumentValidation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Document capabilities consumed by the cascade engine.
pub trait DocumentStore {
    /// Loads one document with its authors and outgoing references.
    fn get_document(&self, id: DocumentId) -> RepoResult<Option<Document>>;
    /// Replaces the stored document (fields, authors, reference set) and
    /// returns the stored row with its bumped version.
    fn save_document(&self, document: &Document) -> RepoResult<Document>;
    /// Lists every document whose reference set contains `id`.
    fn find_referencing(&self, id: DocumentId) -> RepoResult<Vec<Document>>;
}

/// Author capabilities consumed by the cascade engine.
pub trait AuthorStore {
    /// Loads one author with its owned document ids populated.
    fn get_author(&self, id: AuthorId) -> RepoResult<Option<Author>>;
    /// Removes the author row; authorship links go with it.
    fn delete_author(&self, id: AuthorId) -> RepoResult<()>;
}

/// How a store makes a multi-step cascade atomic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    /// The store runs begin/commit/rollback as one isolated transaction.
    Native,
    /// The store has no multi-row atomicity; callers must undo their own
    /// writes on failure.
    Compensating,
}

/// Combined store used by the cascade coordinator.
pub trait CascadeStore: DocumentStore + AuthorStore {
    fn transaction_mode(&self) -> TransactionMode;
    fn begin(&self) -> RepoResult<()>;
    fn commit(&self) -> RepoResult<()>;
    fn rollback(&self) -> RepoResult<()>;
}

/// Runs `work` inside a named savepoint on `conn`.
///
/// Nests safely inside an open transaction; outside one it behaves like a
/// deferred transaction.
pub(crate) fn in_savepoint<T, E: From<RepoError>>(
    conn: &Connection,
    name: &'static str,
    work: impl FnOnce() -> Result<T, E>,
) -> Result<T, E> {
    conn.execute_batch(&format!("SAVEPOINT {name};"))
        .map_err(|err| E::from(RepoError::from(err)))?;
    match work() {
        Ok(value) => {
            conn.execute_batch(&format!("RELEASE {name};"))
                .map_err(|err| E::from(RepoError::from(err)))?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) =
                conn.execute_batch(&format!("ROLLBACK TO {name}; RELEASE {name};"))
            {
                warn!(
                    "event=savepoint_rollback module=repo status=error savepoint={} error={}",
                    name, rollback_err
                );
            }
            Err(err)
        }
    }
}

/// Verifies the connection is migrated and exposes the required tables.
pub(crate) fn ensure_connection_ready(
    conn: &Connection,
    tables: &[&'static str],
) -> RepoResult<()> {
    let expected_version = latest_version();
    let actual_version = current_user_version(conn)?;
    if actual_version != expected_version {
        return Err(RepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    for table in tables {
        if !table_exists(conn, table)? {
            return Err(RepoError::MissingRequiredTable(table));
        }
    }
    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}
