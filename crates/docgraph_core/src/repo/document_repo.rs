//! Document store contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist documents with their authorship links and reference edges.
//! - Serve the reverse "who references X" lookup the cascade traverses.
//!
//! # Invariants
//! - Writes call `Document::validate()` / `DocumentDraft::validate()` first.
//! - `save_document` fully replaces link sets and only applies when the
//!   caller's `version` matches the stored one.
//! - Reads are deterministic: documents and link sets are ordered by id.

use crate::model::author::AuthorId;
use crate::model::document::{Document, DocumentDraft, DocumentId};
use crate::repo::query::{
    document_sort_column, normalize_page_size, order_and_page, pair_filter, DocumentListQuery,
    DocumentSortField, Page, SortSpec,
};
use crate::repo::{ensure_connection_ready, in_savepoint, DocumentStore, RepoError, RepoResult};
use rusqlite::{params, params_from_iter, Connection, Row};
use std::collections::BTreeSet;

const DOCUMENT_SELECT_SQL: &str = "SELECT
    id,
    title,
    body,
    version
FROM documents";

const REQUIRED_TABLES: &[&str] = &["documents", "document_authors", "document_references"];

/// SQLite-backed document store.
pub struct SqliteDocumentRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteDocumentRepository<'conn> {
    /// Creates repository from migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn, REQUIRED_TABLES)?;
        Ok(Self { conn })
    }

    /// Inserts a new document with its authors and references.
    pub fn create_document(&self, draft: &DocumentDraft) -> RepoResult<Document> {
        draft.validate(None)?;

        in_savepoint(self.conn, "create_document", || {
            self.conn.execute(
                "INSERT INTO documents (title, body) VALUES (?1, ?2);",
                params![draft.title.as_str(), draft.body.as_str()],
            )?;
            let id = self.conn.last_insert_rowid();
            replace_links(self.conn, id, &draft.author_ids, &draft.references)?;
            load_required_document(self.conn, id)
        })
    }

    /// Lists documents with optional title/body filters and pagination.
    pub fn list_documents(
        &self,
        query: &DocumentListQuery,
    ) -> RepoResult<Page<Document, DocumentSortField>> {
        let size = normalize_page_size(query.size);
        let (filter, mut bind_values) =
            pair_filter(("title", "body"), (query.title.as_ref(), query.body.as_ref()));

        let total: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM documents{filter};"),
            params_from_iter(bind_values.iter()),
            |row| row.get(0),
        )?;

        let paging = order_and_page(
            document_sort_column(query.sort_by),
            query.direction,
            query.page,
            size,
            &mut bind_values,
        );
        let mut stmt = self
            .conn
            .prepare(&format!("{DOCUMENT_SELECT_SQL}{filter}{paging};"))?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(parse_document_row(self.conn, row)?);
        }

        Ok(Page::new(
            items,
            query.page,
            size,
            u64::try_from(total).unwrap_or_default(),
            SortSpec {
                field: query.sort_by,
                direction: query.direction,
            },
        ))
    }

    /// Deletes one document row; its edges and authorship links cascade.
    pub fn delete_document(&self, id: DocumentId) -> RepoResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM documents WHERE id = ?1;", [id])?;
        if changed == 0 {
            return Err(RepoError::DocumentNotFound(id));
        }
        Ok(())
    }

    /// Returns the ids from `ids` that have no stored document.
    pub fn missing_documents(&self, ids: &BTreeSet<DocumentId>) -> RepoResult<Vec<DocumentId>> {
        let mut missing = Vec::new();
        for id in ids {
            if !document_exists(self.conn, *id)? {
                missing.push(*id);
            }
        }
        Ok(missing)
    }
}

impl DocumentStore for SqliteDocumentRepository<'_> {
    fn get_document(&self, id: DocumentId) -> RepoResult<Option<Document>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{DOCUMENT_SELECT_SQL} WHERE id = ?1;"))?;
        let mut rows = stmt.query([id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_document_row(self.conn, row)?));
        }
        Ok(None)
    }

    fn save_document(&self, document: &Document) -> RepoResult<Document> {
        document.validate()?;

        in_savepoint(self.conn, "save_document", || {
            let changed = self.conn.execute(
                "UPDATE documents
                 SET
                    title = ?2,
                    body = ?3,
                    version = version + 1,
                    updated_at = (strftime('%s', 'now') * 1000)
                 WHERE id = ?1
                   AND version = ?4;",
                params![
                    document.id,
                    document.title.as_str(),
                    document.body.as_str(),
                    document.version,
                ],
            )?;

            if changed == 0 {
                if document_exists(self.conn, document.id)? {
                    return Err(RepoError::VersionConflict {
                        document_id: document.id,
                        expected_version: document.version,
                    });
                }
                return Err(RepoError::DocumentNotFound(document.id));
            }

            replace_links(
                self.conn,
                document.id,
                &document.author_ids,
                &document.references,
            )?;
            load_required_document(self.conn, document.id)
        })
    }

    fn find_referencing(&self, id: DocumentId) -> RepoResult<Vec<Document>> {
        let mut stmt = self.conn.prepare(
            "SELECT
                d.id AS id,
                d.title AS title,
                d.body AS body,
                d.version AS version
             FROM documents d
             INNER JOIN document_references r ON r.document_id = d.id
             WHERE r.reference_id = ?1
             ORDER BY d.id ASC;",
        )?;
        let mut rows = stmt.query([id])?;
        let mut documents = Vec::new();
        while let Some(row) = rows.next()? {
            documents.push(parse_document_row(self.conn, row)?);
        }
        Ok(documents)
    }
}

fn replace_links(
    conn: &Connection,
    document_id: DocumentId,
    author_ids: &BTreeSet<AuthorId>,
    references: &BTreeSet<DocumentId>,
) -> RepoResult<()> {
    conn.execute(
        "DELETE FROM document_authors WHERE document_id = ?1;",
        [document_id],
    )?;
    for author_id in author_ids {
        conn.execute(
            "INSERT INTO document_authors (document_id, author_id) VALUES (?1, ?2);",
            params![document_id, author_id],
        )?;
    }

    conn.execute(
        "DELETE FROM document_references WHERE document_id = ?1;",
        [document_id],
    )?;
    for reference_id in references {
        conn.execute(
            "INSERT INTO document_references (document_id, reference_id) VALUES (?1, ?2);",
            params![document_id, reference_id],
        )?;
    }
    Ok(())
}

fn load_required_document(conn: &Connection, id: DocumentId) -> RepoResult<Document> {
    let mut stmt = conn.prepare(&format!("{DOCUMENT_SELECT_SQL} WHERE id = ?1;"))?;
    let mut rows = stmt.query([id])?;
    if let Some(row) = rows.next()? {
        return parse_document_row(conn, row);
    }
    Err(RepoError::DocumentNotFound(id))
}

pub(crate) fn document_exists(conn: &Connection, id: DocumentId) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM documents WHERE id = ?1);",
        [id],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn parse_document_row(conn: &Connection, row: &Row<'_>) -> RepoResult<Document> {
    let id: DocumentId = row.get("id")?;
    let document = Document {
        id,
        title: row.get("title")?,
        body: row.get("body")?,
        author_ids: load_id_set(
            conn,
            "SELECT author_id FROM document_authors WHERE document_id = ?1 ORDER BY author_id;",
            id,
        )?,
        references: load_id_set(
            conn,
            "SELECT reference_id FROM document_references WHERE document_id = ?1 ORDER BY reference_id;",
            id,
        )?,
        version: row.get("version")?,
    };

    if document.cites(id) {
        return Err(RepoError::InvalidData(format!(
            "document {id} references itself in document_references"
        )));
    }
    Ok(document)
}

pub(crate) fn load_id_set(conn: &Connection, sql: &str, id: i64) -> RepoResult<BTreeSet<i64>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query([id])?;
    let mut ids = BTreeSet::new();
    while let Some(row) = rows.next()? {
        ids.insert(row.get::<_, i64>(0)?);
    }
    Ok(ids)
}
