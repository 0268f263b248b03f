//! Author store contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist author records.
//! - Project each author's owned documents from `document_authors`.
//!
//! # Invariants
//! - Writes call `validate_names()` before SQL mutations.
//! - Deleting an author removes its authorship links, never documents.

use crate::model::author::{validate_names, Author, AuthorId};
use crate::repo::document_repo::load_id_set;
use crate::repo::query::{
    author_sort_column, normalize_page_size, order_and_page, pair_filter, AuthorListQuery,
    AuthorSortField, Page, SortSpec,
};
use crate::repo::{ensure_connection_ready, AuthorStore, RepoError, RepoResult};
use rusqlite::{params, params_from_iter, Connection, Row};

const AUTHOR_SELECT_SQL: &str = "SELECT
    id,
    first_name,
    last_name
FROM authors";

const OWNED_DOCUMENTS_SQL: &str =
    "SELECT document_id FROM document_authors WHERE author_id = ?1 ORDER BY document_id;";

/// SQLite-backed author store.
pub struct SqliteAuthorRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteAuthorRepository<'conn> {
    /// Creates repository from migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn, &["authors", "document_authors"])?;
        Ok(Self { conn })
    }

    /// Inserts a new author with trimmed names.
    pub fn create_author(&self, first_name: &str, last_name: &str) -> RepoResult<Author> {
        validate_names(first_name, last_name)?;

        self.conn.execute(
            "INSERT INTO authors (first_name, last_name) VALUES (?1, ?2);",
            params![first_name.trim(), last_name.trim()],
        )?;
        load_required_author(self.conn, self.conn.last_insert_rowid())
    }

    /// Replaces an author's names.
    pub fn update_author(
        &self,
        id: AuthorId,
        first_name: &str,
        last_name: &str,
    ) -> RepoResult<Author> {
        validate_names(first_name, last_name)?;

        let changed = self.conn.execute(
            "UPDATE authors
             SET
                first_name = ?2,
                last_name = ?3,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1;",
            params![id, first_name.trim(), last_name.trim()],
        )?;
        if changed == 0 {
            return Err(RepoError::AuthorNotFound(id));
        }
        load_required_author(self.conn, id)
    }

    /// Lists authors with optional name filters and pagination.
    pub fn list_authors(
        &self,
        query: &AuthorListQuery,
    ) -> RepoResult<Page<Author, AuthorSortField>> {
        let size = normalize_page_size(query.size);
        let (filter, mut bind_values) = pair_filter(
            ("first_name", "last_name"),
            (query.first_name.as_ref(), query.last_name.as_ref()),
        );

        let total: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM authors{filter};"),
            params_from_iter(bind_values.iter()),
            |row| row.get(0),
        )?;

        let paging = order_and_page(
            author_sort_column(query.sort_by),
            query.direction,
            query.page,
            size,
            &mut bind_values,
        );
        let mut stmt = self
            .conn
            .prepare(&format!("{AUTHOR_SELECT_SQL}{filter}{paging};"))?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(parse_author_row(self.conn, row)?);
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

    /// Returns whether an author row exists.
    pub fn author_exists(&self, id: AuthorId) -> RepoResult<bool> {
        let exists: i64 = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM authors WHERE id = ?1);",
            [id],
            |row| row.get(0),
        )?;
        Ok(exists == 1)
    }
}

impl AuthorStore for SqliteAuthorRepository<'_> {
    fn get_author(&self, id: AuthorId) -> RepoResult<Option<Author>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{AUTHOR_SELECT_SQL} WHERE id = ?1;"))?;
        let mut rows = stmt.query([id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_author_row(self.conn, row)?));
        }
        Ok(None)
    }

    fn delete_author(&self, id: AuthorId) -> RepoResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM authors WHERE id = ?1;", [id])?;
        if changed == 0 {
            return Err(RepoError::AuthorNotFound(id));
        }
        Ok(())
    }
}

fn load_required_author(conn: &Connection, id: AuthorId) -> RepoResult<Author> {
    let mut stmt = conn.prepare(&format!("{AUTHOR_SELECT_SQL} WHERE id = ?1;"))?;
    let mut rows = stmt.query([id])?;
    if let Some(row) = rows.next()? {
        return parse_author_row(conn, row);
    }
    Err(RepoError::AuthorNotFound(id))
}

fn parse_author_row(conn: &Connection, row: &Row<'_>) -> RepoResult<Author> {
    let id: AuthorId = row.get("id")?;
    Ok(Author {
        id,
        first_name: row.get("first_name")?,
        last_name: row.get("last_name")?,
        document_ids: load_id_set(conn, OWNED_DOCUMENTS_SQL, id)?,
    })
}
