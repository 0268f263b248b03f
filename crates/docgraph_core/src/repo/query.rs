//! Listing queries and page envelopes shared by author and document stores.
//!
//! # Invariants
//! - Page size is clamped to `1..=PAGE_SIZE_MAX`; `None` or `0` yields the default.
//! - Two text filters combine with AND when both are set, OR when only one is.

use rusqlite::types::Value;
use serde::Serialize;

pub const PAGE_SIZE_DEFAULT: u32 = 20;
pub const PAGE_SIZE_MAX: u32 = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    /// Parses `asc`/`desc` case-insensitively; anything else sorts ascending.
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("desc") {
            Self::Desc
        } else {
            Self::Asc
        }
    }

    fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorSortField {
    #[default]
    Id,
    FirstName,
    LastName,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentSortField {
    #[default]
    Id,
    Title,
    Body,
}

/// Applied sort reported back in page envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SortSpec<F> {
    pub field: F,
    pub direction: SortDirection,
}

/// Author listing query.
#[derive(Debug, Clone, Default)]
pub struct AuthorListQuery {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    /// Zero-based page number.
    pub page: u32,
    pub size: Option<u32>,
    pub sort_by: AuthorSortField,
    pub direction: SortDirection,
}

/// Document listing query.
#[derive(Debug, Clone, Default)]
pub struct DocumentListQuery {
    pub title: Option<String>,
    pub body: Option<String>,
    /// Zero-based page number.
    pub page: u32,
    pub size: Option<u32>,
    pub sort_by: DocumentSortField,
    pub direction: SortDirection,
}

/// One page of results plus pagination metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T, F> {
    pub items: Vec<T>,
    pub page: u32,
    pub size: u32,
    pub number_of_elements: u32,
    pub total_elements: u64,
    pub total_pages: u64,
    pub sort: SortSpec<F>,
}

impl<T, F> Page<T, F> {
    pub(crate) fn new(
        items: Vec<T>,
        page: u32,
        size: u32,
        total_elements: u64,
        sort: SortSpec<F>,
    ) -> Self {
        let total_pages = total_elements.div_ceil(u64::from(size));
        Self {
            number_of_elements: items.len() as u32,
            items,
            page,
            size,
            total_elements,
            total_pages,
            sort,
        }
    }
}

/// Normalizes a requested page size according to the listing contract.
pub fn normalize_page_size(size: Option<u32>) -> u32 {
    match size {
        None | Some(0) => PAGE_SIZE_DEFAULT,
        Some(value) if value > PAGE_SIZE_MAX => PAGE_SIZE_MAX,
        Some(value) => value,
    }
}

pub(crate) fn author_sort_column(field: AuthorSortField) -> &'static str {
    match field {
        AuthorSortField::Id => "id",
        AuthorSortField::FirstName => "first_name",
        AuthorSortField::LastName => "last_name",
    }
}

pub(crate) fn document_sort_column(field: DocumentSortField) -> &'static str {
    match field {
        DocumentSortField::Id => "id",
        DocumentSortField::Title => "title",
        DocumentSortField::Body => "body",
    }
}

/// Builds the `WHERE` fragment for a pair of exact-match text filters.
pub(crate) fn pair_filter(
    columns: (&str, &str),
    values: (Option<&String>, Option<&String>),
) -> (String, Vec<Value>) {
    match values {
        (Some(left), Some(right)) => (
            format!(" WHERE {} = ? AND {} = ?", columns.0, columns.1),
            vec![Value::Text(left.clone()), Value::Text(right.clone())],
        ),
        (Some(left), None) => (
            format!(" WHERE {} = ?", columns.0),
            vec![Value::Text(left.clone())],
        ),
        (None, Some(right)) => (
            format!(" WHERE {} = ?", columns.1),
            vec![Value::Text(right.clone())],
        ),
        (None, None) => (String::new(), Vec::new()),
    }
}

/// Builds `ORDER BY ... LIMIT ? OFFSET ?` with a stable id tiebreaker.
pub(crate) fn order_and_page(
    column: &str,
    direction: SortDirection,
    page: u32,
    size: u32,
    bind_values: &mut Vec<Value>,
) -> String {
    bind_values.push(Value::Integer(i64::from(size)));
    bind_values.push(Value::Integer(i64::from(page) * i64::from(size)));
    format!(
        " ORDER BY {column} {}, id ASC LIMIT ? OFFSET ?",
        direction.as_sql()
    )
}

#[cfg(test)]
mod tests {
    use super::{
        normalize_page_size, pair_filter, SortDirection, PAGE_SIZE_DEFAULT, PAGE_SIZE_MAX,
    };

    #[test]
    fn page_size_is_clamped() {
        assert_eq!(normalize_page_size(None), PAGE_SIZE_DEFAULT);
        assert_eq!(normalize_page_size(Some(0)), PAGE_SIZE_DEFAULT);
        assert_eq!(normalize_page_size(Some(7)), 7);
        assert_eq!(normalize_page_size(Some(10_000)), PAGE_SIZE_MAX);
    }

    #[test]
    fn direction_parse_defaults_to_ascending() {
        assert_eq!(SortDirection::parse("DESC"), SortDirection::Desc);
        assert_eq!(SortDirection::parse("sideways"), SortDirection::Asc);
    }

    #[test]
    fn single_filter_matches_one_column() {
        let title = "Graphs".to_string();
        let (clause, values) = pair_filter(("title", "body"), (Some(&title), None));
        assert_eq!(clause, " WHERE title = ?");
        assert_eq!(values.len(), 1);

        let (clause, values) = pair_filter(("title", "body"), (None, None));
        assert!(clause.is_empty());
        assert!(values.is_empty());
    }
}
