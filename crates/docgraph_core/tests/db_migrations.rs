use docgraph_core::db::migrations::{apply_migrations, latest_version};
use docgraph_core::db::{open_db, open_db_in_memory, DbError};
use rusqlite::Connection;

#[test]
fn open_db_in_memory_applies_all_migrations() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn), latest_version());
    assert_table_exists(&conn, "authors");
    assert_table_exists(&conn, "documents");
    assert_table_exists(&conn, "document_authors");
    assert_table_exists(&conn, "document_references");
    assert_table_exists(&conn, "cascade_messages");
}

#[test]
fn opening_same_database_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("docgraph.db");

    let conn_first = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_first), latest_version());
    drop(conn_first);

    let conn_second = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_second), latest_version());
    assert_table_exists(&conn_second, "cascade_messages");
}

#[test]
fn opening_database_with_newer_schema_version_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    let err = open_db(&path).unwrap_err();
    match err {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn foreign_keys_are_enforced() {
    let conn = open_db_in_memory().unwrap();
    let enabled: i64 = conn
        .query_row("PRAGMA foreign_keys;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(enabled, 1);

    let err = conn
        .execute(
            "INSERT INTO document_authors (document_id, author_id) VALUES (1, 1);",
            [],
        )
        .unwrap_err();
    assert!(err.to_string().contains("FOREIGN KEY"));
}

#[test]
fn self_reference_edges_are_rejected_by_schema() {
    let conn = open_db_in_memory().unwrap();
    conn.execute(
        "INSERT INTO documents (title, body) VALUES ('t', 'b');",
        [],
    )
    .unwrap();
    let id = conn.last_insert_rowid();

    let err = conn
        .execute(
            "INSERT INTO document_references (document_id, reference_id) VALUES (?1, ?1);",
            [id],
        )
        .unwrap_err();
    assert!(err.to_string().contains("CHECK"));
}

#[test]
fn queue_rows_survive_the_claim_upgrade() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("v2.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(include_str!("../src/db/migrations/0001_init.sql"))
        .unwrap();
    conn.execute_batch(include_str!("../src/db/migrations/0002_cascade_messages.sql"))
        .unwrap();
    conn.execute_batch("PRAGMA user_version = 2;").unwrap();
    conn.execute(
        "INSERT INTO cascade_messages (message_id, topic, payload, attempts, seq)
         VALUES ('m-1', 'author-cascade', '{\"authorId\":1}', 2, 1);",
        [],
    )
    .unwrap();
    drop(conn);

    let mut conn = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn), latest_version());
    let (status, attempts, claimed_at): (String, u32, Option<i64>) = conn
        .query_row(
            "SELECT status, attempts, claimed_at FROM cascade_messages WHERE message_id = 'm-1';",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .unwrap();
    assert_eq!(status, "pending");
    assert_eq!(attempts, 2);
    assert_eq!(claimed_at, None);

    let err = conn
        .execute(
            "UPDATE cascade_messages SET status = 'inflight' WHERE message_id = 'm-1';",
            [],
        )
        .unwrap_err();
    assert!(err.to_string().contains("CHECK"), "in-flight rows need a claim time");

    assert_eq!(apply_migrations(&mut conn).unwrap(), 0);
}

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}

fn assert_table_exists(conn: &Connection, table_name: &str) {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table_name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 1, "table {table_name} does not exist");
}
