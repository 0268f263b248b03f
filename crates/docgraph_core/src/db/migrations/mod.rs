//! Versioned schema for the document graph and its message queue.
//!
//! # Responsibility
//! - Own the ordered list of schema steps shipped with this binary.
//! - Bring a connection from its stamped version up to the latest one.
//!
//! # Invariants
//! - Step versions start at 1 and increase by exactly one.
//! - All pending steps and their `PRAGMA user_version` stamps commit in one
//!   transaction; a failed upgrade leaves the previous version in place.
//! - A database stamped newer than this binary is never touched.

use crate::db::{DbError, DbResult};
use log::info;
use rusqlite::Connection;

struct SchemaStep {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const SCHEMA_STEPS: &[SchemaStep] = &[
    SchemaStep {
        version: 1,
        name: "init",
        sql: include_str!("0001_init.sql"),
    },
    SchemaStep {
        version: 2,
        name: "cascade_messages",
        sql: include_str!("0002_cascade_messages.sql"),
    },
    SchemaStep {
        version: 3,
        name: "message_claims",
        sql: include_str!("0003_message_claims.sql"),
    },
];

/// Returns the newest schema version this binary can produce.
pub fn latest_version() -> u32 {
    SCHEMA_STEPS.last().map_or(0, |step| step.version)
}

/// Upgrades `conn` to [`latest_version`] and returns how many steps ran.
///
/// # Errors
/// - `UnsupportedSchemaVersion` when the database is newer than the binary.
/// - `Sqlite` when a step fails; nothing from this call is kept.
pub fn apply_migrations(conn: &mut Connection) -> DbResult<usize> {
    let from_version = current_user_version(conn)?;
    let latest = latest_version();
    if from_version > latest {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version: from_version,
            latest_supported: latest,
        });
    }

    let pending = SCHEMA_STEPS
        .iter()
        .filter(|step| step.version > from_version)
        .collect::<Vec<_>>();
    if pending.is_empty() {
        return Ok(0);
    }

    let tx = conn.transaction()?;
    for step in &pending {
        tx.execute_batch(step.sql)?;
        tx.pragma_update(None, "user_version", step.version)?;
    }
    tx.commit()?;

    let names = pending.iter().map(|step| step.name).collect::<Vec<_>>();
    info!(
        "event=db_migrate module=db status=ok from_version={} to_version={} steps={}",
        from_version,
        latest,
        names.join(",")
    );
    Ok(pending.len())
}

/// Reads the schema version stamped on the connection.
pub fn current_user_version(conn: &Connection) -> DbResult<u32> {
    let version = conn.query_row("PRAGMA user_version;", [], |row| row.get::<_, u32>(0))?;
    Ok(version)
}
