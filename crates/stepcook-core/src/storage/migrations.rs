//! Database schema migrations for stepcook.
//!
//! Migrations are versioned and applied automatically when opening the database.
//! The `schema_version` table tracks the current migration version.

use rusqlite::{Connection, OptionalExtension, Result as SqliteResult};
use tracing::debug;

/// Current schema version.
///
/// Increment this when adding new migrations.
pub const SCHEMA_VERSION: i32 = 2;

/// Apply all pending migrations to bring the database to the current schema version.
///
/// # Errors
/// Returns an error if migration fails.
pub fn migrate(conn: &Connection) -> SqliteResult<()> {
    create_schema_version_table(conn)?;

    let current_version = get_schema_version(conn)?;

    if current_version < 1 {
        migrate_v1(conn)?;
    }
    if current_version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

fn create_schema_version_table(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );",
    )
}

/// Get the current schema version from the database.
///
/// Returns 0 if no version is set (initial database).
pub fn get_schema_version(conn: &Connection) -> SqliteResult<i32> {
    Ok(conn
        .query_row("SELECT version FROM schema_version", [], |row| {
            row.get::<_, i32>(0)
        })
        .optional()?
        .unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: i32) -> SqliteResult<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [version],
    )?;
    debug!(version, "applied schema migration");
    Ok(())
}

/// Migration v1: session snapshots.
///
/// One row per session holding the latest committed snapshot. The indexed
/// columns duplicate snapshot fields for filtering and the version guard.
fn migrate_v1(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS session_snapshots (
            session_id      TEXT PRIMARY KEY,
            recipe_id       TEXT NOT NULL,
            status          TEXT NOT NULL,
            sync_version    INTEGER NOT NULL,
            last_mutated_at TEXT NOT NULL,
            snapshot_json   TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_snapshots_status ON session_snapshots(status);
        CREATE INDEX IF NOT EXISTS idx_snapshots_mutated ON session_snapshots(last_mutated_at);",
    )?;
    set_schema_version(&tx, 1)?;
    tx.commit()
}

/// Migration v2: durable push queue.
///
/// Sessions whose local snapshot has not yet reached the remote store.
fn migrate_v2(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS pending_push (
            session_id TEXT PRIMARY KEY,
            queued_at  TEXT NOT NULL
        );",
    )?;
    set_schema_version(&tx, 2)?;
    tx.commit()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrate_fresh_database_to_latest() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master
                 WHERE type = 'table' AND name IN ('session_snapshots', 'pending_push')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 2);
    }

    #[test]
    fn migrate_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn migrate_from_v1_adds_push_queue() {
        let conn = Connection::open_in_memory().unwrap();
        create_schema_version_table(&conn).unwrap();
        migrate_v1(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), 1);

        migrate(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), 2);
        conn.execute(
            "INSERT INTO pending_push (session_id, queued_at) VALUES ('s', 'now')",
            [],
        )
        .unwrap();
    }
}
