//! SQLite-based session snapshot storage.
//!
//! Provides persistent storage for:
//! - The latest snapshot of every cooking session, active or finished
//! - The queue of sessions still waiting to be pushed to the remote store
//!
//! Writes are version-guarded: a snapshot replaces the stored one only when
//! its `sync_version` is strictly greater. A finished (completed or
//! abandoned) session can only be re-stamped with a new version, never
//! changed.

use chrono::{SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use tracing::{debug, warn};

use super::migrations;
use crate::error::{CoreError, DatabaseError, Result};
use crate::session::{CookingSession, SessionStatus};

/// Which sessions [`SessionDb::list`] returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionFilter {
    #[default]
    All,
    Active,
    Terminal,
}

/// SQLite database for session snapshots.
pub struct SessionDb {
    conn: Connection,
}

impl SessionDb {
    /// Open (or create) the database at `path` and apply migrations.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|source| DatabaseError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::with_connection(conn)
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        migrations::migrate(&conn)
            .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
        Ok(Self { conn })
    }

    /// Version-guarded upsert of a snapshot.
    ///
    /// When `queue_push` is set the session is also recorded in the push
    /// queue, in the same transaction.
    ///
    /// # Errors
    /// `VersionConflict` if a snapshot with an equal or higher version is
    /// already stored; the stored row is left untouched.
    pub fn upsert_snapshot(&self, session: &CookingSession, queue_push: bool) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;

        let stored: Option<(u64, String, String)> = tx
            .query_row(
                "SELECT sync_version, status, snapshot_json
                 FROM session_snapshots WHERE session_id = ?1",
                params![session.session_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        if let Some((stored, status, stored_json)) = stored {
            if session.sync_version <= stored {
                warn!(
                    session_id = %session.session_id,
                    attempted = session.sync_version,
                    stored,
                    "rejected stale snapshot"
                );
                return Err(CoreError::VersionConflict {
                    session_id: session.session_id.clone(),
                    attempted: session.sync_version,
                    stored,
                });
            }

            let status = SessionStatus::parse(&status).ok_or_else(|| {
                DatabaseError::QueryFailed(format!("unknown session status '{status}'"))
            })?;
            if status.is_terminal() {
                let finished: CookingSession = serde_json::from_str(&stored_json)?;
                if !finished.same_state(session) {
                    warn!(
                        session_id = %session.session_id,
                        status = status.as_str(),
                        "rejected write to finished session"
                    );
                    return Err(CoreError::invalid_state("update session", status.as_str()));
                }
            }
        }

        let json = serde_json::to_string(session)?;
        tx.execute(
            "INSERT INTO session_snapshots
                (session_id, recipe_id, status, sync_version, last_mutated_at, snapshot_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(session_id) DO UPDATE SET
                recipe_id = excluded.recipe_id,
                status = excluded.status,
                sync_version = excluded.sync_version,
                last_mutated_at = excluded.last_mutated_at,
                snapshot_json = excluded.snapshot_json",
            params![
                session.session_id,
                session.recipe_id,
                session.status.as_str(),
                session.sync_version,
                session
                    .last_mutated_at
                    .to_rfc3339_opts(SecondsFormat::Micros, true),
                json,
            ],
        )?;

        if queue_push {
            tx.execute(
                "INSERT OR REPLACE INTO pending_push (session_id, queued_at) VALUES (?1, ?2)",
                params![session.session_id, Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)],
            )?;
        }

        tx.commit()?;
        debug!(
            session_id = %session.session_id,
            sync_version = session.sync_version,
            "stored session snapshot"
        );
        Ok(())
    }

    pub fn load(&self, session_id: &str) -> Result<Option<CookingSession>> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT snapshot_json FROM session_snapshots WHERE session_id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .optional()?;
        json.map(|j| serde_json::from_str(&j).map_err(CoreError::from))
            .transpose()
    }

    /// Stored snapshots, most recently mutated first.
    pub fn list(&self, filter: SessionFilter) -> Result<Vec<CookingSession>> {
        let completed = SessionStatus::Completed.as_str();
        let abandoned = SessionStatus::Abandoned.as_str();
        let (sql, terminal): (&str, Option<[&str; 2]>) = match filter {
            SessionFilter::All => (
                "SELECT snapshot_json FROM session_snapshots
                 ORDER BY last_mutated_at DESC",
                None,
            ),
            SessionFilter::Active => (
                "SELECT snapshot_json FROM session_snapshots
                 WHERE status NOT IN (?1, ?2)
                 ORDER BY last_mutated_at DESC",
                Some([completed, abandoned]),
            ),
            SessionFilter::Terminal => (
                "SELECT snapshot_json FROM session_snapshots
                 WHERE status IN (?1, ?2)
                 ORDER BY last_mutated_at DESC",
                Some([completed, abandoned]),
            ),
        };

        let mut stmt = self.conn.prepare(sql)?;
        let rows: Vec<String> = match terminal {
            Some(statuses) => stmt
                .query_map(params![statuses[0], statuses[1]], |row| row.get(0))?
                .collect::<rusqlite::Result<_>>()?,
            None => stmt
                .query_map([], |row| row.get(0))?
                .collect::<rusqlite::Result<_>>()?,
        };

        rows.iter()
            .map(|json| serde_json::from_str(json).map_err(CoreError::from))
            .collect()
    }

    pub fn stored_version(&self, session_id: &str) -> Result<Option<u64>> {
        Ok(self
            .conn
            .query_row(
                "SELECT sync_version FROM session_snapshots WHERE session_id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .optional()?)
    }

    // ── Push queue ───────────────────────────────────────────────────

    pub fn enqueue_push(&self, session_id: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO pending_push (session_id, queued_at) VALUES (?1, ?2)",
            params![session_id, Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)],
        )?;
        Ok(())
    }

    pub fn clear_push(&self, session_id: &str) -> Result<()> {
        self.conn.execute(
            "DELETE FROM pending_push WHERE session_id = ?1",
            params![session_id],
        )?;
        Ok(())
    }

    /// Queued session ids, oldest first.
    pub fn pending_pushes(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT session_id FROM pending_push ORDER BY queued_at ASC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    pub fn pending_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM pending_push", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}
