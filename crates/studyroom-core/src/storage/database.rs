//! SQLite-backed snapshot storage.
//!
//! One row per user id holding the JSON-encoded [`UserSnapshot`] and the
//! time it was written.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::snapshot::UserSnapshot;
use super::SnapshotStore;
use crate::error::DatabaseError;

/// Row metadata for listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRow {
    pub user_id: String,
    pub saved_at: DateTime<Utc>,
    pub bytes: usize,
}

/// SQLite database for snapshot storage.
pub struct SnapshotDb {
    conn: Mutex<Connection>,
}

impl SnapshotDb {
    /// Open (or create) the database at `path`.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        let conn = Connection::open(path).map_err(|source| DatabaseError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::with_connection(conn)
    }

    /// Open an in-memory database (for tests and dry runs).
    pub fn open_memory() -> Result<Self, DatabaseError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, DatabaseError> {
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic mid-write cannot leave SQLite itself inconsistent.
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn migrate(&self) -> Result<(), DatabaseError> {
        self.conn()
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS user_snapshots (
                    user_id   TEXT PRIMARY KEY,
                    snapshot  TEXT NOT NULL,
                    saved_at  TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_user_snapshots_saved_at ON user_snapshots(saved_at);",
            )
            .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))
    }

    /// Raw JSON for one user, if stored.
    pub fn get_raw(&self, user_id: &str) -> Result<Option<String>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT snapshot FROM user_snapshots WHERE user_id = ?1")?;
        let raw = stmt
            .query_row(params![user_id], |row| row.get::<_, String>(0))
            .optional()?;
        Ok(raw)
    }

    /// Store raw JSON for one user. Used by tooling and tests that need to
    /// plant documents the encoder would never produce.
    pub fn put_raw(&self, user_id: &str, json: &str, saved_at: DateTime<Utc>) -> Result<(), DatabaseError> {
        self.conn().execute(
            "INSERT OR REPLACE INTO user_snapshots (user_id, snapshot, saved_at) VALUES (?1, ?2, ?3)",
            params![user_id, json, saved_at.to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<SnapshotRow>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT user_id, saved_at, LENGTH(snapshot) FROM user_snapshots ORDER BY user_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (user_id, saved_at, bytes) = row?;
            let saved_at = DateTime::parse_from_rfc3339(&saved_at)
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_default();
            out.push(SnapshotRow {
                user_id,
                saved_at,
                bytes: usize::try_from(bytes).unwrap_or(0),
            });
        }
        Ok(out)
    }
}

impl SnapshotStore for SnapshotDb {
    fn load_all(&self) -> Result<(Vec<UserSnapshot>, usize), DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT user_id, snapshot FROM user_snapshots")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut snapshots = Vec::new();
        let mut skipped = 0;
        for row in rows {
            let (user_id, json) = row?;
            match UserSnapshot::decode(&json) {
                Ok(mut snapshot) => {
                    // The row key wins over whatever the document claims.
                    snapshot.user_id = user_id;
                    snapshots.push(snapshot);
                }
                Err(e) => {
                    tracing::warn!(user = %user_id, error = %e, "skipping undecodable snapshot");
                    skipped += 1;
                }
            }
        }
        Ok((snapshots, skipped))
    }

    fn save_all(&self, snapshots: &[UserSnapshot]) -> Result<(), DatabaseError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO user_snapshots (user_id, snapshot, saved_at) VALUES (?1, ?2, ?3)",
            )?;
            for snapshot in snapshots {
                let json = snapshot.encode().map_err(|source| DatabaseError::Encode {
                    user_id: snapshot.user_id.clone(),
                    source,
                })?;
                let saved_at = snapshot.last_save_timestamp.unwrap_or_else(Utc::now);
                stmt.execute(params![snapshot.user_id, json, saved_at.to_rfc3339()])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn remove(&self, user_id: &str) -> Result<(), DatabaseError> {
        self.conn()
            .execute("DELETE FROM user_snapshots WHERE user_id = ?1", params![user_id])?;
        Ok(())
    }
}
