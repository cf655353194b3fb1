//! Database repository layer
//!
//! Provides the append-only session log and the raw key/value store used for
//! process-wide state.

use crate::error::{Result, StoreError};
use crate::types::{PersistedSession, Session};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Database handle (single connection shared behind a mutex)
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // WAL keeps readers (status CLI) from blocking the tracker's writes
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.connection();
        super::schema::run_migrations(&conn)
    }

    /// Get the underlying connection (for advanced use)
    ///
    /// A poisoned lock is recovered: every statement runs in its own implicit
    /// transaction, so a panic mid-call cannot leave partial writes behind.
    pub fn connection(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ============================================
    // Session log
    // ============================================

    /// Append a finalized session, returning its row id.
    pub fn append_session(&self, session: &Session) -> std::result::Result<i64, StoreError> {
        let end_time = session.end_time.ok_or_else(|| {
            StoreError::InvalidSession("session is still open (no end time)".to_string())
        })?;
        if session.start_time <= 0 || end_time <= 0 {
            return Err(StoreError::InvalidSession(format!(
                "non-positive timestamps (start={}, end={})",
                session.start_time, end_time
            )));
        }
        if end_time < session.start_time {
            return Err(StoreError::InvalidSession(format!(
                "end {} precedes start {}",
                end_time, session.start_time
            )));
        }

        let conn = self.connection();
        conn.execute(
            r#"
            INSERT INTO apps (id, app_name, window_name, additional_info, start_time, end_time)
            VALUES (NULL, ?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                session.application_name,
                session.window_title,
                session.extra_info,
                session.start_time,
                end_time,
            ],
        )
        .map_err(|e| StoreError::WriteFailed(e.to_string()))?;

        Ok(conn.last_insert_rowid())
    }

    /// Sessions whose end time is strictly after `cursor`, in insertion order.
    ///
    /// At most `limit` rows are returned; the rest stay pending for the next call.
    pub fn sessions_since(
        &self,
        cursor: i64,
        limit: usize,
    ) -> std::result::Result<Vec<PersistedSession>, StoreError> {
        let conn = self.connection();
        let mut stmt = conn
            .prepare(
                r#"
                SELECT id, app_name, window_name, additional_info, start_time, end_time
                FROM apps
                WHERE end_time > ?1
                ORDER BY id ASC
                LIMIT ?2
                "#,
            )
            .map_err(|e| StoreError::ReadFailed(e.to_string()))?;

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt
            .query_map(params![cursor, limit], Self::row_to_session)
            .map_err(|e| StoreError::ReadFailed(e.to_string()))?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| StoreError::ReadFailed(e.to_string()))
    }

    /// Every session ending in `(cursor, through]`, in insertion order, unbounded.
    pub fn sessions_through(
        &self,
        cursor: i64,
        through: i64,
    ) -> std::result::Result<Vec<PersistedSession>, StoreError> {
        let conn = self.connection();
        let mut stmt = conn
            .prepare(
                r#"
                SELECT id, app_name, window_name, additional_info, start_time, end_time
                FROM apps
                WHERE end_time > ?1 AND end_time <= ?2
                ORDER BY id ASC
                "#,
            )
            .map_err(|e| StoreError::ReadFailed(e.to_string()))?;

        let rows = stmt
            .query_map(params![cursor, through], Self::row_to_session)
            .map_err(|e| StoreError::ReadFailed(e.to_string()))?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| StoreError::ReadFailed(e.to_string()))
    }

    /// Number of sessions still waiting behind `cursor`.
    pub fn count_sessions_since(&self, cursor: i64) -> std::result::Result<i64, StoreError> {
        let conn = self.connection();
        conn.query_row(
            "SELECT COUNT(*) FROM apps WHERE end_time > ?1",
            [cursor],
            |row| row.get(0),
        )
        .map_err(|e| StoreError::ReadFailed(e.to_string()))
    }

    /// Total number of stored sessions.
    pub fn count_sessions(&self) -> std::result::Result<i64, StoreError> {
        self.count_sessions_since(i64::MIN)
    }

    fn row_to_session(row: &Row) -> rusqlite::Result<PersistedSession> {
        Ok(PersistedSession {
            id: row.get("id")?,
            application_name: row.get::<_, Option<String>>("app_name")?.unwrap_or_default(),
            window_title: row
                .get::<_, Option<String>>("window_name")?
                .unwrap_or_default(),
            extra_info: row
                .get::<_, Option<String>>("additional_info")?
                .unwrap_or_default(),
            start_time: row.get("start_time")?,
            end_time: row.get("end_time")?,
        })
    }

    // ============================================
    // Key/value state
    // ============================================

    /// Read a raw state value
    pub fn get_state(&self, key: &str) -> Result<Option<String>> {
        let conn = self.connection();
        let value = conn
            .query_row(
                "SELECT value FROM local_state WHERE key = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Insert or replace a raw state value
    pub fn set_state(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.connection();
        conn.execute(
            r#"
            INSERT INTO local_state (key, value, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
            params![key, value, chrono::Utc::now().timestamp_millis()],
        )?;
        Ok(())
    }

    /// Write several state values atomically
    pub fn set_states(&self, entries: &[(&str, String)]) -> Result<()> {
        let mut conn = self.connection();
        let tx = conn.transaction()?;
        let now = chrono::Utc::now().timestamp_millis();
        for (key, value) in entries {
            tx.execute(
                r#"
                INSERT INTO local_state (key, value, updated_at)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = excluded.updated_at
                "#,
                params![key, value, now],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Remove a state value; missing keys are not an error
    pub fn delete_state(&self, key: &str) -> Result<()> {
        let conn = self.connection();
        conn.execute("DELETE FROM local_state WHERE key = ?1", [key])?;
        Ok(())
    }

    /// All state entries whose key starts with `prefix`, sorted by key
    pub fn states_with_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        let conn = self.connection();
        let mut stmt = conn.prepare(
            "SELECT key, value FROM local_state WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key",
        )?;
        let rows = stmt
            .query_map([prefix], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}
