//! Database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.
//! Every statement is guarded with `IF NOT EXISTS`, so initialization can run
//! on every process start.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: append-only session log
    r#"
    CREATE TABLE IF NOT EXISTS apps (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        app_name         TEXT,
        window_name      TEXT,
        additional_info  TEXT,
        start_time       INTEGER NOT NULL,
        end_time         INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_apps_end_time ON apps(end_time);
    "#,
    // Version 2: process-wide durable state (credential, cursor, policies)
    r#"
    CREATE TABLE IF NOT EXISTS local_state (
        key              TEXT PRIMARY KEY,
        value            TEXT NOT NULL,
        updated_at       INTEGER NOT NULL
    );
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;

    tracing::debug!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking database migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)?;
            conn.execute_batch(&format!("PRAGMA user_version = {}", version))?;
        }
    }

    if current_version < SCHEMA_VERSION {
        tracing::info!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Migrations complete"
        );
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        // Run migrations twice - should be idempotent
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version = get_schema_version(&conn).unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_tables_created() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        for table in ["apps", "local_state"] {
            let exists: i32 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?",
                    [table],
                    |r| r.get(0),
                )
                .unwrap();
            assert_eq!(exists, 1, "Table {} should exist", table);
        }
    }

    #[test]
    fn test_existing_table_is_adopted() {
        // A log created before versioning existed must survive initialization
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE apps ( id INTEGER PRIMARY KEY AUTOINCREMENT, app_name TEXT, \
             window_name TEXT, additional_info TEXT, start_time INTEGER NOT NULL, \
             end_time INTEGER NOT NULL );
             INSERT INTO apps (app_name, window_name, additional_info, start_time, end_time)
             VALUES ('code', 'main.rs', '', 1, 2);",
        )
        .unwrap();

        run_migrations(&conn).unwrap();

        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM apps", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, 1);
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }
}
