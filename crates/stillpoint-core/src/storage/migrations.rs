//! Database schema migrations for stillpoint.
//!
//! Migrations are versioned and applied automatically when opening the database.
//! The `schema_version` table tracks the current migration version.

use rusqlite::{Connection, Result as SqliteResult};

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
    match conn.query_row("SELECT version FROM schema_version", [], |row| {
        row.get::<_, i32>(0)
    }) {
        Ok(v) => Ok(v),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
        Err(e) => Err(e),
    }
}

fn set_schema_version(conn: &Connection, version: i32) -> SqliteResult<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [version],
    )?;
    Ok(())
}

/// Migration v1: techniques, sessions, mastery records, history, streaks.
fn migrate_v1(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS techniques (
            id          TEXT PRIMARY KEY,
            user_id     TEXT NOT NULL,
            name        TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS sessions (
            id                TEXT PRIMARY KEY,
            technique_id      TEXT NOT NULL REFERENCES techniques(id) ON DELETE CASCADE,
            user_id           TEXT NOT NULL,
            duration_minutes  REAL NOT NULL CHECK (duration_minutes > 0),
            occurred_at       TEXT NOT NULL,
            source            TEXT NOT NULL,
            bonus_streak      INTEGER NOT NULL DEFAULT 0,
            effective_minutes REAL NOT NULL
        );

        CREATE TABLE IF NOT EXISTS mastery_records (
            technique_id                 TEXT PRIMARY KEY REFERENCES techniques(id) ON DELETE CASCADE,
            user_id                      TEXT NOT NULL,
            cumulative_effective_minutes REAL NOT NULL CHECK (cumulative_effective_minutes >= 0),
            mastery_score                REAL NOT NULL,
            streak                       INTEGER NOT NULL DEFAULT 0,
            last_practiced_at            TEXT,
            last_decay_applied_at        TEXT,
            updated_at                   TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS mastery_history (
            id                           INTEGER PRIMARY KEY AUTOINCREMENT,
            technique_id                 TEXT NOT NULL REFERENCES techniques(id) ON DELETE CASCADE,
            user_id                      TEXT NOT NULL,
            recorded_at                  TEXT NOT NULL,
            mastery_score                REAL NOT NULL,
            cumulative_effective_minutes REAL NOT NULL
        );

        CREATE TABLE IF NOT EXISTS practitioners (
            user_id           TEXT PRIMARY KEY,
            streak            INTEGER NOT NULL DEFAULT 0,
            last_practiced_on TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_techniques_user ON techniques(user_id);
        CREATE INDEX IF NOT EXISTS idx_sessions_user_occurred ON sessions(user_id, occurred_at);
        CREATE INDEX IF NOT EXISTS idx_sessions_technique ON sessions(technique_id);
        CREATE INDEX IF NOT EXISTS idx_mastery_records_user ON mastery_records(user_id);",
    )?;

    set_schema_version(&tx, 1)?;
    tx.commit()
}

/// Migration v2: record why each history point was written.
///
/// Existing points predate decay and corrections, so they are all sessions.
fn migrate_v2(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;

    tx.execute_batch(
        "ALTER TABLE mastery_history ADD COLUMN cause TEXT NOT NULL DEFAULT 'session';
         CREATE INDEX IF NOT EXISTS idx_mastery_history_technique
             ON mastery_history(technique_id, recorded_at);",
    )?;

    set_schema_version(&tx, 2)?;
    tx.commit()
}
