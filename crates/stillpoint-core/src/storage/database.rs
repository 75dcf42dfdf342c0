//! SQLite-based technique, session and mastery storage.
//!
//! Provides persistent storage for:
//! - The user's technique library
//! - Logged practice sessions
//! - One mastery record per technique, plus its append-only history
//! - The user-wide streak
//!
//! Writes that touch a mastery record go through [`Database::immediate`] so
//! the record and its history point commit or roll back together.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{data_dir, migrations};
use crate::error::{CoreError, DatabaseError, Result};
use crate::mastery::{mastery_score, StreakState};

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Technique {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// How a session was captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionSource {
    /// Completed with the built-in timer
    Timer,
    /// Entered by hand after the fact
    Manual,
}

impl SessionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionSource::Timer => "timer",
            SessionSource::Manual => "manual",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "timer" => Some(SessionSource::Timer),
            "manual" => Some(SessionSource::Manual),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEntry {
    pub id: String,
    pub technique_id: String,
    pub user_id: String,
    pub duration_minutes: f64,
    pub occurred_at: DateTime<Utc>,
    pub source: SessionSource,
    /// Streak value that was applied to this session's multiplier
    pub bonus_streak: u32,
    /// Contribution folded into the technique's mastery record
    pub effective_minutes: f64,
}

/// Current mastery state for one (user, technique) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasteryRecord {
    pub user_id: String,
    pub technique_id: String,
    pub cumulative_effective_minutes: f64,
    pub mastery_score: f64,
    /// User-wide streak as of the last write to this record (session,
    /// correction or decay run)
    pub streak: u32,
    pub last_practiced_at: Option<DateTime<Utc>>,
    pub last_decay_applied_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl MasteryRecord {
    /// A record with no practice folded in yet.
    pub fn new(user_id: &str, technique_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.to_string(),
            technique_id: technique_id.to_string(),
            cumulative_effective_minutes: 0.0,
            mastery_score: mastery_score(0.0),
            streak: 0,
            last_practiced_at: None,
            last_decay_applied_at: None,
            updated_at: now,
        }
    }

    /// Replace the cumulative minutes and recompute the score from them.
    pub fn set_cumulative(&mut self, cumulative: f64) {
        self.cumulative_effective_minutes = cumulative.max(0.0);
        self.mastery_score = mastery_score(self.cumulative_effective_minutes);
    }
}

/// Why a history point was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryCause {
    Session,
    Decay,
    /// A session was edited or deleted
    Correction,
}

impl HistoryCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryCause::Session => "session",
            HistoryCause::Decay => "decay",
            HistoryCause::Correction => "correction",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "session" => Some(HistoryCause::Session),
            "decay" => Some(HistoryCause::Decay),
            "correction" => Some(HistoryCause::Correction),
            _ => None,
        }
    }
}

/// Snapshot of a mastery record, written after every change to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasteryHistoryPoint {
    pub id: i64,
    pub technique_id: String,
    pub user_id: String,
    pub recorded_at: DateTime<Utc>,
    pub mastery_score: f64,
    pub cumulative_effective_minutes: f64,
    pub cause: HistoryCause,
}

fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error(idx: usize, ty: Type, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, ty, message.into())
}

fn parse_ts(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, Type::Text, format!("bad timestamp '{raw}': {e}")))
}

fn parse_opt_ts(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(_) => parse_ts(row, idx).map(Some),
        None => Ok(None),
    }
}

fn parse_opt_date(row: &Row, idx: usize) -> rusqlite::Result<Option<NaiveDate>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(raw) => NaiveDate::parse_from_str(&raw, DATE_FORMAT)
            .map(Some)
            .map_err(|e| conversion_error(idx, Type::Text, format!("bad date '{raw}': {e}"))),
        None => Ok(None),
    }
}

fn row_to_technique(row: &Row) -> rusqlite::Result<Technique> {
    Ok(Technique {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        created_at: parse_ts(row, 4)?,
    })
}

fn row_to_session(row: &Row) -> rusqlite::Result<SessionEntry> {
    let source: String = row.get(5)?;
    Ok(SessionEntry {
        id: row.get(0)?,
        technique_id: row.get(1)?,
        user_id: row.get(2)?,
        duration_minutes: row.get(3)?,
        occurred_at: parse_ts(row, 4)?,
        source: SessionSource::parse(&source).ok_or_else(|| {
            conversion_error(5, Type::Text, format!("unknown session source '{source}'"))
        })?,
        bonus_streak: row.get(6)?,
        effective_minutes: row.get(7)?,
    })
}

fn row_to_record(row: &Row) -> rusqlite::Result<MasteryRecord> {
    Ok(MasteryRecord {
        technique_id: row.get(0)?,
        user_id: row.get(1)?,
        cumulative_effective_minutes: row.get(2)?,
        mastery_score: row.get(3)?,
        streak: row.get(4)?,
        last_practiced_at: parse_opt_ts(row, 5)?,
        last_decay_applied_at: parse_opt_ts(row, 6)?,
        updated_at: parse_ts(row, 7)?,
    })
}

fn row_to_history(row: &Row) -> rusqlite::Result<MasteryHistoryPoint> {
    let cause: String = row.get(6)?;
    Ok(MasteryHistoryPoint {
        id: row.get(0)?,
        technique_id: row.get(1)?,
        user_id: row.get(2)?,
        recorded_at: parse_ts(row, 3)?,
        mastery_score: row.get(4)?,
        cumulative_effective_minutes: row.get(5)?,
        cause: HistoryCause::parse(&cause).ok_or_else(|| {
            conversion_error(6, Type::Text, format!("unknown history cause '{cause}'"))
        })?,
    })
}

const TECHNIQUE_COLUMNS: &str = "id, user_id, name, description, created_at";
const SESSION_COLUMNS: &str =
    "id, technique_id, user_id, duration_minutes, occurred_at, source, bonus_streak, effective_minutes";
const RECORD_COLUMNS: &str = "technique_id, user_id, cumulative_effective_minutes, mastery_score, \
     streak, last_practiced_at, last_decay_applied_at, updated_at";
const HISTORY_COLUMNS: &str =
    "id, technique_id, user_id, recorded_at, mastery_score, cumulative_effective_minutes, cause";

/// Row-level queries shared by plain reads and transactional writes.
///
/// Every function takes a `&Connection`, so the same code runs against the
/// database directly or inside a [`Transaction`].
pub mod rows {
    use super::*;

    pub fn technique(conn: &Connection, user_id: &str, id: &str) -> rusqlite::Result<Option<Technique>> {
        conn.query_row(
            &format!("SELECT {TECHNIQUE_COLUMNS} FROM techniques WHERE id = ?1 AND user_id = ?2"),
            params![id, user_id],
            row_to_technique,
        )
        .optional()
    }

    pub fn insert_session(conn: &Connection, session: &SessionEntry) -> rusqlite::Result<()> {
        conn.execute(
            &format!("INSERT INTO sessions ({SESSION_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
            params![
                session.id,
                session.technique_id,
                session.user_id,
                session.duration_minutes,
                format_ts(&session.occurred_at),
                session.source.as_str(),
                session.bonus_streak,
                session.effective_minutes,
            ],
        )?;
        Ok(())
    }

    pub fn session(conn: &Connection, user_id: &str, id: &str) -> rusqlite::Result<Option<SessionEntry>> {
        conn.query_row(
            &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1 AND user_id = ?2"),
            params![id, user_id],
            row_to_session,
        )
        .optional()
    }

    pub fn update_session(conn: &Connection, session: &SessionEntry) -> rusqlite::Result<()> {
        conn.execute(
            "UPDATE sessions SET duration_minutes = ?2, effective_minutes = ?3 WHERE id = ?1",
            params![session.id, session.duration_minutes, session.effective_minutes],
        )?;
        Ok(())
    }

    pub fn delete_session(conn: &Connection, id: &str) -> rusqlite::Result<()> {
        conn.execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// Start times of the user's sessions at or after `since`, oldest first.
    pub fn session_times_since(
        conn: &Connection,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> rusqlite::Result<Vec<DateTime<Utc>>> {
        let mut stmt = conn.prepare(
            "SELECT occurred_at FROM sessions WHERE user_id = ?1 AND occurred_at >= ?2
             ORDER BY occurred_at",
        )?;
        let mapped = stmt.query_map(params![user_id, format_ts(&since)], |row| parse_ts(row, 0))?;
        mapped.collect()
    }

    /// Latest session start strictly before `before`.
    pub fn last_session_before(
        conn: &Connection,
        user_id: &str,
        before: DateTime<Utc>,
    ) -> rusqlite::Result<Option<DateTime<Utc>>> {
        conn.query_row(
            "SELECT occurred_at FROM sessions WHERE user_id = ?1 AND occurred_at < ?2
             ORDER BY occurred_at DESC LIMIT 1",
            params![user_id, format_ts(&before)],
            |row| parse_ts(row, 0),
        )
        .optional()
    }

    pub fn record(
        conn: &Connection,
        user_id: &str,
        technique_id: &str,
    ) -> rusqlite::Result<Option<MasteryRecord>> {
        conn.query_row(
            &format!(
                "SELECT {RECORD_COLUMNS} FROM mastery_records WHERE technique_id = ?1 AND user_id = ?2"
            ),
            params![technique_id, user_id],
            row_to_record,
        )
        .optional()
    }

    pub fn records_for_user(conn: &Connection, user_id: &str) -> rusqlite::Result<Vec<MasteryRecord>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM mastery_records WHERE user_id = ?1 ORDER BY technique_id"
        ))?;
        let mapped = stmt.query_map(params![user_id], row_to_record)?;
        mapped.collect()
    }

    pub fn upsert_record(conn: &Connection, record: &MasteryRecord) -> rusqlite::Result<()> {
        conn.execute(
            &format!(
                "INSERT INTO mastery_records ({RECORD_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(technique_id) DO UPDATE SET
                     cumulative_effective_minutes = excluded.cumulative_effective_minutes,
                     mastery_score = excluded.mastery_score,
                     streak = excluded.streak,
                     last_practiced_at = excluded.last_practiced_at,
                     last_decay_applied_at = excluded.last_decay_applied_at,
                     updated_at = excluded.updated_at"
            ),
            params![
                record.technique_id,
                record.user_id,
                record.cumulative_effective_minutes,
                record.mastery_score,
                record.streak,
                record.last_practiced_at.as_ref().map(format_ts),
                record.last_decay_applied_at.as_ref().map(format_ts),
                format_ts(&record.updated_at),
            ],
        )?;
        Ok(())
    }

    /// Latest history timestamp for a technique, if any.
    pub fn last_history_at(conn: &Connection, technique_id: &str) -> rusqlite::Result<Option<DateTime<Utc>>> {
        conn.query_row(
            "SELECT recorded_at FROM mastery_history WHERE technique_id = ?1
             ORDER BY recorded_at DESC, id DESC LIMIT 1",
            params![technique_id],
            |row| parse_ts(row, 0),
        )
        .optional()
    }

    /// Append a snapshot of `record`.
    pub fn append_history(
        conn: &Connection,
        record: &MasteryRecord,
        recorded_at: DateTime<Utc>,
        cause: HistoryCause,
    ) -> rusqlite::Result<i64> {
        conn.execute(
            "INSERT INTO mastery_history
                 (technique_id, user_id, recorded_at, mastery_score, cumulative_effective_minutes, cause)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.technique_id,
                record.user_id,
                format_ts(&recorded_at),
                record.mastery_score,
                record.cumulative_effective_minutes,
                cause.as_str(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn streak(conn: &Connection, user_id: &str) -> rusqlite::Result<StreakState> {
        let state = conn
            .query_row(
                "SELECT streak, last_practiced_on FROM practitioners WHERE user_id = ?1",
                params![user_id],
                |row| Ok(StreakState::new(row.get(0)?, parse_opt_date(row, 1)?)),
            )
            .optional()?;
        Ok(state.unwrap_or_default())
    }

    pub fn save_streak(conn: &Connection, user_id: &str, state: &StreakState) -> rusqlite::Result<()> {
        conn.execute(
            "INSERT INTO practitioners (user_id, streak, last_practiced_on) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE SET
                 streak = excluded.streak,
                 last_practiced_on = excluded.last_practiced_on",
            params![
                user_id,
                state.streak,
                state
                    .last_practiced_on
                    .map(|d| d.format(DATE_FORMAT).to_string()),
            ],
        )?;
        Ok(())
    }
}

/// SQLite database for the mastery engine.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Get a reference to the underlying SQLite connection.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Open the database at `~/.config/stillpoint/stillpoint.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self> {
        let path = data_dir()?.join("stillpoint.db");
        Self::open_at(&path)
    }

    /// Open (or create) the database at `path`.
    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|source| DatabaseError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::init(conn)
    }

    /// Open an in-memory database (for tests).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        migrations::migrate(&conn)
            .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
        Ok(Self { conn })
    }

    /// Run `f` inside a `BEGIN IMMEDIATE` transaction.
    ///
    /// The write lock is taken up front, so concurrent writers to the same
    /// file serialize instead of failing at commit. Any error from `f` rolls
    /// the whole transaction back.
    pub fn immediate<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    // === Technique library ===

    pub fn create_technique(&self, technique: &Technique) -> Result<()> {
        self.conn.execute(
            &format!("INSERT INTO techniques ({TECHNIQUE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5)"),
            params![
                technique.id,
                technique.user_id,
                technique.name,
                technique.description,
                format_ts(&technique.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn technique(&self, user_id: &str, id: &str) -> Result<Option<Technique>> {
        Ok(rows::technique(&self.conn, user_id, id)?)
    }

    pub fn list_techniques(&self, user_id: &str) -> Result<Vec<Technique>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {TECHNIQUE_COLUMNS} FROM techniques WHERE user_id = ?1 ORDER BY created_at, name"
        ))?;
        let mapped = stmt.query_map(params![user_id], row_to_technique)?;
        Ok(mapped.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Delete a technique together with its sessions, record and history.
    pub fn delete_technique(&self, user_id: &str, id: &str) -> Result<()> {
        let deleted = self.conn.execute(
            "DELETE FROM techniques WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
        )?;
        if deleted == 0 {
            return Err(CoreError::technique_not_found(user_id, id));
        }
        Ok(())
    }

    // === Sessions ===

    pub fn session(&self, user_id: &str, id: &str) -> Result<Option<SessionEntry>> {
        Ok(rows::session(&self.conn, user_id, id)?)
    }

    /// Sessions for a user, newest first, optionally for one technique.
    pub fn list_sessions(&self, user_id: &str, technique_id: Option<&str>) -> Result<Vec<SessionEntry>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions
             WHERE user_id = ?1 AND (?2 IS NULL OR technique_id = ?2)
             ORDER BY occurred_at DESC, id"
        ))?;
        let mapped = stmt.query_map(params![user_id, technique_id], row_to_session)?;
        Ok(mapped.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // === Mastery ===

    pub fn mastery_record(&self, user_id: &str, technique_id: &str) -> Result<Option<MasteryRecord>> {
        Ok(rows::record(&self.conn, user_id, technique_id)?)
    }

    pub fn list_mastery(&self, user_id: &str) -> Result<Vec<MasteryRecord>> {
        Ok(rows::records_for_user(&self.conn, user_id)?)
    }

    /// Overwrite a mastery record and append its history point atomically.
    pub fn save_mastery_record(
        &self,
        record: &MasteryRecord,
        recorded_at: DateTime<Utc>,
        cause: HistoryCause,
    ) -> Result<()> {
        self.immediate(|tx| {
            rows::upsert_record(tx, record)?;
            rows::append_history(tx, record, recorded_at, cause)?;
            Ok(())
        })
    }

    /// History points for a technique, oldest first.
    pub fn mastery_history(&self, user_id: &str, technique_id: &str) -> Result<Vec<MasteryHistoryPoint>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {HISTORY_COLUMNS} FROM mastery_history
             WHERE technique_id = ?1 AND user_id = ?2
             ORDER BY recorded_at, id"
        ))?;
        let mapped = stmt.query_map(params![technique_id, user_id], row_to_history)?;
        Ok(mapped.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // === Streak ===

    pub fn streak_state(&self, user_id: &str) -> Result<StreakState> {
        Ok(rows::streak(&self.conn, user_id)?)
    }

    pub fn save_streak_state(&self, user_id: &str, state: &StreakState) -> Result<()> {
        Ok(rows::save_streak(&self.conn, user_id, state)?)
    }
}
