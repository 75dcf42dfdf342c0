//! Mastery engine.
//!
//! Ties the pure rules in [`crate::mastery`] to the store. Every operation
//! that changes a mastery record runs in its own immediate transaction and
//! writes the record together with a history point, so the two never
//! disagree.
//!
//! The engine never reads the wall clock: session timestamps and the decay
//! day are always passed in.

use chrono::{DateTime, Days, FixedOffset, NaiveDate, NaiveTime, Offset, TimeZone, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, Result, ValidationError};
use crate::mastery::{
    checked_effective_minutes_delta, decay_through, practice_day, GlobalRecency, StreakState,
    TechniqueDecayInput, MAX_SESSION_MINUTES,
};
use crate::storage::database::rows;
use crate::storage::{
    Config, Database, HistoryCause, MasteryHistoryPoint, MasteryRecord, SessionEntry,
    SessionSource, Technique,
};

/// Result of logging (or correcting) a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionOutcome {
    pub session_id: String,
    pub technique_id: String,
    /// Change in cumulative effective minutes caused by this call
    pub effective_minutes_delta: f64,
    pub cumulative_effective_minutes: f64,
    pub mastery_score: f64,
    pub streak: u32,
}

/// Per-technique result of a decay run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TechniqueDecay {
    pub technique_id: String,
    pub days_applied: u32,
    pub amount: f64,
    pub cumulative_effective_minutes: f64,
    pub mastery_score: f64,
}

/// A technique the decay run could not update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecayFailure {
    pub technique_id: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecayReport {
    pub user_id: String,
    pub day: NaiveDate,
    pub decayed: Vec<TechniqueDecay>,
    /// Techniques already decayed for `day` before this run
    pub skipped: Vec<String>,
    pub failed: Vec<DecayFailure>,
    /// The user's streak was reset to zero by this run
    pub streak_reset: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DecayOutcome {
    Applied(DecayReport),
    /// Every technique was already decayed for this day; nothing changed.
    AlreadyApplied,
}

enum TechniqueStep {
    Decayed(TechniqueDecay),
    AlreadyApplied,
}

/// Entry point for recording practice and running the daily decay.
pub struct MasteryEngine {
    db: Database,
    config: Config,
}

impl MasteryEngine {
    pub fn new(db: Database, config: Config) -> Self {
        Self { db, config }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn day_of(&self, at: DateTime<Utc>) -> NaiveDate {
        practice_day(at, self.config.engine.utc_offset_minutes)
    }

    /// Start of `day` in the configured offset, as a UTC instant.
    fn start_of_day(&self, day: NaiveDate) -> DateTime<Utc> {
        let offset = self
            .config
            .engine
            .utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .unwrap_or_else(|| Utc.fix());
        offset
            .from_local_datetime(&day.and_time(NaiveTime::MIN))
            .single()
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| day.and_time(NaiveTime::MIN).and_utc())
    }

    // === Technique library ===

    pub fn create_technique(
        &self,
        user_id: &str,
        name: &str,
        description: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Technique> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ValidationError::Empty("name".into()).into());
        }
        let technique = Technique {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            name: name.to_string(),
            description: description.trim().to_string(),
            created_at,
        };
        self.db.create_technique(&technique)?;
        tracing::debug!(user_id, technique_id = %technique.id, "technique created");
        Ok(technique)
    }

    pub fn list_techniques(&self, user_id: &str) -> Result<Vec<Technique>> {
        self.db.list_techniques(user_id)
    }

    /// Remove a technique; its sessions, record and history go with it.
    pub fn delete_technique(&self, user_id: &str, technique_id: &str) -> Result<()> {
        self.db.delete_technique(user_id, technique_id)?;
        tracing::info!(user_id, technique_id, "technique deleted");
        Ok(())
    }

    // === Sessions ===

    /// Fold a completed session into the technique's mastery.
    ///
    /// # Errors
    /// `InvalidDuration` for minutes outside `(0, MAX_SESSION_MINUTES]` or
    /// whose effective value would overflow, `NotFound` if the technique does
    /// not belong to the user, `TransientStoreFailure` if the store is busy
    /// (nothing is written in that case).
    pub fn record_session(
        &self,
        user_id: &str,
        technique_id: &str,
        duration_minutes: f64,
        occurred_at: DateTime<Utc>,
        source: SessionSource,
    ) -> Result<SessionOutcome> {
        validate_duration(duration_minutes)?;
        let day = self.day_of(occurred_at);

        let outcome = self.db.immediate(|tx| {
            rows::technique(tx, user_id, technique_id)?
                .ok_or_else(|| CoreError::technique_not_found(user_id, technique_id))?;

            let update = rows::streak(tx, user_id)?.advance(day);
            rows::save_streak(tx, user_id, &update.state)?;

            let delta = scaled_minutes(duration_minutes, update.bonus_streak)?;
            let session = SessionEntry {
                id: Uuid::new_v4().to_string(),
                technique_id: technique_id.to_string(),
                user_id: user_id.to_string(),
                duration_minutes,
                occurred_at,
                source,
                bonus_streak: update.bonus_streak,
                effective_minutes: delta,
            };
            rows::insert_session(tx, &session)?;

            let mut record = rows::record(tx, user_id, technique_id)?
                .unwrap_or_else(|| MasteryRecord::new(user_id, technique_id, occurred_at));
            record.set_cumulative(checked_cumulative(
                record.cumulative_effective_minutes,
                delta,
                duration_minutes,
            )?);
            record.streak = update.state.streak;
            record.last_practiced_at = Some(match record.last_practiced_at {
                Some(previous) => previous.max(occurred_at),
                None => occurred_at,
            });
            let recorded_at = history_timestamp(tx, technique_id, occurred_at)?;
            record.updated_at = recorded_at;
            write_with_history(tx, &record, recorded_at, HistoryCause::Session)?;

            Ok(SessionOutcome {
                session_id: session.id,
                technique_id: technique_id.to_string(),
                effective_minutes_delta: delta,
                cumulative_effective_minutes: record.cumulative_effective_minutes,
                mastery_score: record.mastery_score,
                streak: record.streak,
            })
        })?;

        tracing::info!(
            user_id,
            technique_id,
            duration_minutes,
            effective = outcome.effective_minutes_delta,
            mastery = outcome.mastery_score,
            streak = outcome.streak,
            "session recorded"
        );
        Ok(outcome)
    }

    /// Change a session's duration and re-fold its contribution.
    ///
    /// The session keeps the streak bonus it was logged with; only the
    /// duration part is recomputed.
    pub fn edit_session(
        &self,
        user_id: &str,
        session_id: &str,
        duration_minutes: f64,
        at: DateTime<Utc>,
    ) -> Result<SessionOutcome> {
        validate_duration(duration_minutes)?;

        let outcome = self.db.immediate(|tx| {
            let mut session = rows::session(tx, user_id, session_id)?
                .ok_or_else(|| CoreError::session_not_found(user_id, session_id))?;
            let old_effective = session.effective_minutes;
            session.duration_minutes = duration_minutes;
            session.effective_minutes = scaled_minutes(duration_minutes, session.bonus_streak)?;
            rows::update_session(tx, &session)?;

            let streak = rows::streak(tx, user_id)?.current(self.day_of(at));
            let record = correct_record(
                tx,
                &session,
                session.effective_minutes - old_effective,
                streak,
                at,
            )?;

            Ok(SessionOutcome {
                session_id: session.id.clone(),
                technique_id: session.technique_id.clone(),
                effective_minutes_delta: session.effective_minutes - old_effective,
                cumulative_effective_minutes: record.cumulative_effective_minutes,
                mastery_score: record.mastery_score,
                streak: record.streak,
            })
        })?;

        tracing::info!(user_id, session_id, duration_minutes, "session edited");
        Ok(outcome)
    }

    /// Delete a session and take its contribution back out of the record.
    ///
    /// The streak is not rewound.
    pub fn delete_session(
        &self,
        user_id: &str,
        session_id: &str,
        at: DateTime<Utc>,
    ) -> Result<SessionOutcome> {
        let outcome = self.db.immediate(|tx| {
            let session = rows::session(tx, user_id, session_id)?
                .ok_or_else(|| CoreError::session_not_found(user_id, session_id))?;
            rows::delete_session(tx, &session.id)?;

            let streak = rows::streak(tx, user_id)?.current(self.day_of(at));
            let record = correct_record(tx, &session, -session.effective_minutes, streak, at)?;

            Ok(SessionOutcome {
                session_id: session.id.clone(),
                technique_id: session.technique_id.clone(),
                effective_minutes_delta: -session.effective_minutes,
                cumulative_effective_minutes: record.cumulative_effective_minutes,
                mastery_score: record.mastery_score,
                streak: record.streak,
            })
        })?;

        tracing::info!(user_id, session_id, "session deleted");
        Ok(outcome)
    }

    pub fn list_sessions(&self, user_id: &str, technique_id: Option<&str>) -> Result<Vec<SessionEntry>> {
        self.db.list_sessions(user_id, technique_id)
    }

    // === Decay ===

    /// Run the daily decay for every technique of `user_id`, as of `today`.
    ///
    /// Safe to call repeatedly: techniques already decayed for `today` are
    /// left alone, and if that covers all of them the call reports
    /// [`DecayOutcome::AlreadyApplied`]. A failure on one technique is
    /// logged and recorded in the report; the others still run.
    pub fn apply_daily_decay(&self, user_id: &str, today: NaiveDate) -> Result<DecayOutcome> {
        let (streak_reset, recency) = self.begin_decay(user_id, today)?;
        let stamp = self.start_of_day(today);

        let records = self.db.list_mastery(user_id)?;
        let mut report = DecayReport {
            user_id: user_id.to_string(),
            day: today,
            decayed: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
            streak_reset,
        };

        for technique_id in records.iter().map(|r| r.technique_id.as_str()) {
            match self.decay_technique(user_id, technique_id, &recency, today, stamp) {
                Ok(TechniqueStep::Decayed(step)) => report.decayed.push(step),
                Ok(TechniqueStep::AlreadyApplied) => report.skipped.push(technique_id.to_string()),
                Err(e) => {
                    tracing::warn!(user_id, technique_id, error = %e, "decay failed for technique");
                    report.failed.push(DecayFailure {
                        technique_id: technique_id.to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        if !records.is_empty() && report.skipped.len() == records.len() && !streak_reset {
            tracing::debug!(user_id, %today, "decay already applied");
            return Ok(DecayOutcome::AlreadyApplied);
        }

        tracing::info!(
            user_id,
            %today,
            decayed = report.decayed.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "daily decay applied"
        );
        Ok(DecayOutcome::Applied(report))
    }

    /// Reset a broken streak and collect the user's practice days, under one
    /// write lock so a session committed meanwhile is not overwritten.
    fn begin_decay(&self, user_id: &str, today: NaiveDate) -> Result<(bool, GlobalRecency)> {
        let lookback = today
            .checked_sub_days(Days::new(u64::from(self.config.decay.max_catch_up_days)))
            .unwrap_or(today);
        let since = self.start_of_day(lookback);

        self.db.immediate(|tx| {
            let streak = rows::streak(tx, user_id)?;
            let reset = streak.streak > 0 && streak.is_broken(today);
            if reset {
                rows::save_streak(tx, user_id, &StreakState::new(0, streak.last_practiced_on))?;
                tracing::info!(user_id, previous = streak.streak, "streak reset after missed day");
            }

            let earlier = rows::last_session_before(tx, user_id, since)?;
            let recent = rows::session_times_since(tx, user_id, since)?;
            let recency = GlobalRecency::from_days(
                earlier
                    .into_iter()
                    .chain(recent)
                    .map(|at| self.day_of(at))
                    .filter(|day| *day <= today),
            );
            Ok((reset, recency))
        })
    }

    fn decay_technique(
        &self,
        user_id: &str,
        technique_id: &str,
        recency: &GlobalRecency,
        today: NaiveDate,
        stamp: DateTime<Utc>,
    ) -> Result<TechniqueStep> {
        self.db.immediate(|tx| {
            // Re-read under the write lock so a concurrent session is not lost.
            let mut record = rows::record(tx, user_id, technique_id)?
                .ok_or_else(|| CoreError::technique_not_found(user_id, technique_id))?;

            let applied_on = record.last_decay_applied_at.map(|at| self.day_of(at));
            if applied_on.is_some_and(|d| d >= today) {
                return Ok(TechniqueStep::AlreadyApplied);
            }

            let breakdown = decay_through(
                &self.config.decay,
                TechniqueDecayInput {
                    cumulative_effective_minutes: record.cumulative_effective_minutes,
                    last_practiced_on: record.last_practiced_at.map(|at| self.day_of(at)),
                    last_decay_applied_on: applied_on,
                },
                recency,
                today,
            );

            record.set_cumulative(breakdown.cumulative_after);
            record.streak = rows::streak(tx, user_id)?.current(today);
            record.last_decay_applied_at = Some(stamp);
            let recorded_at = history_timestamp(tx, technique_id, stamp)?;
            record.updated_at = recorded_at;
            write_with_history(tx, &record, recorded_at, HistoryCause::Decay)?;

            tracing::debug!(
                user_id,
                technique_id,
                days = breakdown.days_applied,
                amount = breakdown.amount,
                "technique decayed"
            );
            Ok(TechniqueStep::Decayed(TechniqueDecay {
                technique_id: technique_id.to_string(),
                days_applied: breakdown.days_applied,
                amount: breakdown.amount,
                cumulative_effective_minutes: record.cumulative_effective_minutes,
                mastery_score: record.mastery_score,
            }))
        })
    }

    // === Reads ===

    pub fn mastery_record(&self, user_id: &str, technique_id: &str) -> Result<MasteryRecord> {
        self.db
            .mastery_record(user_id, technique_id)?
            .ok_or_else(|| CoreError::technique_not_found(user_id, technique_id))
    }

    pub fn list_mastery(&self, user_id: &str) -> Result<Vec<MasteryRecord>> {
        self.db.list_mastery(user_id)
    }

    pub fn mastery_history(&self, user_id: &str, technique_id: &str) -> Result<Vec<MasteryHistoryPoint>> {
        if self.db.technique(user_id, technique_id)?.is_none() {
            return Err(CoreError::technique_not_found(user_id, technique_id));
        }
        self.db.mastery_history(user_id, technique_id)
    }

    /// The user's streak as seen on `today` (zero once a day was missed).
    pub fn streak(&self, user_id: &str, today: NaiveDate) -> Result<u32> {
        Ok(self.db.streak_state(user_id)?.current(today))
    }
}

fn validate_duration(duration_minutes: f64) -> Result<()> {
    if duration_minutes > 0.0 && duration_minutes <= MAX_SESSION_MINUTES {
        Ok(())
    } else {
        Err(CoreError::InvalidDuration {
            minutes: duration_minutes,
        })
    }
}

/// Effective minutes for a session, or `InvalidDuration` if they overflow.
fn scaled_minutes(duration_minutes: f64, bonus_streak: u32) -> Result<f64> {
    checked_effective_minutes_delta(duration_minutes, bonus_streak).ok_or(CoreError::InvalidDuration {
        minutes: duration_minutes,
    })
}

fn checked_cumulative(current: f64, delta: f64, duration_minutes: f64) -> Result<f64> {
    let cumulative = current + delta;
    if cumulative.is_finite() {
        Ok(cumulative)
    } else {
        Err(CoreError::InvalidDuration {
            minutes: duration_minutes,
        })
    }
}

/// History timestamps per technique never go backwards.
fn history_timestamp(conn: &Connection, technique_id: &str, at: DateTime<Utc>) -> Result<DateTime<Utc>> {
    Ok(match rows::last_history_at(conn, technique_id)? {
        Some(last) if last > at => last,
        _ => at,
    })
}

fn write_with_history(
    conn: &Connection,
    record: &MasteryRecord,
    recorded_at: DateTime<Utc>,
    cause: HistoryCause,
) -> Result<()> {
    rows::upsert_record(conn, record)?;
    rows::append_history(conn, record, recorded_at, cause)?;
    Ok(())
}

/// Apply a correction of `delta` effective minutes to the record behind
/// `session`, clamped at zero.
fn correct_record(
    conn: &Connection,
    session: &SessionEntry,
    delta: f64,
    streak: u32,
    at: DateTime<Utc>,
) -> Result<MasteryRecord> {
    let (user_id, technique_id) = (session.user_id.as_str(), session.technique_id.as_str());
    let mut record = rows::record(conn, user_id, technique_id)?
        .ok_or_else(|| CoreError::technique_not_found(user_id, technique_id))?;
    record.set_cumulative(checked_cumulative(
        record.cumulative_effective_minutes,
        delta,
        session.duration_minutes,
    )?);
    record.streak = streak;
    let recorded_at = history_timestamp(conn, technique_id, at)?;
    record.updated_at = recorded_at;
    write_with_history(conn, &record, recorded_at, HistoryCause::Correction)?;
    Ok(record)
}
