//! # Stillpoint Core Library
//!
//! This library provides the core business logic for the Stillpoint meditation
//! tracker. The CLI is a thin layer over the same operations; any other front
//! end is expected to call into [`MasteryEngine`] the same way.
//!
//! ## Architecture
//!
//! - **Mastery rules**: pure functions turning session minutes into effective
//!   minutes, effective minutes into a 0-100 mastery score, and idle days into
//!   decay amounts
//! - **Streak tracker**: user-wide consecutive-day counter
//! - **Storage**: SQLite store for techniques, sessions, mastery records and
//!   the append-only mastery history; TOML-based configuration
//! - **Engine**: transactional wrapper tying the rules to the store
//!
//! ## Key Components
//!
//! - [`MasteryEngine`]: `record_session` / `apply_daily_decay` entry points
//! - [`Database`]: technique, session and mastery persistence
//! - [`Config`]: engine and decay tuning

pub mod engine;
pub mod error;
pub mod export;
pub mod mastery;
pub mod storage;

pub use engine::{DecayOutcome, DecayReport, MasteryEngine, SessionOutcome};
pub use error::{ConfigError, CoreError, DatabaseError, Result, ValidationError};
pub use mastery::{
    duration_multiplier, effective_minutes_delta, mastery_score, streak_multiplier, DecayPolicy,
    GlobalRecency, StreakState,
};
pub use storage::{
    Config, Database, HistoryCause, MasteryHistoryPoint, MasteryRecord, SessionEntry,
    SessionSource, Technique,
};
