//! Mastery progression rules.
//!
//! Everything in here is pure: no clock reads, no storage. The engine feeds
//! these functions with persisted state and writes their results back.

pub mod curve;
pub mod decay;
pub mod effective;
pub mod streak;

pub use curve::{effective_minutes_for_score, mastery_score, next_milestone, Milestone};
pub use decay::{decay_through, DecayBreakdown, DecayPolicy, GlobalRecency, TechniqueDecayInput};
pub use effective::{
    checked_effective_minutes_delta, duration_from_effective, duration_multiplier,
    effective_minutes_delta, streak_multiplier, MAX_SESSION_MINUTES,
};
pub use streak::{days_between, practice_day, StreakState, StreakUpdate};
