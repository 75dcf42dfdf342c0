//! Inactivity decay for cumulative effective minutes.
//!
//! Each idle day removes a fraction of a technique's effective minutes:
//!
//! ```text
//! fraction = base_daily_rate
//!   x ramp(days since this technique was practiced)
//!   x coupling(days since *any* technique was practiced)
//! ```
//!
//! `ramp` is zero on the day of practice and reaches 1 after `ramp_days`.
//! `coupling` starts at `coupling_floor` when the user practiced something
//! that day and approaches 1 as the whole library goes idle, so keeping any
//! practice alive slows decay everywhere.

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

use super::streak::days_between;
use crate::error::ValidationError;

/// Tuning for the decay job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecayPolicy {
    /// Fraction of effective minutes lost per fully idle day
    #[serde(default = "default_base_daily_rate")]
    pub base_daily_rate: f64,
    /// Idle days before a technique decays at the full rate
    #[serde(default = "default_ramp_days")]
    pub ramp_days: u32,
    /// Share of the rate that applies while the user is still practicing
    /// something else
    #[serde(default = "default_coupling_floor")]
    pub coupling_floor: f64,
    /// Days of total inactivity over which coupling rises toward 1
    #[serde(default = "default_recency_window_days")]
    pub recency_window_days: f64,
    /// Oldest missed day the job will still catch up on
    #[serde(default = "default_max_catch_up_days")]
    pub max_catch_up_days: u32,
}

fn default_base_daily_rate() -> f64 {
    0.02
}
fn default_ramp_days() -> u32 {
    7
}
fn default_coupling_floor() -> f64 {
    0.25
}
fn default_recency_window_days() -> f64 {
    7.0
}
fn default_max_catch_up_days() -> u32 {
    30
}

impl Default for DecayPolicy {
    fn default() -> Self {
        Self {
            base_daily_rate: default_base_daily_rate(),
            ramp_days: default_ramp_days(),
            coupling_floor: default_coupling_floor(),
            recency_window_days: default_recency_window_days(),
            max_catch_up_days: default_max_catch_up_days(),
        }
    }
}

impl DecayPolicy {
    /// Reject settings that would break the decay invariants.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let invalid = |field: &str, message: &str| ValidationError::InvalidValue {
            field: format!("decay.{field}"),
            message: message.to_string(),
        };
        if !(0.0..=1.0).contains(&self.base_daily_rate) {
            return Err(invalid("base_daily_rate", "must be within [0, 1]"));
        }
        if self.ramp_days == 0 {
            return Err(invalid("ramp_days", "must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.coupling_floor) {
            return Err(invalid("coupling_floor", "must be within [0, 1]"));
        }
        if !(self.recency_window_days.is_finite() && self.recency_window_days > 0.0) {
            return Err(invalid("recency_window_days", "must be greater than 0"));
        }
        if self.max_catch_up_days == 0 {
            return Err(invalid("max_catch_up_days", "must be at least 1"));
        }
        Ok(())
    }

    fn ramp(&self, days_idle: u32) -> f64 {
        (f64::from(days_idle) / f64::from(self.ramp_days)).min(1.0)
    }

    fn coupling(&self, days_since_any: u32) -> f64 {
        let g = f64::from(days_since_any);
        self.coupling_floor
            + (1.0 - self.coupling_floor) * (1.0 - (-g / self.recency_window_days).exp())
    }

    /// Fraction of effective minutes removed for one idle day.
    pub fn daily_fraction(&self, days_idle: u32, days_since_any: u32) -> f64 {
        if days_idle == 0 {
            return 0.0;
        }
        let fraction = self.base_daily_rate * self.ramp(days_idle) * self.coupling(days_since_any);
        fraction.clamp(0.0, 1.0)
    }
}

/// Days on which the user practiced anything, across the whole library.
///
/// Built once per decay run and handed to every per-technique calculation.
/// Each catch-up day looks up the latest practice on or before itself, so a
/// single run over missed days matches running the job every night.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalRecency {
    days: Vec<NaiveDate>,
}

impl GlobalRecency {
    /// Recency known only through the latest practice day.
    pub fn new(last_practiced_on: Option<NaiveDate>) -> Self {
        Self::from_days(last_practiced_on)
    }

    pub fn from_days(days: impl IntoIterator<Item = NaiveDate>) -> Self {
        let mut days: Vec<NaiveDate> = days.into_iter().collect();
        days.sort_unstable();
        days.dedup();
        Self { days }
    }

    pub fn last_practiced_on(&self) -> Option<NaiveDate> {
        self.days.last().copied()
    }

    /// Days since the latest practice on or before `day`; `fallback` if none
    /// is known.
    fn days_since(&self, day: NaiveDate, fallback: u32) -> u32 {
        match self.days.partition_point(|d| *d <= day) {
            0 => fallback,
            n => days_between(self.days[n - 1], day),
        }
    }
}

/// Inputs describing one technique's decay state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TechniqueDecayInput {
    pub cumulative_effective_minutes: f64,
    pub last_practiced_on: Option<NaiveDate>,
    pub last_decay_applied_on: Option<NaiveDate>,
}

/// Outcome of decaying one technique up to a given day.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecayBreakdown {
    pub cumulative_before: f64,
    pub cumulative_after: f64,
    /// Idle days folded in by this run (more than one when catching up)
    pub days_applied: u32,
    pub amount: f64,
}

impl DecayBreakdown {
    fn unchanged(cumulative: f64) -> Self {
        Self {
            cumulative_before: cumulative,
            cumulative_after: cumulative,
            days_applied: 0,
            amount: 0.0,
        }
    }
}

/// Decay a technique through `today`, catching up on missed days.
///
/// Days already covered by `last_decay_applied_on`, and days on or before the
/// technique's last practice, are skipped. The result is never negative.
pub fn decay_through(
    policy: &DecayPolicy,
    input: TechniqueDecayInput,
    recency: &GlobalRecency,
    today: NaiveDate,
) -> DecayBreakdown {
    let before = input.cumulative_effective_minutes.max(0.0);
    let Some(practiced) = input.last_practiced_on else {
        return DecayBreakdown::unchanged(before);
    };

    let covered = match input.last_decay_applied_on {
        Some(applied) => applied.max(practiced),
        None => practiced,
    };
    let Some(mut day) = covered.checked_add_days(Days::new(1)) else {
        return DecayBreakdown::unchanged(before);
    };
    let window_start = today
        .checked_sub_days(Days::new(u64::from(policy.max_catch_up_days.saturating_sub(1))))
        .unwrap_or(today);
    if day < window_start {
        day = window_start;
    }

    let mut current = before;
    let mut days_applied = 0;
    while day <= today {
        let days_idle = days_between(practiced, day);
        let days_since_any = recency.days_since(day, days_idle);
        let fraction = policy.daily_fraction(days_idle, days_since_any);
        current = (current - current * fraction).max(0.0);
        days_applied += 1;
        match day.checked_add_days(Days::new(1)) {
            Some(next) => day = next,
            None => break,
        }
    }

    DecayBreakdown {
        cumulative_before: before,
        cumulative_after: current,
        days_applied,
        amount: before - current,
    }
}
