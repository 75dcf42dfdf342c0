//! User-wide practice streak.
//!
//! The streak counts consecutive calendar days with at least one session,
//! across every technique the user practices. Days are taken in a fixed UTC
//! offset supplied by configuration.

use chrono::{DateTime, Days, FixedOffset, NaiveDate, Offset, Utc};
use serde::{Deserialize, Serialize};

/// Calendar day of `at` in the given UTC offset (minutes east of UTC).
///
/// Offsets outside +/-24h fall back to UTC.
pub fn practice_day(at: DateTime<Utc>, utc_offset_minutes: i32) -> NaiveDate {
    let offset = utc_offset_minutes
        .checked_mul(60)
        .and_then(FixedOffset::east_opt)
        .unwrap_or_else(|| Utc.fix());
    at.with_timezone(&offset).date_naive()
}

/// Whole days from `earlier` to `later`, never negative.
pub fn days_between(earlier: NaiveDate, later: NaiveDate) -> u32 {
    let days = (later - earlier).num_days();
    u32::try_from(days.max(0)).unwrap_or(u32::MAX)
}

/// Persisted streak state for one user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakState {
    pub streak: u32,
    pub last_practiced_on: Option<NaiveDate>,
}

/// Result of folding one session into the streak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreakUpdate {
    pub state: StreakState,
    /// Streak value applied to this session's multiplier: the run of
    /// consecutive practice days before the session's own day.
    pub bonus_streak: u32,
}

impl StreakState {
    pub fn new(streak: u32, last_practiced_on: Option<NaiveDate>) -> Self {
        Self {
            streak,
            last_practiced_on,
        }
    }

    /// Fold a session on `day` into the streak.
    pub fn advance(&self, day: NaiveDate) -> StreakUpdate {
        let Some(last) = self.last_practiced_on else {
            return StreakUpdate {
                state: StreakState::new(1, Some(day)),
                bonus_streak: 0,
            };
        };

        if day < last {
            // Back-dated entry: history before the last counted day is
            // already reflected in the streak.
            return StreakUpdate {
                state: *self,
                bonus_streak: 0,
            };
        }

        let streak = if day == last {
            self.streak.max(1)
        } else if last.checked_add_days(Days::new(1)) == Some(day) {
            self.streak.saturating_add(1)
        } else {
            1
        };

        StreakUpdate {
            state: StreakState::new(streak, Some(day)),
            bonus_streak: streak - 1,
        }
    }

    /// Streak as seen on `today`: zero once a full day has been missed.
    pub fn current(&self, today: NaiveDate) -> u32 {
        if self.is_broken(today) {
            0
        } else {
            self.streak
        }
    }

    /// True when the last practice day is before yesterday.
    pub fn is_broken(&self, today: NaiveDate) -> bool {
        match self.last_practiced_on {
            Some(last) => last < today && days_between(last, today) >= 2,
            None => false,
        }
    }
}
