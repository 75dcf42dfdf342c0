//! Effective-minutes calculation.
//!
//! A session's raw duration is scaled twice before it counts toward mastery:
//! once by a duration curve that rewards longer sits, and once by the user's
//! streak bonus. The duration curve is flat up to 30 minutes, then rises
//! linearly so that a 59-minute sit is worth exactly 1.8x, and keeps rising
//! at the same slope past that point.

/// Sessions at or below this length earn no duration bonus.
pub const FLAT_UNTIL_MINUTES: f64 = 30.0;

/// Duration at which the multiplier reaches [`ANCHOR_MULTIPLIER`].
pub const ANCHOR_MINUTES: f64 = 59.0;

/// Multiplier reached at [`ANCHOR_MINUTES`].
pub const ANCHOR_MULTIPLIER: f64 = 1.8;

/// Longest session accepted: one full day.
pub const MAX_SESSION_MINUTES: f64 = 1440.0;

/// Per-day growth factor of the streak bonus.
pub const STREAK_BASE: f64 = 1.05;

const SLOPE: f64 = (ANCHOR_MULTIPLIER - 1.0) / (ANCHOR_MINUTES - FLAT_UNTIL_MINUTES);

/// Duration multiplier for a session of `duration_minutes`.
///
/// `1.0` up to 30 minutes, then `1.0 + 0.8 * (d - 30) / 29`, uncapped.
pub fn duration_multiplier(duration_minutes: f64) -> f64 {
    let multiplier = if duration_minutes <= FLAT_UNTIL_MINUTES {
        1.0
    } else {
        1.0 + SLOPE * (duration_minutes - FLAT_UNTIL_MINUTES)
    };
    assert!(
        multiplier.is_finite(),
        "duration multiplier is not finite for {duration_minutes} minutes"
    );
    multiplier
}

/// Streak bonus: `1.05^streak`.
pub fn streak_multiplier(streak: u32) -> f64 {
    let exp = i32::try_from(streak).unwrap_or(i32::MAX);
    STREAK_BASE.powi(exp)
}

/// Effective minutes earned by one session.
///
/// Callers validate `duration_minutes` beforehand; a non-finite result here
/// is a bug and panics.
pub fn effective_minutes_delta(duration_minutes: f64, streak: u32) -> f64 {
    debug_assert!(duration_minutes > 0.0, "unvalidated duration {duration_minutes}");
    let delta = duration_minutes * duration_multiplier(duration_minutes) * streak_multiplier(streak);
    assert!(
        delta.is_finite() && delta >= 0.0,
        "effective minutes {delta} for {duration_minutes} min at streak {streak}"
    );
    delta
}

/// Effective minutes for a duration that has not been validated yet.
///
/// `None` unless `0 < duration_minutes <= MAX_SESSION_MINUTES` and the scaled
/// result is finite.
pub fn checked_effective_minutes_delta(duration_minutes: f64, streak: u32) -> Option<f64> {
    if !(duration_minutes > 0.0 && duration_minutes <= MAX_SESSION_MINUTES) {
        return None;
    }
    let delta = duration_minutes * duration_multiplier(duration_minutes) * streak_multiplier(streak);
    delta.is_finite().then_some(delta)
}

/// Recover the raw duration that produced `effective` minutes at `streak`.
///
/// Inverts [`effective_minutes_delta`]: the flat region is linear, above 30
/// minutes `d * (1 + k(d - 30)) = e` is solved for its positive root.
pub fn duration_from_effective(effective: f64, streak: u32) -> f64 {
    let base = effective / streak_multiplier(streak);
    if base <= FLAT_UNTIL_MINUTES {
        return base;
    }
    // k*d^2 + (1 - 30k)*d - base = 0
    let a = SLOPE;
    let b = 1.0 - FLAT_UNTIL_MINUTES * SLOPE;
    let disc = b * b + 4.0 * a * base;
    (-b + disc.sqrt()) / (2.0 * a)
}
