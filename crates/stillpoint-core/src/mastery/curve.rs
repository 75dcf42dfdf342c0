//! Logistic mastery curve.
//!
//! `score = 100 / (1 + e^(-(E - 50000) / 9000))`

use serde::{Deserialize, Serialize};

/// Effective minutes at which the score is exactly 50.
pub const MIDPOINT_MINUTES: f64 = 50_000.0;

/// Steepness of the curve, in effective minutes.
pub const STEEPNESS_MINUTES: f64 = 9_000.0;

/// Score thresholds reported as milestones.
pub const MILESTONES: [f64; 5] = [25.0, 50.0, 75.0, 90.0, 99.0];

/// Mastery score in `(0, 100)` for `cumulative` effective minutes.
///
/// Panics on negative or non-finite input; decay clamps at zero before this
/// is reached.
pub fn mastery_score(cumulative: f64) -> f64 {
    assert!(
        cumulative.is_finite() && cumulative >= 0.0,
        "cumulative effective minutes must be finite and >= 0, got {cumulative}"
    );
    let score = 100.0 / (1.0 + (-(cumulative - MIDPOINT_MINUTES) / STEEPNESS_MINUTES).exp());
    assert!(score.is_finite(), "mastery score overflowed for {cumulative}");
    score
}

/// Effective minutes needed to reach `score`. `None` outside `(0, 100)`.
pub fn effective_minutes_for_score(score: f64) -> Option<f64> {
    if !(score > 0.0 && score < 100.0) {
        return None;
    }
    let minutes = MIDPOINT_MINUTES - STEEPNESS_MINUTES * (100.0 / score - 1.0).ln();
    Some(minutes.max(0.0))
}

/// Next milestone above the current score and how far away it is.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    pub score: f64,
    pub effective_minutes_remaining: f64,
}

/// The first entry of [`MILESTONES`] not yet reached, if any.
pub fn next_milestone(cumulative: f64) -> Option<Milestone> {
    let current = mastery_score(cumulative);
    MILESTONES
        .iter()
        .copied()
        .find(|m| *m > current)
        .and_then(|m| {
            effective_minutes_for_score(m).map(|needed| Milestone {
                score: m,
                effective_minutes_remaining: (needed - cumulative).max(0.0),
            })
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn midpoint_is_exactly_fifty() {
        assert_eq!(mastery_score(50_000.0), 50.0);
    }

    #[test]
    fn first_session_score() {
        let expected = 100.0 / (1.0 + (49_980.0f64 / 9_000.0).exp());
        assert_eq!(mastery_score(20.0), expected);
        // Percent scale: 0.386%, i.e. a 0.0039 fraction of full mastery.
        assert!((mastery_score(20.0) - 0.386).abs() < 0.001);
    }

    #[test]
    fn bounded_at_extremes() {
        let low = mastery_score(0.0);
        assert!(low > 0.0 && low < 0.5);
        let high = mastery_score(200_000.0);
        assert!(high < 100.0 && high > 99.99);
    }

    #[test]
    #[should_panic]
    fn negative_input_panics() {
        mastery_score(-1.0);
    }

    #[test]
    fn inverse_matches_forward() {
        for s in [1.0, 25.0, 50.0, 75.0, 99.0] {
            let e = effective_minutes_for_score(s).unwrap();
            assert!((mastery_score(e) - s).abs() < 1e-9);
        }
        assert!(effective_minutes_for_score(0.0).is_none());
        assert!(effective_minutes_for_score(100.0).is_none());
    }

    #[test]
    fn milestone_progression() {
        let m = next_milestone(0.0).unwrap();
        assert_eq!(m.score, 25.0);
        let m = next_milestone(50_000.0).unwrap();
        assert_eq!(m.score, 75.0);
        assert!(next_milestone(300_000.0).is_none());
    }
}
