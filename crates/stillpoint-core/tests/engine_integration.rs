//! Integration tests for the mastery engine.
//!
//! Covers the end-to-end session scenarios, streak gaps, decay behaviour and
//! the record/history atomicity guarantee against a real SQLite store.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use stillpoint_core::mastery::{mastery_score, StreakState};
use stillpoint_core::{
    Config, CoreError, Database, DecayOutcome, HistoryCause, MasteryEngine, MasteryRecord,
    SessionSource,
};

fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 4, day, hour, 0, 0).unwrap()
}

fn day(n: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 4, n).unwrap()
}

fn engine() -> MasteryEngine {
    MasteryEngine::new(Database::open_memory().unwrap(), Config::default())
}

fn fail_history_inserts(db: &Database, technique_id: Option<&str>) {
    let when = technique_id
        .map(|id| format!("WHEN NEW.technique_id = '{id}'"))
        .unwrap_or_default();
    db.conn()
        .execute_batch(&format!(
            "CREATE TRIGGER fail_history BEFORE INSERT ON mastery_history {when}
             BEGIN SELECT RAISE(ABORT, 'injected history fault'); END;"
        ))
        .unwrap();
}

fn applied(outcome: DecayOutcome) -> stillpoint_core::DecayReport {
    match outcome {
        DecayOutcome::Applied(report) => report,
        DecayOutcome::AlreadyApplied => panic!("expected decay to be applied"),
    }
}

#[test]
fn first_session_for_new_user() {
    let engine = engine();
    let t = engine.create_technique("u", "Breath counting", "", at(1, 7)).unwrap();

    let out = engine
        .record_session("u", &t.id, 20.0, at(1, 8), SessionSource::Timer)
        .unwrap();

    assert_eq!(out.effective_minutes_delta, 20.0);
    assert_eq!(out.cumulative_effective_minutes, 20.0);
    let expected = 100.0 / (1.0 + (49_980.0f64 / 9_000.0).exp());
    assert!((out.mastery_score - expected).abs() < 1e-12);
    assert_eq!(out.streak, 1);

    let history = engine.mastery_history("u", &t.id).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].cumulative_effective_minutes, 20.0);
    assert_eq!(history[0].mastery_score, out.mastery_score);
}

#[test]
fn long_sit_on_established_streak() {
    let engine = engine();
    let t = engine.create_technique("u", "Open awareness", "", at(1, 7)).unwrap();

    let mut seeded = MasteryRecord::new("u", &t.id, at(9, 8));
    seeded.set_cumulative(50_000.0);
    seeded.streak = 5;
    seeded.last_practiced_at = Some(at(9, 8));
    engine
        .db()
        .save_mastery_record(&seeded, at(9, 8), HistoryCause::Session)
        .unwrap();
    engine
        .db()
        .save_streak_state("u", &StreakState::new(5, Some(day(9))))
        .unwrap();

    let out = engine
        .record_session("u", &t.id, 59.0, at(10, 8), SessionSource::Timer)
        .unwrap();

    let expected_delta = 59.0 * 1.8 * 1.05f64.powi(5);
    assert!((out.effective_minutes_delta - expected_delta).abs() < 1e-9);
    assert!((out.effective_minutes_delta - 135.5).abs() < 0.1);
    assert!((out.cumulative_effective_minutes - (50_000.0 + expected_delta)).abs() < 1e-9);
    assert_eq!(out.mastery_score, mastery_score(out.cumulative_effective_minutes));
    assert!(out.mastery_score > 50.0);
    assert_eq!(out.streak, 6);
}

#[test]
fn gap_resets_streak_to_one() {
    let engine = engine();
    let t = engine.create_technique("u", "Metta", "", at(1, 7)).unwrap();

    engine.record_session("u", &t.id, 10.0, at(1, 8), SessionSource::Timer).unwrap();
    let second = engine.record_session("u", &t.id, 10.0, at(2, 8), SessionSource::Timer).unwrap();
    assert_eq!(second.streak, 2);

    let fifth = engine.record_session("u", &t.id, 10.0, at(5, 8), SessionSource::Timer).unwrap();
    assert_eq!(fifth.streak, 1);
    assert_eq!(fifth.effective_minutes_delta, 10.0);
}

#[test]
fn streak_is_shared_across_techniques() {
    let engine = engine();
    let a = engine.create_technique("u", "Breath", "", at(1, 7)).unwrap();
    let b = engine.create_technique("u", "Body scan", "", at(1, 7)).unwrap();

    engine.record_session("u", &a.id, 10.0, at(1, 8), SessionSource::Timer).unwrap();
    let out = engine.record_session("u", &b.id, 10.0, at(2, 8), SessionSource::Timer).unwrap();
    assert_eq!(out.streak, 2);
    assert!((out.effective_minutes_delta - 10.5).abs() < 1e-9);
    assert_eq!(engine.streak("u", day(2)).unwrap(), 2);
    assert_eq!(engine.streak("u", day(4)).unwrap(), 0);
}

#[test]
fn failed_history_append_rolls_back_session() {
    let engine = engine();
    let t = engine.create_technique("u", "Breath", "", at(1, 7)).unwrap();
    engine.record_session("u", &t.id, 20.0, at(1, 8), SessionSource::Timer).unwrap();
    let before = engine.mastery_record("u", &t.id).unwrap();
    let streak_before = engine.db().streak_state("u").unwrap();

    fail_history_inserts(engine.db(), None);
    let err = engine
        .record_session("u", &t.id, 45.0, at(2, 8), SessionSource::Timer)
        .unwrap_err();
    assert!(matches!(err, CoreError::Database(_)), "{err}");

    assert_eq!(engine.mastery_record("u", &t.id).unwrap(), before);
    assert_eq!(engine.db().streak_state("u").unwrap(), streak_before);
    assert_eq!(engine.list_sessions("u", Some(&t.id)).unwrap().len(), 1);
    assert_eq!(engine.mastery_history("u", &t.id).unwrap().len(), 1);
}

#[test]
fn decay_is_idempotent_within_a_day() {
    let engine = engine();
    let t = engine.create_technique("u", "Breath", "", at(1, 7)).unwrap();
    engine.record_session("u", &t.id, 40.0, at(1, 8), SessionSource::Timer).unwrap();

    let first = applied(engine.apply_daily_decay("u", day(10)).unwrap());
    assert_eq!(first.decayed.len(), 1);
    assert!(first.decayed[0].amount > 0.0);
    let record_after_first = engine.mastery_record("u", &t.id).unwrap();
    let history_after_first = engine.mastery_history("u", &t.id).unwrap();

    let second = engine.apply_daily_decay("u", day(10)).unwrap();
    assert_eq!(second, DecayOutcome::AlreadyApplied);
    assert_eq!(engine.mastery_record("u", &t.id).unwrap(), record_after_first);
    assert_eq!(engine.mastery_history("u", &t.id).unwrap(), history_after_first);
}

#[test]
fn decay_history_mirrors_record() {
    let engine = engine();
    let t = engine.create_technique("u", "Breath", "", at(1, 7)).unwrap();
    engine.record_session("u", &t.id, 40.0, at(1, 8), SessionSource::Timer).unwrap();
    engine.apply_daily_decay("u", day(3)).unwrap();
    engine.apply_daily_decay("u", day(4)).unwrap();

    let record = engine.mastery_record("u", &t.id).unwrap();
    let history = engine.mastery_history("u", &t.id).unwrap();
    let last = history.last().unwrap();
    assert_eq!(last.cause, HistoryCause::Decay);
    assert_eq!(last.cumulative_effective_minutes, record.cumulative_effective_minutes);
    assert_eq!(last.mastery_score, record.mastery_score);
    assert!(history.windows(2).all(|w| w[0].recorded_at <= w[1].recorded_at));
    assert!(history
        .windows(2)
        .all(|w| w[1].cumulative_effective_minutes <= w[0].cumulative_effective_minutes));
}

#[test]
fn technique_practiced_today_does_not_decay() {
    let engine = engine();
    let fresh = engine.create_technique("u", "Breath", "", at(1, 7)).unwrap();
    let stale = engine.create_technique("u", "Koan", "", at(1, 7)).unwrap();
    engine.record_session("u", &stale.id, 40.0, at(1, 8), SessionSource::Timer).unwrap();
    engine.record_session("u", &fresh.id, 40.0, at(12, 8), SessionSource::Timer).unwrap();
    let fresh_before = engine.mastery_record("u", &fresh.id).unwrap();

    let report = applied(engine.apply_daily_decay("u", day(12)).unwrap());
    let fresh_step = report.decayed.iter().find(|d| d.technique_id == fresh.id).unwrap();
    let stale_step = report.decayed.iter().find(|d| d.technique_id == stale.id).unwrap();
    assert_eq!(fresh_step.amount, 0.0);
    assert!(stale_step.amount > 0.0);
    assert_eq!(
        engine.mastery_record("u", &fresh.id).unwrap().cumulative_effective_minutes,
        fresh_before.cumulative_effective_minutes
    );
}

#[test]
fn practice_elsewhere_slows_decay() {
    let engine = engine();

    // "busy" keeps practicing another technique; "idle" stops entirely.
    let busy_stale = engine.create_technique("busy", "Koan", "", at(1, 7)).unwrap();
    let busy_other = engine.create_technique("busy", "Breath", "", at(1, 7)).unwrap();
    let idle_stale = engine.create_technique("idle", "Koan", "", at(1, 7)).unwrap();

    for user_technique in [("busy", &busy_stale.id), ("idle", &idle_stale.id)] {
        engine
            .record_session(user_technique.0, user_technique.1, 40.0, at(1, 8), SessionSource::Timer)
            .unwrap();
    }
    for d in 2..=10 {
        engine
            .record_session("busy", &busy_other.id, 10.0, at(d, 8), SessionSource::Timer)
            .unwrap();
    }

    engine.apply_daily_decay("busy", day(10)).unwrap();
    engine.apply_daily_decay("idle", day(10)).unwrap();

    let busy = engine.mastery_record("busy", &busy_stale.id).unwrap();
    let idle = engine.mastery_record("idle", &idle_stale.id).unwrap();
    assert!(busy.cumulative_effective_minutes > idle.cumulative_effective_minutes);
    assert!(idle.cumulative_effective_minutes >= 0.0);
}

#[test]
fn decay_failure_is_isolated_per_technique() {
    let engine = engine();
    let ok = engine.create_technique("u", "Breath", "", at(1, 7)).unwrap();
    let broken = engine.create_technique("u", "Koan", "", at(1, 7)).unwrap();
    engine.record_session("u", &ok.id, 40.0, at(1, 8), SessionSource::Timer).unwrap();
    engine.record_session("u", &broken.id, 40.0, at(1, 9), SessionSource::Timer).unwrap();
    let broken_before = engine.mastery_record("u", &broken.id).unwrap();

    fail_history_inserts(engine.db(), Some(&broken.id));
    let report = applied(engine.apply_daily_decay("u", day(8)).unwrap());

    assert_eq!(report.decayed.len(), 1);
    assert_eq!(report.decayed[0].technique_id, ok.id);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].technique_id, broken.id);
    // Neither the record nor its history moved for the failed technique.
    assert_eq!(engine.mastery_record("u", &broken.id).unwrap(), broken_before);
    assert_eq!(engine.mastery_history("u", &broken.id).unwrap().len(), 1);
}

#[test]
fn decay_resets_broken_streak() {
    let engine = engine();
    let t = engine.create_technique("u", "Breath", "", at(1, 7)).unwrap();
    engine.record_session("u", &t.id, 10.0, at(1, 8), SessionSource::Timer).unwrap();
    engine.record_session("u", &t.id, 10.0, at(2, 8), SessionSource::Timer).unwrap();

    let report = applied(engine.apply_daily_decay("u", day(3)).unwrap());
    assert!(!report.streak_reset);
    let report = applied(engine.apply_daily_decay("u", day(5)).unwrap());
    assert!(report.streak_reset);
    assert_eq!(engine.db().streak_state("u").unwrap().streak, 0);

    let next = engine.record_session("u", &t.id, 10.0, at(6, 8), SessionSource::Timer).unwrap();
    assert_eq!(next.streak, 1);
}

#[test]
fn decay_with_no_techniques_is_a_noop() {
    let engine = engine();
    let report = applied(engine.apply_daily_decay("nobody", day(3)).unwrap());
    assert!(report.decayed.is_empty());
    assert!(report.failed.is_empty());
}

#[test]
fn busy_store_is_reported_as_transient() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("busy.db");

    let holder = Database::open_at(&path).unwrap();
    let setup = MasteryEngine::new(Database::open_at(&path).unwrap(), Config::default());
    let t = setup.create_technique("u", "Breath", "", at(1, 7)).unwrap();

    let contender = Database::open_at(&path).unwrap();
    contender
        .conn()
        .busy_timeout(std::time::Duration::ZERO)
        .unwrap();
    let engine = MasteryEngine::new(contender, Config::default());

    holder.conn().execute_batch("BEGIN IMMEDIATE;").unwrap();
    let err = engine
        .record_session("u", &t.id, 10.0, at(1, 8), SessionSource::Timer)
        .unwrap_err();
    assert!(err.is_retryable(), "{err}");
    holder.conn().execute_batch("ROLLBACK;").unwrap();

    // Retrying once the lock is gone succeeds.
    engine
        .record_session("u", &t.id, 10.0, at(1, 8), SessionSource::Timer)
        .unwrap();
}

#[test]
fn deleting_technique_removes_its_mastery() {
    let engine = engine();
    let t = engine.create_technique("u", "Breath", "", at(1, 7)).unwrap();
    engine.record_session("u", &t.id, 10.0, at(1, 8), SessionSource::Timer).unwrap();
    engine.delete_technique("u", &t.id).unwrap();

    assert!(matches!(
        engine.mastery_record("u", &t.id),
        Err(CoreError::NotFound { .. })
    ));
    assert!(matches!(
        engine.mastery_history("u", &t.id),
        Err(CoreError::NotFound { .. })
    ));
    assert!(engine.list_sessions("u", None).unwrap().is_empty());
}

#[test]
fn many_days_of_practice_accumulate() {
    let engine = engine();
    let t = engine.create_technique("u", "Breath", "", at(1, 7)).unwrap();
    let mut last = 0.0;
    for d in 1..=20 {
        let out = engine
            .record_session("u", &t.id, 30.0, at(d, 6) + Duration::minutes(30), SessionSource::Timer)
            .unwrap();
        assert!(out.cumulative_effective_minutes > last);
        assert_eq!(out.streak, d);
        last = out.cumulative_effective_minutes;
        engine.apply_daily_decay("u", day(d)).unwrap();
    }
    let record = engine.mastery_record("u", &t.id).unwrap();
    assert_eq!(record.cumulative_effective_minutes, last);
}

#[test]
fn decay_refreshes_user_streak_on_every_record() {
    let engine = engine();
    let a = engine.create_technique("u", "Breath", "", at(1, 7)).unwrap();
    let b = engine.create_technique("u", "Koan", "", at(1, 7)).unwrap();
    engine.record_session("u", &a.id, 10.0, at(1, 8), SessionSource::Timer).unwrap();
    engine.record_session("u", &b.id, 10.0, at(2, 8), SessionSource::Timer).unwrap();
    engine.record_session("u", &b.id, 10.0, at(3, 8), SessionSource::Timer).unwrap();

    engine.apply_daily_decay("u", day(4)).unwrap();
    assert_eq!(engine.mastery_record("u", &a.id).unwrap().streak, 3);
    assert_eq!(engine.mastery_record("u", &b.id).unwrap().streak, 3);

    let report = applied(engine.apply_daily_decay("u", day(10)).unwrap());
    assert!(report.streak_reset);
    assert_eq!(engine.streak("u", day(10)).unwrap(), 0);
    for record in engine.list_mastery("u").unwrap() {
        assert_eq!(record.streak, 0, "{}", record.technique_id);
    }
}

#[test]
fn one_catch_up_run_matches_nightly_runs() {
    fn seed(engine: &MasteryEngine) -> (String, String) {
        let a = engine.create_technique("u", "Breath", "", at(1, 7)).unwrap();
        let b = engine.create_technique("u", "Koan", "", at(1, 7)).unwrap();
        engine.record_session("u", &a.id, 600.0, at(1, 8), SessionSource::Timer).unwrap();
        (a.id, b.id)
    }

    let nightly = engine();
    let (nightly_a, nightly_b) = seed(&nightly);
    for d in 2..=9 {
        nightly.apply_daily_decay("u", day(d)).unwrap();
    }
    nightly.record_session("u", &nightly_b, 10.0, at(10, 8), SessionSource::Timer).unwrap();
    nightly.apply_daily_decay("u", day(10)).unwrap();

    let caught_up = engine();
    let (caught_up_a, caught_up_b) = seed(&caught_up);
    caught_up.record_session("u", &caught_up_b, 10.0, at(10, 8), SessionSource::Timer).unwrap();
    let report = applied(caught_up.apply_daily_decay("u", day(10)).unwrap());
    let step = report.decayed.iter().find(|d| d.technique_id == caught_up_a).unwrap();
    assert_eq!(step.days_applied, 9);

    let expected = nightly.mastery_record("u", &nightly_a).unwrap().cumulative_effective_minutes;
    let actual = caught_up.mastery_record("u", &caught_up_a).unwrap().cumulative_effective_minutes;
    assert!((expected - actual).abs() < 1e-9, "nightly {expected} vs catch-up {actual}");
}

#[test]
fn decay_on_first_day_back_keeps_new_streak() {
    let engine = engine();
    let t = engine.create_technique("u", "Breath", "", at(1, 7)).unwrap();
    engine.record_session("u", &t.id, 10.0, at(1, 8), SessionSource::Timer).unwrap();
    engine.record_session("u", &t.id, 10.0, at(5, 8), SessionSource::Timer).unwrap();

    let report = applied(engine.apply_daily_decay("u", day(5)).unwrap());
    assert!(!report.streak_reset);
    assert_eq!(
        engine.db().streak_state("u").unwrap(),
        StreakState::new(1, Some(day(5)))
    );

    let next = engine.record_session("u", &t.id, 10.0, at(6, 8), SessionSource::Timer).unwrap();
    assert_eq!(next.streak, 2);
}

#[test]
fn decay_takes_the_write_lock_before_touching_the_streak() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("decay-lock.db");

    let setup = MasteryEngine::new(Database::open_at(&path).unwrap(), Config::default());
    let t = setup.create_technique("u", "Breath", "", at(1, 7)).unwrap();
    setup.record_session("u", &t.id, 10.0, at(1, 8), SessionSource::Timer).unwrap();

    let holder = Database::open_at(&path).unwrap();
    let contender = Database::open_at(&path).unwrap();
    contender
        .conn()
        .busy_timeout(std::time::Duration::ZERO)
        .unwrap();
    let engine = MasteryEngine::new(contender, Config::default());

    holder.conn().execute_batch("BEGIN IMMEDIATE;").unwrap();
    let err = engine.apply_daily_decay("u", day(9)).unwrap_err();
    assert!(err.is_retryable(), "{err}");
    holder.conn().execute_batch("ROLLBACK;").unwrap();

    assert_eq!(setup.db().streak_state("u").unwrap().streak, 1);
    let report = applied(engine.apply_daily_decay("u", day(9)).unwrap());
    assert!(report.streak_reset);
}
