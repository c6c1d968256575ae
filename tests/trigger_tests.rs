use std::time::Duration;

use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::America::New_York;

use ingestd::runner::{JobSpec, SlotTracker, TriggerRule, WeekdaySet};

fn t(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

/// A New York wall-clock instant as UTC.
fn ny(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    New_York
        .with_ymd_and_hms(y, mo, d, h, mi, 0)
        .unwrap()
        .with_timezone(&Utc)
}

fn session_rule() -> TriggerRule {
    // Every 30 minutes, 09:30-16:00, weekdays, America/New_York.
    TriggerRule::every_minutes(30, t(9, 30), t(16, 0), WeekdaySet::weekdays(), New_York).unwrap()
}

fn session_job() -> JobSpec {
    JobSpec::new("intraday", "ingest_30m", 120, session_rule(), |_cancel| async {
        Ok(())
    })
}

#[test]
fn test_slot_inside_session_window() {
    // Wednesday 2024-01-10, 10:05 NY: the 10:00 slot is due.
    let slot = session_rule().due_slot(ny(2024, 1, 10, 10, 5)).unwrap();
    assert_eq!(slot, ny(2024, 1, 10, 10, 0));
}

#[test]
fn test_window_boundaries_are_inclusive() {
    let rule = session_rule();
    assert_eq!(
        rule.due_slot(ny(2024, 1, 10, 9, 30)).unwrap(),
        ny(2024, 1, 10, 9, 30)
    );
    assert_eq!(
        rule.due_slot(ny(2024, 1, 10, 16, 10)).unwrap(),
        ny(2024, 1, 10, 16, 0)
    );
}

#[test]
fn test_before_open_resolves_to_previous_session_close() {
    // 09:00 Wednesday: nothing has fired today, latest slot is Tuesday 16:00.
    let slot = session_rule().due_slot(ny(2024, 1, 10, 9, 0)).unwrap();
    assert_eq!(slot, ny(2024, 1, 9, 16, 0));
}

#[test]
fn test_weekend_resolves_to_friday_close() {
    // Saturday 2024-01-13 noon: the latest nominal slot is Friday 16:00.
    // Whether it still fires is the tracker's call, via the misfire grace.
    let slot = session_rule().due_slot(ny(2024, 1, 13, 12, 0)).unwrap();
    assert_eq!(slot, ny(2024, 1, 12, 16, 0));
}

#[test]
fn test_fresh_tracker_does_not_replay_stale_slot() {
    // An instance booted Saturday noon must not run Friday's 16:00 slot.
    let job = session_job();
    let tracker = SlotTracker::new();
    assert!(tracker.due(&job, ny(2024, 1, 13, 12, 0)).is_none());

    // Hours after the close on a trading day is just as stale.
    assert!(tracker.due(&job, ny(2024, 1, 10, 20, 0)).is_none());
}

#[test]
fn test_fresh_tracker_fires_slot_within_grace() {
    // Booted moments after a nominal slot: that slot still fires.
    let job = session_job();
    let tracker = SlotTracker::new();
    assert_eq!(
        tracker.due(&job, ny(2024, 1, 10, 10, 2)).unwrap(),
        ny(2024, 1, 10, 10, 0)
    );
}

#[test]
fn test_misfire_grace_is_configurable_per_job() {
    // The daily job tolerates an hour of staleness; 40 minutes past the
    // nominal time still fires, the next morning does not.
    let rule = TriggerRule::daily_at(t(16, 20), WeekdaySet::weekdays(), New_York).unwrap();
    let job = JobSpec::new("daily", "ingest_daily", 120, rule, |_cancel| async { Ok(()) })
        .with_misfire_grace(Duration::from_secs(3600));
    let tracker = SlotTracker::new();

    assert_eq!(
        tracker.due(&job, ny(2024, 1, 10, 17, 0)).unwrap(),
        ny(2024, 1, 10, 16, 20)
    );
    assert!(tracker.due(&job, ny(2024, 1, 11, 8, 0)).is_none());
}

#[test]
fn test_no_double_fire_for_one_slot() {
    let job = session_job();
    let mut tracker = SlotTracker::new();

    // Two evaluations in quick succession within the same nominal slot.
    let now = ny(2024, 1, 10, 10, 1);
    let slot = tracker.due(&job, now).unwrap();
    assert_eq!(slot, ny(2024, 1, 10, 10, 0));
    tracker.mark_fired(&job.name, slot);

    assert!(tracker.due(&job, now).is_none());
    assert!(tracker.due(&job, ny(2024, 1, 10, 10, 20)).is_none());

    // The next slot is a fresh fire.
    assert_eq!(
        tracker.due(&job, ny(2024, 1, 10, 10, 31)).unwrap(),
        ny(2024, 1, 10, 10, 30)
    );
}

#[test]
fn test_pause_spanning_slots_fires_once_with_no_catchup() {
    let job = session_job();
    let mut tracker = SlotTracker::new();

    let slot = tracker.due(&job, ny(2024, 1, 10, 10, 0)).unwrap();
    assert_eq!(slot, ny(2024, 1, 10, 10, 0));
    tracker.mark_fired(&job.name, slot);

    // Scheduler pauses past the 10:30, 11:00, and 11:30 slots. Only the
    // latest missed slot fires, exactly once.
    let resumed = ny(2024, 1, 10, 11, 35);
    let slot = tracker.due(&job, resumed).unwrap();
    assert_eq!(slot, ny(2024, 1, 10, 11, 30));
    tracker.mark_fired(&job.name, slot);
    assert!(tracker.due(&job, resumed).is_none());
}

#[test]
fn test_daily_trigger_fires_once_after_close() {
    let rule = TriggerRule::daily_at(t(16, 20), WeekdaySet::weekdays(), New_York).unwrap();

    // Before 16:20 the latest slot is yesterday's.
    assert_eq!(
        rule.due_slot(ny(2024, 1, 10, 16, 0)).unwrap(),
        ny(2024, 1, 9, 16, 20)
    );
    // After 16:20 today's slot is due.
    assert_eq!(
        rule.due_slot(ny(2024, 1, 10, 16, 25)).unwrap(),
        ny(2024, 1, 10, 16, 20)
    );
    // Sunday resolves back to Friday.
    assert_eq!(
        rule.due_slot(ny(2024, 1, 14, 12, 0)).unwrap(),
        ny(2024, 1, 12, 16, 20)
    );
}

#[test]
fn test_slots_are_canonical_across_dst_transition() {
    // US DST began 2024-03-10 (a Sunday); Monday 2024-03-11 trades on EDT.
    // The nominal 09:30 slot still maps to 09:30 local wall-clock time.
    let slot = session_rule().due_slot(ny(2024, 3, 11, 9, 45)).unwrap();
    assert_eq!(slot, ny(2024, 3, 11, 9, 30));
    let local = slot.with_timezone(&New_York);
    assert_eq!(local.time(), t(9, 30));
}

#[test]
fn test_independent_jobs_track_slots_independently() {
    let intraday = session_job().with_misfire_grace(Duration::from_secs(3600));
    let daily = JobSpec::new(
        "daily",
        "ingest_daily",
        120,
        TriggerRule::daily_at(t(16, 20), WeekdaySet::weekdays(), New_York).unwrap(),
        |_cancel| async { Ok(()) },
    )
    .with_misfire_grace(Duration::from_secs(3600));
    let mut tracker = SlotTracker::new();

    let now = ny(2024, 1, 10, 16, 30);
    let intraday_slot = tracker.due(&intraday, now).unwrap();
    tracker.mark_fired(&intraday.name, intraday_slot);

    // Marking one job fired leaves the other due.
    let daily_slot = tracker.due(&daily, now).unwrap();
    assert_eq!(daily_slot, ny(2024, 1, 10, 16, 20));
}
