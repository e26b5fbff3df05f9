//! Snapshot storage and restart recovery against an on-disk database.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, TimeZone, Utc};
use studyroom_core::storage::SnapshotStore;
use studyroom_core::{
    Config, ManualClock, RecoveryAction, SnapshotDb, TimerMode, TimerService, TimerSettings,
    UserSession, UserTimezone,
};

fn noon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 9, 2, 12, 0, 0).unwrap()
}

fn short_config() -> Config {
    let mut config = Config::default();
    config.timer.focus_minutes = 2;
    config.timer.break_minutes = 1;
    config
}

async fn advance(secs: u64) {
    for _ in 0..secs {
        tokio::time::advance(StdDuration::from_secs(1)).await;
        tokio::task::yield_now().await;
    }
}

#[test]
fn test_snapshots_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("studyroom.db");

    let now = noon();
    let mut session = UserSession::new(
        "alice",
        TimerSettings::new(30, 5),
        UserTimezone::resolve(Some("America/New_York")),
        now,
    );
    session.set_online(true, now);
    session.skip_to_opposite(None, now);
    {
        let db = SnapshotDb::open(&path).unwrap();
        db.save_all(&[session.to_snapshot(now)]).unwrap();
    }

    let db = SnapshotDb::open(&path).unwrap();
    let (loaded, skipped) = db.load_all().unwrap();
    assert_eq!(skipped, 0);
    assert_eq!(loaded.len(), 1);
    let snapshot = &loaded[0];
    assert_eq!(snapshot.user_id, "alice");
    assert_eq!(snapshot.settings, TimerSettings::new(30, 5));
    assert_eq!(snapshot.timer.mode, TimerMode::Break);
    assert_eq!(snapshot.timezone.name(), "America/New_York");
}

#[test]
fn test_corrupt_countdown_is_repaired_on_load() {
    let db = SnapshotDb::open_memory().unwrap();
    let doc = r#"{
        "version": 1,
        "user_id": "bob",
        "settings": { "focus_minutes": 40, "break_minutes": 10 },
        "timer": { "mode": "focus", "remaining_seconds": "soon", "was_active": true },
        "timezone": "Not/AZone"
    }"#;
    db.put_raw("bob", doc, noon()).unwrap();

    let (mut loaded, _) = db.load_all().unwrap();
    let snapshot = loaded.pop().unwrap();
    let (session, repaired) = UserSession::from_snapshot(snapshot, noon());
    assert!(repaired);
    assert_eq!(session.engine().remaining_seconds(), 2400);
    assert_eq!(session.timezone(), &UserTimezone::utc());
    assert!(!session.is_active());
}

#[tokio::test(start_paused = true)]
async fn test_restart_estimates_progress_during_outage() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("studyroom.db");
    let clock = Arc::new(ManualClock::new(noon()));

    {
        let db: Arc<dyn SnapshotStore> = Arc::new(SnapshotDb::open(&path).unwrap());
        let service = TimerService::with_clock(short_config(), clock.clone(), Some(db));
        service.connect("c1", "alice", None).await;
        service.start("alice").await;
        advance(20).await;
        // Crash: only the periodic snapshot is on disk.
        assert_eq!(service.persist_now().await.unwrap(), 1);
    }

    clock.advance(Duration::seconds(150));
    let db: Arc<dyn SnapshotStore> = Arc::new(SnapshotDb::open(&path).unwrap());
    let service = TimerService::with_clock(short_config(), clock.clone(), Some(db));
    let report = service.restore().await.unwrap();

    assert_eq!(report.restored_count, 1);
    assert_eq!(report.adjusted_count, 1);
    assert_eq!(
        report.outcomes[0].action,
        RecoveryAction::Adjusted {
            gap_seconds: 150,
            elapsed_seconds: 75
        }
    );
    let view = service.view("alice").await.unwrap();
    assert_eq!(view.state.remaining_seconds, 120 - 20 - 75);
    assert!(!view.state.is_active);
    assert!(!view.online);
}

#[tokio::test(start_paused = true)]
async fn test_background_worker_snapshots_running_timers() {
    let db = Arc::new(SnapshotDb::open_memory().unwrap());
    let store: Arc<dyn SnapshotStore> = db.clone();
    let clock = Arc::new(ManualClock::new(noon()));
    let service = TimerService::with_clock(short_config(), clock, Some(store));
    service.connect("c1", "alice", None).await;
    service.start("alice").await;
    service.spawn_background();

    advance(11).await;
    // The write runs on the blocking pool.
    for _ in 0..50 {
        if db.get_raw("alice").unwrap().is_some() {
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(10)).await;
    }
    assert!(db.get_raw("alice").unwrap().is_some());
    service.shutdown().await.unwrap();
}
