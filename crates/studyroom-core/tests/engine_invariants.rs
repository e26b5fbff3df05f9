//! Property tests over arbitrary command sequences.

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;
use studyroom_core::{
    RecoveryEstimator, TickOutcome, TimerMode, TimerSettings, UserSession, UserTimezone,
};

#[derive(Debug, Clone)]
enum Op {
    Start,
    Pause,
    Reset,
    ChangeMode(TimerMode),
    Skip,
    Settings(u32, u32),
    Online(bool),
    /// Advance the clock by this many seconds, ticking each one.
    Ticks(u32),
    /// Jump the clock forward without ticking (idle time, day changes).
    Idle(i64),
}

fn arb_mode() -> impl Strategy<Value = TimerMode> {
    prop_oneof![Just(TimerMode::Focus), Just(TimerMode::Break)]
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Start),
        2 => Just(Op::Pause),
        1 => Just(Op::Reset),
        1 => arb_mode().prop_map(Op::ChangeMode),
        1 => Just(Op::Skip),
        1 => (1u32..5, 1u32..5).prop_map(|(f, b)| Op::Settings(f, b)),
        1 => any::<bool>().prop_map(Op::Online),
        4 => (1u32..400).prop_map(Op::Ticks),
        1 => (1i64..200_000).prop_map(Op::Idle),
    ]
}

fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 21, 0, 0).unwrap()
}

fn ledger_totals_match(session: &UserSession) -> bool {
    let ledger = session.ledger();
    let (focus, brk) = ledger
        .session_history()
        .iter()
        .fold((0.0, 0.0), |(f, b), e| match e.kind {
            TimerMode::Focus => (f + e.duration_minutes, b),
            TimerMode::Break => (f, b + e.duration_minutes),
        });
    (focus - ledger.accumulated_focus_minutes()).abs() < 1e-6
        && (brk - ledger.accumulated_break_minutes()).abs() < 1e-6
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Remaining time stays within `[0, full]`, only falls while active and
    /// never moves while paused.
    #[test]
    fn prop_countdown_is_monotonic(ops in prop::collection::vec(arb_op(), 1..40)) {
        let mut now = start_time();
        let mut session = UserSession::new("p", TimerSettings::new(2, 1), UserTimezone::utc(), now);
        session.set_online(true, now);

        for op in ops {
            match op {
                Op::Start => { session.start(now); }
                Op::Pause => { session.pause(now); }
                Op::Reset => { session.reset(now); }
                Op::ChangeMode(mode) => { session.change_mode(mode, now); }
                Op::Skip => { session.skip_to_opposite(None, now); }
                Op::Settings(f, b) => { session.update_settings(TimerSettings::new(f, b), now); }
                Op::Online(online) => { session.set_online(online, now); }
                Op::Ticks(n) => {
                    for _ in 0..n {
                        let before = session.engine().clone();
                        now += Duration::seconds(1);
                        match session.tick(now) {
                            TickOutcome::Progress(_) => {
                                prop_assert!(before.is_active());
                                prop_assert_eq!(session.engine().remaining_seconds() + 1, before.remaining_seconds());
                            }
                            TickOutcome::Completed { .. } => {
                                prop_assert_eq!(before.remaining_seconds(), 1);
                                prop_assert_eq!(session.engine().mode(), before.mode().opposite());
                                prop_assert_eq!(session.engine().remaining_seconds(), session.engine().full_seconds());
                            }
                            TickOutcome::Ignored => {
                                prop_assert!(!before.is_active());
                                prop_assert_eq!(session.engine().remaining_seconds(), before.remaining_seconds());
                            }
                            TickOutcome::Stopped(_) => {
                                prop_assert!(!session.is_active());
                                prop_assert_eq!(session.engine().mode(), TimerMode::Focus);
                            }
                        }
                    }
                }
                Op::Idle(secs) => { now += Duration::seconds(secs); }
            }
            let engine = session.engine();
            prop_assert!(engine.remaining_seconds() <= engine.full_seconds());
        }
    }

    /// Accumulators always equal the sum of today's entries, and no entry
    /// has zero length.
    #[test]
    fn prop_ledger_matches_history(ops in prop::collection::vec(arb_op(), 1..40)) {
        let mut now = start_time();
        let mut session = UserSession::new("p", TimerSettings::new(1, 1), UserTimezone::utc(), now);
        session.set_online(true, now);

        for op in ops {
            match op {
                Op::Start => { session.start(now); }
                Op::Pause => { session.pause(now); }
                Op::Reset => { session.reset(now); }
                Op::ChangeMode(mode) => { session.change_mode(mode, now); }
                Op::Skip => { session.skip_to_opposite(None, now); }
                Op::Settings(f, b) => { session.update_settings(TimerSettings::new(f, b), now); }
                Op::Online(online) => { session.set_online(online, now); }
                Op::Ticks(n) => {
                    for _ in 0..n {
                        now += Duration::seconds(1);
                        session.tick(now);
                    }
                }
                Op::Idle(secs) => { now += Duration::seconds(secs); }
            }
            prop_assert!(ledger_totals_match(&session));
            prop_assert!(session.ledger().session_history().iter().all(|e| e.duration_minutes > 0.0));
            for day in session.ledger().daily_history().keys() {
                prop_assert!(*day < session.ledger().local_date_key());
            }
        }
    }

    /// Rolling over twice at the same instant changes nothing the second time.
    #[test]
    fn prop_rollover_idempotent(days in 1i64..30, secs in 0i64..86_400) {
        let now = start_time();
        let mut session = UserSession::new("p", TimerSettings::new(25, 5), UserTimezone::utc(), now);
        session.set_online(true, now);
        session.skip_to_opposite(None, now);

        let later = now + Duration::days(days) + Duration::seconds(secs);
        session.check_and_rollover(later);
        let once = session.ledger().clone();
        prop_assert!(!session.check_and_rollover(later));
        prop_assert_eq!(session.ledger(), &once);
    }

    /// Recovery never leaves the countdown outside `[0, full]`.
    #[test]
    fn prop_recovery_stays_in_bounds(
        remaining in prop::option::of(-5_000i64..10_000),
        gap in 0i64..100_000,
        mode in arb_mode(),
    ) {
        let saved_at = start_time();
        let session = UserSession::new("p", TimerSettings::new(50, 10), UserTimezone::utc(), saved_at);
        let mut snapshot = session.to_snapshot(saved_at);
        snapshot.timer.mode = mode;
        snapshot.timer.remaining_seconds = remaining;

        let (restored, _) = RecoveryEstimator::new().restore(snapshot, saved_at + Duration::seconds(gap));
        let engine = restored.engine();
        prop_assert!(engine.remaining_seconds() <= engine.full_seconds());
        prop_assert!(!restored.is_active());
    }
}
