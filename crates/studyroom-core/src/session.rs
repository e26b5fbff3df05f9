//! One user's timer engine paired with their session ledger.
//!
//! Every public operation starts with [`UserSession::check_and_rollover`], so
//! a session that slept through any number of days lands on today in a
//! single step. Operations return the one [`Event`] they produced, or `None`
//! when the command was a policy no-op.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::events::{Event, UserId};
use crate::ledger::{
    DeadTimeDetector, DeadTimeGap, EntrySource, SessionEntry, SessionLedger, UserTimezone,
};
use crate::storage::snapshot::{TimerRecord, UserSnapshot, SNAPSHOT_VERSION};
use crate::timer::{TimerEngine, TimerMode, TimerSettings, TimerSnapshot};

/// Longest session length accepted from persisted settings (one day).
const MAX_RESTORED_MINUTES: u32 = 24 * 60;

/// What a scheduler tick did to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// The timer was not running; the tick registration is stale.
    Ignored,
    /// One second elapsed.
    Progress(Event),
    /// The countdown hit zero and the session was recorded.
    Completed { event: Event, auto_start: bool },
    /// A day boundary stopped the timer.
    Stopped(Event),
}

/// Display read of a user's state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserView {
    pub user_id: UserId,
    pub online: bool,
    pub timezone: UserTimezone,
    pub settings: TimerSettings,
    pub state: TimerSnapshot,
    pub ledger: SessionLedger,
    /// Minutes spent in the uncommitted current session.
    pub in_progress_minutes: f64,
    pub gaps: Vec<DeadTimeGap>,
}

#[derive(Debug, Clone)]
pub struct UserSession {
    user_id: UserId,
    engine: TimerEngine,
    ledger: SessionLedger,
    timezone: UserTimezone,
    online: bool,
    last_activity: DateTime<Utc>,
}

impl UserSession {
    pub fn new(
        user_id: impl Into<UserId>,
        settings: TimerSettings,
        timezone: UserTimezone,
        now: DateTime<Utc>,
    ) -> Self {
        let ledger = SessionLedger::new(timezone.local_date(now));
        Self {
            user_id: user_id.into(),
            engine: TimerEngine::new(settings),
            ledger,
            timezone,
            online: false,
            last_activity: now,
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn engine(&self) -> &TimerEngine {
        &self.engine
    }

    pub fn ledger(&self) -> &SessionLedger {
        &self.ledger
    }

    pub fn timezone(&self) -> &UserTimezone {
        &self.timezone
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn is_active(&self) -> bool {
        self.engine.is_active()
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_activity
    }

    /// Callers should refuse a mode change while this is `false`; the
    /// session itself flushes partial credit either way.
    pub fn can_change_mode(&self) -> bool {
        !self.engine.in_progress()
    }

    // ── Rollover guard ───────────────────────────────────────────────

    /// Archive the ledger if the user's local date moved past its key.
    ///
    /// An in-progress session is flushed into the old day first and the
    /// timer always ends up in `FocusPaused`. Returns whether a rollover
    /// happened; calling again with the same `now` does nothing.
    pub fn check_and_rollover(&mut self, now: DateTime<Utc>) -> bool {
        let today = self.timezone.local_date(now);
        let current = self.ledger.local_date_key();
        if today <= current {
            if today < current {
                debug!(user = %self.user_id, %today, %current, "local date behind ledger, not rolling back");
            }
            return false;
        }

        if self.engine.in_progress() {
            let ended_at = self.timezone.end_of_day(current).min(now);
            self.flush_partial(ended_at, EntrySource::EndOfDay);
        }
        let sessions = self.ledger.completed_session_count();
        let focus_minutes = self.ledger.accumulated_focus_minutes();
        self.ledger.roll_over(today);
        self.engine.switch_to(TimerMode::Focus);

        info!(
            user = %self.user_id,
            from = %current,
            to = %today,
            sessions,
            focus_minutes,
            "daily rollover"
        );
        true
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Start ticking. Ignored while offline or already running.
    pub fn start(&mut self, now: DateTime<Utc>) -> Option<Event> {
        let rolled = self.begin(now);
        let started = self.online && self.engine.activate();
        self.state_event(rolled, started, now)
    }

    pub fn pause(&mut self, now: DateTime<Utc>) -> Option<Event> {
        let rolled = self.begin(now);
        let paused = self.engine.deactivate();
        self.state_event(rolled, paused, now)
    }

    /// Scheduler-only: consume one second.
    pub fn tick(&mut self, now: DateTime<Utc>) -> TickOutcome {
        if self.check_and_rollover(now) {
            return TickOutcome::Stopped(self.user_data_changed(now));
        }
        if !self.engine.is_active() {
            return TickOutcome::Ignored;
        }
        if self.engine.decrement() {
            let auto_start = self.complete(now, EntrySource::Timer);
            return TickOutcome::Completed {
                event: self.timer_complete(now),
                auto_start,
            };
        }
        TickOutcome::Progress(self.timer_tick(now))
    }

    /// Back to a full, paused focus session. Time already spent is kept as a
    /// partial entry.
    pub fn reset(&mut self, now: DateTime<Utc>) -> Option<Event> {
        self.begin(now);
        self.flush_partial(now, EntrySource::Reset);
        self.engine.switch_to(TimerMode::Focus);
        Some(self.user_data_changed(now))
    }

    pub fn change_mode(&mut self, target: TimerMode, now: DateTime<Utc>) -> Option<Event> {
        self.begin(now);
        self.flush_partial(now, EntrySource::ModeChange);
        self.engine.switch_to(target);
        Some(self.user_data_changed(now))
    }

    /// End the current session early and move to the opposite mode.
    ///
    /// `from` guards against stale clients: when given, it must match the
    /// current mode or the command is ignored.
    pub fn skip_to_opposite(&mut self, from: Option<TimerMode>, now: DateTime<Utc>) -> Option<Event> {
        let rolled = self.begin(now);
        if from.is_some_and(|mode| mode != self.engine.mode()) {
            return rolled.then(|| self.user_data_changed(now));
        }
        self.flush_partial(now, EntrySource::Skip);
        self.engine.advance();
        Some(self.user_data_changed(now))
    }

    /// Apply settings that the caller already sanitised.
    ///
    /// A paused session restarts at the new full length, so time already
    /// spent in it is kept as a partial entry first.
    pub fn update_settings(&mut self, settings: TimerSettings, now: DateTime<Utc>) -> Option<Event> {
        self.begin(now);
        if !self.engine.is_active() {
            self.flush_partial(now, EntrySource::Settings);
        }
        self.engine.apply_settings(settings);
        Some(Event::SettingsChanged {
            user_id: self.user_id.clone(),
            settings,
            state: self.engine.snapshot(),
            at: now,
        })
    }

    /// Track presence. Going offline pauses a running timer with its exact
    /// remaining time; coming back never resumes it.
    pub fn set_online(&mut self, online: bool, now: DateTime<Utc>) -> Option<Event> {
        let rolled = self.begin(now);
        self.online = online;
        let paused = !online && self.engine.deactivate();
        self.state_event(rolled, paused, now)
    }

    pub fn set_timezone(&mut self, timezone: UserTimezone) {
        self.timezone = timezone;
    }

    /// Display read. Applies the rollover guard, so the returned flag tells
    /// the caller whether state changed underneath.
    pub fn view(&mut self, now: DateTime<Utc>, detector: &DeadTimeDetector) -> (UserView, bool) {
        let rolled = self.check_and_rollover(now);
        let elapsed = self.engine.elapsed_seconds();
        let in_progress_start = (elapsed > 0).then(|| now - Duration::seconds(i64::from(elapsed)));
        let day_start = self.timezone.start_of_day(self.ledger.local_date_key());
        let gaps = detector.find_gaps(self.ledger.session_history(), day_start, in_progress_start);
        let view = UserView {
            user_id: self.user_id.clone(),
            online: self.online,
            timezone: self.timezone.clone(),
            settings: *self.engine.settings(),
            state: self.engine.snapshot(),
            ledger: self.ledger.clone(),
            in_progress_minutes: f64::from(elapsed) / 60.0,
            gaps,
        };
        (view, rolled)
    }

    /// Rollover check for background sweeps. Emits only when the ledger moved.
    pub fn sweep_rollover(&mut self, now: DateTime<Utc>) -> Option<Event> {
        self.check_and_rollover(now)
            .then(|| self.user_data_changed(now))
    }

    // ── Crash recovery ───────────────────────────────────────────────

    /// Credit `seconds` of estimated outage progress. If that empties the
    /// countdown, a completion tagged as downtime is recorded at
    /// `completed_at`. Returns whether a completion was synthesised.
    pub fn absorb_outage(&mut self, seconds: u32, completed_at: DateTime<Utc>) -> bool {
        self.engine.consume(seconds);
        if self.engine.remaining_seconds() > 0 {
            return false;
        }
        self.complete(completed_at, EntrySource::Downtime);
        true
    }

    // ── Persistence ──────────────────────────────────────────────────

    pub fn to_snapshot(&self, saved_at: DateTime<Utc>) -> UserSnapshot {
        UserSnapshot {
            version: SNAPSHOT_VERSION,
            user_id: self.user_id.clone(),
            settings: *self.engine.settings(),
            timer: TimerRecord {
                mode: self.engine.mode(),
                remaining_seconds: Some(i64::from(self.engine.remaining_seconds())),
                was_active: self.engine.is_active(),
                session_sequence: self.engine.session_sequence(),
            },
            ledger: Some(self.ledger.clone()),
            timezone: self.timezone.clone(),
            last_activity: Some(self.last_activity),
            last_save_timestamp: Some(saved_at),
        }
    }

    /// Rebuild a paused, offline session. Returns whether anything had to be
    /// repaired.
    pub fn from_snapshot(snapshot: UserSnapshot, now: DateTime<Utc>) -> (Self, bool) {
        let settings = snapshot.settings.sanitized(1, MAX_RESTORED_MINUTES);
        let mut repaired = settings != snapshot.settings;

        let (engine, engine_repaired) = TimerEngine::restore(
            settings,
            snapshot.timer.mode,
            snapshot.timer.remaining_seconds,
            snapshot.timer.session_sequence,
        );
        repaired |= engine_repaired;

        let reference = snapshot.last_save_timestamp.unwrap_or(now);
        let ledger = match snapshot.ledger {
            Some(mut ledger) => {
                repaired |= ledger.repair();
                ledger
            }
            None => {
                repaired = true;
                SessionLedger::new(snapshot.timezone.local_date(reference))
            }
        };

        let session = Self {
            user_id: snapshot.user_id,
            engine,
            ledger,
            timezone: snapshot.timezone,
            online: false,
            last_activity: snapshot.last_activity.unwrap_or(reference),
        };
        (session, repaired)
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn begin(&mut self, now: DateTime<Utc>) -> bool {
        self.last_activity = now;
        self.check_and_rollover(now)
    }

    /// Record time already spent in the current session as a partial entry.
    fn flush_partial(&mut self, at: DateTime<Utc>, source: EntrySource) -> bool {
        let elapsed = self.engine.elapsed_seconds();
        if elapsed == 0 {
            return false;
        }
        self.ledger
            .record(SessionEntry::partial(self.engine.mode(), elapsed, at, source))
    }

    /// Record a full session, flip the mode and report whether the next
    /// session should start by itself.
    fn complete(&mut self, at: DateTime<Utc>, source: EntrySource) -> bool {
        let mode = self.engine.mode();
        let minutes = self.engine.settings().minutes_for(mode);
        self.ledger
            .record(SessionEntry::full(mode, minutes, at, source));
        self.engine.advance();
        self.online && self.engine.settings().auto_starts(self.engine.mode())
    }

    /// Event for a start/pause style command. A rollover outranks the plain
    /// tick because the ledger changed too.
    fn state_event(&self, rolled: bool, changed: bool, now: DateTime<Utc>) -> Option<Event> {
        if rolled {
            Some(self.user_data_changed(now))
        } else if changed {
            Some(self.timer_tick(now))
        } else {
            None
        }
    }

    fn timer_tick(&self, now: DateTime<Utc>) -> Event {
        Event::TimerTick {
            user_id: self.user_id.clone(),
            state: self.engine.snapshot(),
            at: now,
        }
    }

    fn timer_complete(&self, now: DateTime<Utc>) -> Event {
        Event::TimerComplete {
            user_id: self.user_id.clone(),
            state: self.engine.snapshot(),
            ledger: self.ledger.clone(),
            at: now,
        }
    }

    fn user_data_changed(&self, now: DateTime<Utc>) -> Event {
        Event::UserDataChanged {
            user_id: self.user_id.clone(),
            state: self.engine.snapshot(),
            ledger: self.ledger.clone(),
            at: now,
        }
    }
}
