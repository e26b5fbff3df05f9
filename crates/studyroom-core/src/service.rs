//! The running timer service.
//!
//! [`TimerService`] is a cheap, clonable handle. Commands are
//! fire-and-forget: each takes the user's lock, runs the session operation,
//! reconciles the tick task with the engine's running flag and emits the
//! resulting event before the lock is released.
//!
//! Background workers (snapshots, midnight sweep, retention) are started
//! with [`TimerService::spawn_background`] and stopped by
//! [`TimerService::shutdown`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::{DatabaseError, Result};
use crate::events::{Event, UserId};
use crate::ledger::{DeadTimeDetector, UserTimezone};
use crate::recovery::{RecoveryEstimator, RecoveryReport};
use crate::scheduler::{self, Clock, SystemClock, TickControl};
use crate::session::{TickOutcome, UserSession, UserView};
use crate::storage::{Config, SnapshotStore, UserSnapshot};
use crate::store::{ConnectionTable, UserHandle, UserSlot, UserStore};
use crate::timer::{TimerMode, TimerSettings};

struct Inner {
    config: Config,
    clock: Arc<dyn Clock>,
    users: UserStore,
    connections: ConnectionTable,
    snapshots: Option<Arc<dyn SnapshotStore>>,
    detector: DeadTimeDetector,
    workers: StdMutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

#[derive(Clone)]
pub struct TimerService {
    inner: Arc<Inner>,
}

impl TimerService {
    /// Service on the system clock.
    pub fn new(config: Config, snapshots: Option<Arc<dyn SnapshotStore>>) -> Self {
        Self::with_clock(config, Arc::new(SystemClock), snapshots)
    }

    pub fn with_clock(
        config: Config,
        clock: Arc<dyn Clock>,
        snapshots: Option<Arc<dyn SnapshotStore>>,
    ) -> Self {
        let detector = DeadTimeDetector::new().with_threshold(config.analytics.dead_time_threshold_minutes);
        let users = UserStore::new(config.events.channel_capacity);
        Self {
            inner: Arc::new(Inner {
                config,
                clock,
                users,
                connections: ConnectionTable::new(),
                snapshots,
                detector,
                workers: StdMutex::new(Vec::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn users(&self) -> &UserStore {
        &self.inner.users
    }

    pub fn connections(&self) -> &ConnectionTable {
        &self.inner.connections
    }

    // ── Startup ──────────────────────────────────────────────────────

    /// Load every snapshot and rebuild sessions, estimating outage progress.
    /// Restored sessions are paused and offline.
    ///
    /// # Errors
    /// Returns an error if the snapshot store cannot be read at all.
    pub async fn restore(&self) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();
        let Some(store) = self.inner.snapshots.clone() else {
            return Ok(report);
        };

        let (snapshots, skipped) = tokio::task::spawn_blocking(move || store.load_all())
            .await
            .map_err(DatabaseError::from)??;
        report.skipped_count = skipped;

        let estimator = RecoveryEstimator::with_config(self.inner.config.recovery);
        let now = self.inner.clock.now();
        for snapshot in snapshots {
            let (session, outcome) = estimator.restore(snapshot, now);
            self.inner.users.insert(session).await;
            report.push(outcome);
        }

        info!(
            restored = report.restored_count,
            adjusted = report.adjusted_count,
            completed = report.completed_count,
            repaired = report.repaired_count,
            skipped = report.skipped_count,
            "restored timer state"
        );
        Ok(report)
    }

    /// Start the snapshot, midnight-sweep and retention workers.
    pub fn spawn_background(&self) {
        let mut handles = Vec::new();

        let service = self.clone();
        handles.push(tokio::spawn(async move {
            service.run_persistence_worker().await;
        }));

        let service = self.clone();
        handles.push(tokio::spawn(async move {
            service.run_rollover_worker().await;
        }));

        let service = self.clone();
        handles.push(tokio::spawn(async move {
            service.run_retention_worker().await;
        }));

        info!("background workers started");
        self.workers().extend(handles);
    }

    fn workers(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.inner.workers.lock().unwrap_or_else(|p| p.into_inner())
    }

    // ── Presence ─────────────────────────────────────────────────────

    /// Bind a connection to a user, creating the engine on first sight and
    /// marking the user online. A given timezone replaces the stored one.
    pub async fn connect(&self, conn: &str, user_id: &str, timezone: Option<&str>) -> Option<Event> {
        let resolved = UserTimezone::resolve(timezone);
        if let Some(previous) = self.inner.connections.insert(conn, user_id) {
            if previous != user_id {
                warn!(conn = %conn, from = %previous, to = %user_id, "connection rebound to another user");
                self.release_user(&previous).await;
            }
        }

        loop {
            let now = self.inner.clock.now();
            let defaults = self.inner.config.timer.settings();
            let (handle, created) = self
                .inner
                .users
                .get_or_insert_with(user_id, || {
                    UserSession::new(user_id, defaults, resolved.clone(), now)
                })
                .await;
            if created {
                info!(user = %user_id, timezone = %resolved.name(), "new user");
            }

            let mut slot = handle.lock().await;
            // A purge may have dropped this handle while we waited.
            if !self.inner.users.is_current(&handle).await {
                debug!(user = %user_id, "user purged during connect; recreating");
                continue;
            }
            let now = self.inner.clock.now();
            if timezone.is_some() {
                slot.session.set_timezone(resolved.clone());
            }
            let event = slot.session.set_online(true, now);
            return self.inner.settle(&handle, &mut slot, event);
        }
    }

    /// Drop a connection. When it was the user's last one the user goes
    /// offline and a running timer pauses.
    pub async fn disconnect(&self, conn: &str) -> Option<Event> {
        let user_id = self.inner.connections.remove(conn)?;
        self.release_user(&user_id).await
    }

    async fn release_user(&self, user_id: &str) -> Option<Event> {
        if self.inner.connections.connections_for(user_id) > 0 {
            return None;
        }
        let handle = self.inner.users.get(user_id).await?;
        let now = self.inner.clock.now();
        let mut slot = handle.lock().await;
        let event = slot.session.set_online(false, now);
        debug!(user = %user_id, "user offline");
        self.inner.settle(&handle, &mut slot, event)
    }

    pub async fn subscribe(&self, user_id: &str) -> Option<broadcast::Receiver<Event>> {
        Some(self.inner.users.get(user_id).await?.subscribe())
    }

    /// Every user's events on one channel.
    pub fn subscribe_all(&self) -> broadcast::Receiver<Event> {
        self.inner.users.subscribe_all()
    }

    // ── Commands ─────────────────────────────────────────────────────

    pub async fn start(&self, user_id: &str) -> Option<Event> {
        self.command(user_id, |session, now| session.start(now)).await
    }

    pub async fn pause(&self, user_id: &str) -> Option<Event> {
        self.command(user_id, |session, now| session.pause(now)).await
    }

    pub async fn reset(&self, user_id: &str) -> Option<Event> {
        self.command(user_id, |session, now| session.reset(now)).await
    }

    pub async fn change_mode(&self, user_id: &str, target: TimerMode) -> Option<Event> {
        self.command(user_id, |session, now| session.change_mode(target, now))
            .await
    }

    /// Like [`change_mode`](Self::change_mode), but refused (returns `None`)
    /// while the current session is running or partly used.
    pub async fn change_mode_when_idle(&self, user_id: &str, target: TimerMode) -> Option<Event> {
        self.command(user_id, |session, now| {
            // A rollover always leaves a fresh focus session behind.
            session.check_and_rollover(now);
            if !session.can_change_mode() {
                return None;
            }
            session.change_mode(target, now)
        })
        .await
    }

    pub async fn skip_to_opposite(&self, user_id: &str, from: Option<TimerMode>) -> Option<Event> {
        self.command(user_id, |session, now| session.skip_to_opposite(from, now))
            .await
    }

    /// Apply settings clamped to the configured bounds.
    pub async fn update_settings(&self, user_id: &str, settings: TimerSettings) -> Option<Event> {
        let settings = self.inner.config.timer.sanitize(settings);
        self.command(user_id, |session, now| session.update_settings(settings, now))
            .await
    }

    async fn command<F>(&self, user_id: &str, op: F) -> Option<Event>
    where
        F: FnOnce(&mut UserSession, DateTime<Utc>) -> Option<Event>,
    {
        let Some(handle) = self.inner.users.get(user_id).await else {
            debug!(user = %user_id, "command for unknown user ignored");
            return None;
        };
        let mut slot = handle.lock().await;
        let now = self.inner.clock.now();
        let event = op(&mut slot.session, now);
        self.inner.settle(&handle, &mut slot, event)
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// Display read. Emits `UserDataChanged` if the read rolled the day.
    pub async fn view(&self, user_id: &str) -> Option<UserView> {
        let handle = self.inner.users.get(user_id).await?;
        let mut slot = handle.lock().await;
        let now = self.inner.clock.now();
        let (view, rolled) = slot.session.view(now, &self.inner.detector);
        let event = rolled.then(|| Event::UserDataChanged {
            user_id: view.user_id.clone(),
            state: view.state.clone(),
            ledger: view.ledger.clone(),
            at: now,
        });
        self.inner.settle(&handle, &mut slot, event);
        Some(view)
    }

    // ── Maintenance ──────────────────────────────────────────────────

    /// Run the rollover guard on every engine. Returns how many rolled.
    pub async fn sweep_rollovers(&self) -> usize {
        let mut rolled = 0;
        for handle in self.inner.users.handles().await {
            let mut slot = handle.lock().await;
            let now = self.inner.clock.now();
            let event = slot.session.sweep_rollover(now);
            if event.is_some() {
                rolled += 1;
            }
            self.inner.settle(&handle, &mut slot, event);
        }
        if rolled > 0 {
            info!(rolled, "midnight sweep");
        }
        rolled
    }

    /// Forget users idle for longer than the retention window, together
    /// with their snapshots.
    pub async fn purge_inactive(&self) -> Vec<UserId> {
        let now = self.inner.clock.now();
        let removed = self
            .inner
            .users
            .purge_inactive(now, self.inner.config.retention.inactive_days)
            .await;
        if removed.is_empty() {
            return removed;
        }

        if let Some(store) = self.inner.snapshots.clone() {
            let ids = removed.clone();
            let result = tokio::task::spawn_blocking(move || {
                ids.iter().try_for_each(|id| store.remove(id))
            })
            .await;
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "failed to remove purged snapshots"),
                Err(e) => error!(error = %e, "snapshot removal task failed"),
            }
        }
        info!(count = removed.len(), "purged inactive users");
        removed
    }

    /// Write every session to the snapshot store. Returns how many were
    /// written.
    ///
    /// # Errors
    /// Returns an error if the store rejects the batch.
    pub async fn persist_now(&self) -> Result<usize> {
        let Some(store) = self.inner.snapshots.clone() else {
            return Ok(0);
        };
        let snapshots = self.collect_snapshots().await;
        let count = snapshots.len();
        if count == 0 {
            return Ok(0);
        }
        tokio::task::spawn_blocking(move || store.save_all(&snapshots))
            .await
            .map_err(DatabaseError::from)??;
        debug!(count, "snapshots written");
        Ok(count)
    }

    async fn collect_snapshots(&self) -> Vec<UserSnapshot> {
        let mut snapshots = Vec::new();
        for handle in self.inner.users.handles().await {
            let slot = handle.lock().await;
            snapshots.push(slot.session.to_snapshot(self.inner.clock.now()));
        }
        snapshots
    }

    async fn any_active(&self) -> bool {
        for handle in self.inner.users.handles().await {
            if handle.lock().await.session.is_active() {
                return true;
            }
        }
        false
    }

    /// Stop workers and tickers, pause running engines and write a final
    /// snapshot.
    pub async fn shutdown(&self) -> Result<usize> {
        self.inner.closed.store(true, Ordering::SeqCst);
        for worker in self.workers().drain(..) {
            worker.abort();
        }

        let now = self.inner.clock.now();
        for handle in self.inner.users.handles().await {
            let mut slot = handle.lock().await;
            slot.cancel_ticker();
            if let Some(event) = slot.session.pause(now) {
                handle.emit(event);
            }
        }

        let written = self.persist_now().await?;
        info!(written, "timer service stopped");
        Ok(written)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    // ── Workers ──────────────────────────────────────────────────────

    /// Snapshot on the short interval while anything is running, otherwise
    /// on the long one.
    async fn run_persistence_worker(&self) {
        let persistence = &self.inner.config.persistence;
        let mut ticker = interval(persistence.active_snapshot_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_save = Instant::now();

        loop {
            ticker.tick().await;
            let due = last_save.elapsed() >= persistence.snapshot_interval();
            if !due && !self.any_active().await {
                continue;
            }
            match self.persist_now().await {
                Ok(_) => last_save = Instant::now(),
                Err(e) => error!(error = %e, "snapshot write failed; keeping live state"),
            }
        }
    }

    async fn run_rollover_worker(&self) {
        let mut ticker = interval(self.inner.config.timer.rollover_sweep_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.sweep_rollovers().await;
        }
    }

    async fn run_retention_worker(&self) {
        let mut ticker = interval(self.inner.config.retention.sweep_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.purge_inactive().await;
        }
    }
}

impl Inner {
    /// Bring the tick task in line with the engine and emit `event`. Must be
    /// called with the user's slot locked.
    fn settle(
        self: &Arc<Self>,
        handle: &Arc<UserHandle>,
        slot: &mut UserSlot,
        event: Option<Event>,
    ) -> Option<Event> {
        let active = slot.session.is_active();
        match (&slot.ticker, active) {
            (None, true) => self.arm_ticker(handle, slot),
            (Some(_), false) => {
                slot.cancel_ticker();
            }
            _ => {}
        }
        if let Some(event) = &event {
            handle.emit(event.clone());
        }
        event
    }

    fn arm_ticker(self: &Arc<Self>, handle: &Arc<UserHandle>, slot: &mut UserSlot) {
        let generation = slot.next_generation();
        let inner = Arc::clone(self);
        let handle = Arc::clone(handle);
        slot.ticker = Some(scheduler::spawn_ticker(generation, move || {
            let inner = Arc::clone(&inner);
            let handle = Arc::clone(&handle);
            async move { inner.on_tick(&handle, generation).await }
        }));
    }

    async fn on_tick(self: &Arc<Self>, handle: &Arc<UserHandle>, generation: u64) -> TickControl {
        let mut slot = handle.lock().await;
        if slot.ticker.as_ref().map(|t| t.generation()) != Some(generation) {
            return TickControl::Stop;
        }

        let now = self.clock.now();
        match slot.session.tick(now) {
            TickOutcome::Progress(event) => {
                handle.emit(event);
                TickControl::Continue
            }
            TickOutcome::Completed { event, auto_start } => {
                slot.ticker = None;
                handle.emit(event);
                if auto_start {
                    let engine = slot.session.engine();
                    self.schedule_auto_start(handle, engine.session_sequence(), engine.mode());
                }
                TickControl::Stop
            }
            TickOutcome::Stopped(event) => {
                slot.ticker = None;
                handle.emit(event);
                TickControl::Stop
            }
            TickOutcome::Ignored => {
                slot.ticker = None;
                TickControl::Stop
            }
        }
    }

    /// Start the next session after the configured delay, unless the user
    /// moved on in the meantime.
    fn schedule_auto_start(self: &Arc<Self>, handle: &Arc<UserHandle>, sequence: u64, mode: TimerMode) {
        let inner = Arc::clone(self);
        let handle = Arc::clone(handle);
        scheduler::spawn_delayed(self.config.timer.auto_start_delay(), async move {
            if inner.closed.load(Ordering::SeqCst) {
                return;
            }
            let mut slot = handle.lock().await;
            let engine = slot.session.engine();
            if engine.session_sequence() != sequence || engine.mode() != mode || engine.is_active() {
                debug!(user = %handle.user_id(), "auto-start superseded");
                return;
            }
            let now = inner.clock.now();
            let event = slot.session.start(now);
            inner.settle(&handle, &mut slot, event);
        });
    }
}
