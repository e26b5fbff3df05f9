//! Clocks and the per-engine tick task.
//!
//! Each running engine owns exactly one [`TickRegistration`]. The task it
//! wraps fires once per [`TICK_PERIOD`] and asks its callback whether to keep
//! going. Cancellation is `abort()` plus a generation number that the
//! callback compares under the engine lock, so a tick that was already
//! queued when the timer paused does nothing.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// One countdown second.
pub const TICK_PERIOD: Duration = Duration::from_secs(1);

/// Source of wall-clock time for ledger timestamps and day boundaries.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Settable clock for tests and replays.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|p| p.into_inner()) = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(|p| p.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Returned by periodic callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickControl {
    Continue,
    Stop,
}

/// Handle to a running tick task.
///
/// Dropping the registration detaches the task without stopping it; the
/// task stops itself once its callback sees a newer generation.
#[derive(Debug)]
pub struct TickRegistration {
    generation: u64,
    handle: JoinHandle<()>,
}

impl TickRegistration {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn cancel(self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Run `f` every `period`, first after one full period, until it returns
/// [`TickControl::Stop`].
pub fn spawn_periodic<F, Fut>(period: Duration, mut f: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = TickControl> + Send + 'static,
{
    // Anchor to the caller's instant, not the task's first poll.
    let first = Instant::now() + period;
    tokio::spawn(async move {
        let mut ticker = interval_at(first, period);
        // A stalled runtime still owes the countdown every second it missed.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);
        loop {
            ticker.tick().await;
            if f().await == TickControl::Stop {
                break;
            }
        }
    })
}

/// Spawn the one-second ticker for an engine.
pub fn spawn_ticker<F, Fut>(generation: u64, f: F) -> TickRegistration
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = TickControl> + Send + 'static,
{
    TickRegistration {
        generation,
        handle: spawn_periodic(TICK_PERIOD, f),
    }
}

/// Run `fut` once after `delay`.
pub fn spawn_delayed<Fut>(delay: Duration, fut: Fut) -> JoinHandle<()>
where
    Fut: Future<Output = ()> + Send + 'static,
{
    let deadline = Instant::now() + delay;
    tokio::spawn(async move {
        tokio::time::sleep_until(deadline).await;
        fut.await;
    })
}
