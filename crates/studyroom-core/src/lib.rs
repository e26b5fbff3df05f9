//! # Studyroom Core Library
//!
//! Server-side focus/break timers for a shared study room. Each user owns
//! one countdown engine that keeps running across reconnects, a ledger of
//! completed and partial sessions for their local day, and an archive of
//! previous days. The `studyroom-cli` binary is a thin shell over this crate.
//!
//! ## Architecture
//!
//! - **Timer Engine**: a pure state machine over `{Focus, Break} x {Active, Paused}`
//!   that the scheduler advances one second at a time
//! - **Ledger**: per-user daily totals with timezone-aware rollover and
//!   dead-time gap detection
//! - **Service**: per-user locks, one tick task per running engine and
//!   broadcast event channels
//! - **Storage**: JSON snapshots in SQLite and TOML configuration
//! - **Recovery**: outage estimation when snapshots are restored
//!
//! ## Key Components
//!
//! - [`TimerEngine`]: countdown state machine
//! - [`UserSession`]: engine plus ledger with the rollover guard
//! - [`TimerService`]: the running service
//! - [`SnapshotDb`]: snapshot persistence
//! - [`Config`]: service configuration

pub mod error;
pub mod events;
pub mod ledger;
pub mod recovery;
pub mod scheduler;
pub mod service;
pub mod session;
pub mod storage;
pub mod store;
pub mod timer;

pub use error::{ConfigError, CoreError, DatabaseError};
pub use events::{Event, UserId};
pub use ledger::{
    DailySummary, DeadTimeDetector, DeadTimeGap, EntrySource, GapKind, SessionEntry,
    SessionLedger, UserTimezone,
};
pub use recovery::{RecoveryAction, RecoveryConfig, RecoveryEstimator, RecoveryReport};
pub use scheduler::{Clock, ManualClock, SystemClock};
pub use service::TimerService;
pub use session::{TickOutcome, UserSession, UserView};
pub use storage::{Config, SnapshotDb, SnapshotStore, UserSnapshot};
pub use store::{ConnectionTable, UserStore};
pub use timer::{TimerEngine, TimerMode, TimerPhase, TimerSettings, TimerSnapshot};
