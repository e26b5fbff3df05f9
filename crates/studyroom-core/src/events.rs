use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ledger::SessionLedger;
use crate::timer::{TimerSettings, TimerSnapshot};

/// Unique identifier for a user. Engines live as long as the user id, not
/// the connection.
pub type UserId = String;

/// Every state change on a user's engine produces exactly one Event.
/// Each variant carries enough to re-render without querying back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Live progress: start, pause and every second while running.
    TimerTick {
        user_id: UserId,
        state: TimerSnapshot,
        at: DateTime<Utc>,
    },
    /// A session ran to zero and the mode flipped.
    TimerComplete {
        user_id: UserId,
        state: TimerSnapshot,
        ledger: SessionLedger,
        at: DateTime<Utc>,
    },
    SettingsChanged {
        user_id: UserId,
        settings: TimerSettings,
        state: TimerSnapshot,
        at: DateTime<Utc>,
    },
    /// The ledger changed outside a natural completion (skip, reset, mode
    /// change, rollover).
    UserDataChanged {
        user_id: UserId,
        state: TimerSnapshot,
        ledger: SessionLedger,
        at: DateTime<Utc>,
    },
}

impl Event {
    pub fn user_id(&self) -> &str {
        match self {
            Event::TimerTick { user_id, .. }
            | Event::TimerComplete { user_id, .. }
            | Event::SettingsChanged { user_id, .. }
            | Event::UserDataChanged { user_id, .. } => user_id,
        }
    }

    pub fn state(&self) -> &TimerSnapshot {
        match self {
            Event::TimerTick { state, .. }
            | Event::TimerComplete { state, .. }
            | Event::SettingsChanged { state, .. }
            | Event::UserDataChanged { state, .. } => state,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Event::TimerTick { .. } => "timer_tick",
            Event::TimerComplete { .. } => "timer_complete",
            Event::SettingsChanged { .. } => "settings_changed",
            Event::UserDataChanged { .. } => "user_data_changed",
        }
    }
}
