//! Crash recovery for restored timer snapshots.
//!
//! Timers never tick while the process is down, so a snapshot that is much
//! older than the restart may describe a session the user kept working on.
//! The estimator assumes at most `outage_active_factor` of the outage was
//! spent on the timer and never credits more than what remained.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::events::UserId;
use crate::session::UserSession;
use crate::storage::snapshot::UserSnapshot;

/// What recovery did for a single user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RecoveryAction {
    /// Snapshot was recent enough to restore as-is.
    Fresh { gap_seconds: i64 },
    /// Stale, but no session was mid-flight.
    Idle { gap_seconds: i64 },
    /// Part of the outage was credited to the running session.
    Adjusted { gap_seconds: i64, elapsed_seconds: u32 },
    /// The estimate ran the session to zero.
    CompletedDuringDowntime { gap_seconds: i64, elapsed_seconds: u32 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryOutcome {
    pub user_id: UserId,
    pub action: RecoveryAction,
    /// Corrupt persisted values were replaced with defaults.
    pub repaired: bool,
}

/// Summary of a restore pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecoveryReport {
    pub restored_count: usize,
    pub adjusted_count: usize,
    pub completed_count: usize,
    pub repaired_count: usize,
    /// Rows that could not be decoded at all.
    pub skipped_count: usize,
    pub outcomes: Vec<RecoveryOutcome>,
}

impl RecoveryReport {
    pub fn push(&mut self, outcome: RecoveryOutcome) {
        self.restored_count += 1;
        match outcome.action {
            RecoveryAction::Adjusted { .. } => self.adjusted_count += 1,
            RecoveryAction::CompletedDuringDowntime { .. } => self.completed_count += 1,
            RecoveryAction::Fresh { .. } | RecoveryAction::Idle { .. } => {}
        }
        if outcome.repaired {
            self.repaired_count += 1;
        }
        self.outcomes.push(outcome);
    }
}

/// Configuration for recovery behavior.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Snapshots older than this are treated as stale.
    #[serde(default = "default_stale_threshold_secs")]
    pub stale_threshold_secs: i64,
    /// Share of the outage assumed to have been spent on the timer.
    #[serde(default = "default_outage_active_factor")]
    pub outage_active_factor: f64,
}

fn default_stale_threshold_secs() -> i64 {
    120
}

fn default_outage_active_factor() -> f64 {
    0.5
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            stale_threshold_secs: default_stale_threshold_secs(),
            outage_active_factor: default_outage_active_factor(),
        }
    }
}

/// Estimator run once per snapshot at startup.
pub struct RecoveryEstimator {
    config: RecoveryConfig,
}

impl RecoveryEstimator {
    pub fn new() -> Self {
        Self {
            config: RecoveryConfig::default(),
        }
    }

    pub fn with_config(config: RecoveryConfig) -> Self {
        Self { config }
    }

    /// Seconds of outage progress to credit to a session.
    ///
    /// Zero unless the gap is stale and the session was mid-flight
    /// (`0 < remaining < full`). Never more than `remaining`.
    pub fn estimate(&self, remaining: u32, full: u32, gap_seconds: i64) -> u32 {
        if gap_seconds <= self.config.stale_threshold_secs {
            return 0;
        }
        if remaining == 0 || remaining >= full {
            return 0;
        }
        let factor = self.config.outage_active_factor.clamp(0.0, 1.0);
        let estimate = (gap_seconds as f64 * factor).floor();
        if estimate >= f64::from(remaining) {
            remaining
        } else {
            estimate.max(0.0) as u32
        }
    }

    /// Rebuild a session from its snapshot, applying the outage estimate.
    /// The returned session is always paused and offline.
    pub fn restore(&self, snapshot: UserSnapshot, now: DateTime<Utc>) -> (UserSession, RecoveryOutcome) {
        let saved_at = snapshot.last_save_timestamp;
        let (mut session, repaired) = UserSession::from_snapshot(snapshot, now);
        let user_id = session.user_id().to_string();

        let gap_seconds = saved_at
            .map(|t| (now - t).num_seconds().max(0))
            .unwrap_or(0);

        let engine = session.engine();
        let elapsed = self.estimate(engine.remaining_seconds(), engine.full_seconds(), gap_seconds);

        let action = if gap_seconds <= self.config.stale_threshold_secs {
            RecoveryAction::Fresh { gap_seconds }
        } else if elapsed == 0 {
            RecoveryAction::Idle { gap_seconds }
        } else {
            let completed_at = saved_at.unwrap_or(now) + Duration::seconds(i64::from(elapsed));
            if session.absorb_outage(elapsed, completed_at) {
                RecoveryAction::CompletedDuringDowntime {
                    gap_seconds,
                    elapsed_seconds: elapsed,
                }
            } else {
                RecoveryAction::Adjusted {
                    gap_seconds,
                    elapsed_seconds: elapsed,
                }
            }
        };

        match &action {
            RecoveryAction::Fresh { .. } | RecoveryAction::Idle { .. } => {
                tracing::debug!(user = %user_id, ?action, "restored timer");
            }
            _ => {
                tracing::info!(user = %user_id, ?action, "estimated timer progress during outage");
            }
        }

        let outcome = RecoveryOutcome {
            user_id,
            action,
            repaired,
        };
        (session, outcome)
    }
}

impl Default for RecoveryEstimator {
    fn default() -> Self {
        Self::new()
    }
}
