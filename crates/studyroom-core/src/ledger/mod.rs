//! Per-user session ledger.
//!
//! One ledger is "current" per user and belongs to a single local calendar
//! date. Entries are only ever appended; a rollover moves the day's
//! aggregates into `daily_history`, where they are never touched again.

mod gaps;
mod timezone;

pub use gaps::{DeadTimeDetector, DeadTimeGap, GapKind};
pub use timezone::UserTimezone;

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::timer::TimerMode;

/// Why a ledger entry was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntrySource {
    /// The countdown reached zero.
    Timer,
    /// Skipped to the opposite mode.
    Skip,
    /// Reset back to focus.
    Reset,
    /// Mode changed by the user.
    ModeChange,
    /// Session length changed while paused.
    Settings,
    /// Flushed at a local day boundary.
    EndOfDay,
    /// Completion inferred while the process was down.
    Downtime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEntry {
    pub id: Uuid,
    pub kind: TimerMode,
    /// Fractional minutes actually spent.
    pub duration_minutes: f64,
    pub completed_at: DateTime<Utc>,
    pub is_partial: bool,
    #[serde(default = "default_source")]
    pub source: EntrySource,
}

fn default_source() -> EntrySource {
    EntrySource::Timer
}

impl SessionEntry {
    pub fn full(kind: TimerMode, minutes: u32, completed_at: DateTime<Utc>, source: EntrySource) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            duration_minutes: f64::from(minutes),
            completed_at,
            is_partial: false,
            source,
        }
    }

    pub fn partial(
        kind: TimerMode,
        elapsed_seconds: u32,
        completed_at: DateTime<Utc>,
        source: EntrySource,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            duration_minutes: f64::from(elapsed_seconds) / 60.0,
            completed_at,
            is_partial: true,
            source,
        }
    }

    /// Estimated start: `completed_at - duration`.
    pub fn started_at(&self) -> DateTime<Utc> {
        let millis = (self.duration_minutes.max(0.0) * 60_000.0).round() as i64;
        self.completed_at - Duration::milliseconds(millis)
    }

    pub fn is_completed_during_downtime(&self) -> bool {
        self.source == EntrySource::Downtime
    }
}

/// The four aggregates describing one day.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DailySummary {
    #[serde(default)]
    pub completed_session_count: u32,
    #[serde(default)]
    pub session_history: Vec<SessionEntry>,
    #[serde(default)]
    pub accumulated_focus_minutes: f64,
    #[serde(default)]
    pub accumulated_break_minutes: f64,
}

impl DailySummary {
    pub fn total_minutes(&self) -> f64 {
        self.accumulated_focus_minutes + self.accumulated_break_minutes
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionLedger {
    local_date_key: NaiveDate,
    #[serde(default)]
    today: DailySummary,
    #[serde(default)]
    daily_history: BTreeMap<NaiveDate, DailySummary>,
}

impl SessionLedger {
    pub fn new(local_date_key: NaiveDate) -> Self {
        Self {
            local_date_key,
            today: DailySummary::default(),
            daily_history: BTreeMap::new(),
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn local_date_key(&self) -> NaiveDate {
        self.local_date_key
    }

    pub fn today(&self) -> &DailySummary {
        &self.today
    }

    pub fn completed_session_count(&self) -> u32 {
        self.today.completed_session_count
    }

    pub fn session_history(&self) -> &[SessionEntry] {
        &self.today.session_history
    }

    pub fn accumulated_focus_minutes(&self) -> f64 {
        self.today.accumulated_focus_minutes
    }

    pub fn accumulated_break_minutes(&self) -> f64 {
        self.today.accumulated_break_minutes
    }

    pub fn daily_history(&self) -> &BTreeMap<NaiveDate, DailySummary> {
        &self.daily_history
    }

    pub fn last_entry(&self) -> Option<&SessionEntry> {
        self.today.session_history.last()
    }

    // ── Mutations ────────────────────────────────────────────────────

    /// Append an entry and credit the matching aggregates.
    ///
    /// Entries without a positive, finite duration are dropped. Returns
    /// whether the entry was recorded.
    pub fn record(&mut self, entry: SessionEntry) -> bool {
        if !entry.duration_minutes.is_finite() || entry.duration_minutes <= 0.0 {
            return false;
        }
        match entry.kind {
            TimerMode::Focus => {
                self.today.completed_session_count += 1;
                self.today.accumulated_focus_minutes += entry.duration_minutes;
            }
            TimerMode::Break => {
                self.today.accumulated_break_minutes += entry.duration_minutes;
            }
        }
        self.today.session_history.push(entry);
        true
    }

    /// Archive the current day and start an empty ledger for `today`.
    ///
    /// Only moves forward: a `today` at or before the current key is
    /// ignored, which makes repeated calls with the same date a no-op.
    /// An already archived date is never overwritten.
    pub fn roll_over(&mut self, today: NaiveDate) -> bool {
        if today <= self.local_date_key {
            return false;
        }
        let finished = std::mem::take(&mut self.today);
        self.daily_history
            .entry(self.local_date_key)
            .or_insert(finished);
        self.local_date_key = today;
        true
    }

    /// Drop obviously broken aggregates after loading.
    ///
    /// Negative or non-finite accumulators are recomputed from the entries.
    pub fn repair(&mut self) -> bool {
        let bad = |v: f64| !v.is_finite() || v < 0.0;
        if !bad(self.today.accumulated_focus_minutes) && !bad(self.today.accumulated_break_minutes) {
            return false;
        }
        let entries = std::mem::take(&mut self.today.session_history);
        self.today = DailySummary::default();
        for entry in entries {
            self.record(entry);
        }
        tracing::warn!(
            date = %self.local_date_key,
            sessions = self.today.completed_session_count,
            "rebuilt corrupt ledger aggregates from history"
        );
        true
    }
}
