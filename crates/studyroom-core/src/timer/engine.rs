//! Timer engine implementation.
//!
//! The engine is a second-granularity countdown state machine. It owns no
//! threads and no clock: the scheduler calls `decrement()` once per second
//! while the timer is active, and the owning [`UserSession`] decides what a
//! zero countdown means for the ledger.
//!
//! ## State Transitions
//!
//! ```text
//! FocusPaused <-> FocusActive
//!      ^               |
//!      |   complete / skip (sequence += 1)
//!      v               v
//! BreakActive <-> BreakPaused
//! ```
//!
//! [`UserSession`]: crate::session::UserSession

use serde::{Deserialize, Serialize};

use super::settings::{TimerMode, TimerSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerPhase {
    FocusActive,
    FocusPaused,
    BreakActive,
    BreakPaused,
}

/// Render-ready view of a timer, carried by every outbound event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerSnapshot {
    pub mode: TimerMode,
    pub phase: TimerPhase,
    pub remaining_seconds: u32,
    pub full_seconds: u32,
    pub is_active: bool,
    pub session_sequence: u64,
    /// 0.0 .. 1.0 progress within the current session.
    pub progress: f64,
}

/// Core timer engine for one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerEngine {
    settings: TimerSettings,
    mode: TimerMode,
    /// Whole seconds left; always within `[0, full_seconds()]`.
    remaining_seconds: u32,
    is_active: bool,
    session_sequence: u64,
}

impl TimerEngine {
    /// Create a new engine in `FocusPaused` with a full focus countdown.
    pub fn new(settings: TimerSettings) -> Self {
        Self {
            settings,
            mode: TimerMode::Focus,
            remaining_seconds: settings.full_seconds(TimerMode::Focus),
            is_active: false,
            session_sequence: 0,
        }
    }

    /// Rebuild an engine from persisted parts.
    ///
    /// `remaining_seconds` is `None` when the stored value was not a number.
    /// Anything missing, negative or larger than the mode's full duration is
    /// replaced by the full duration. The restored engine is always paused.
    /// Returns the engine and whether a repair was needed.
    pub fn restore(
        settings: TimerSettings,
        mode: TimerMode,
        remaining_seconds: Option<i64>,
        session_sequence: u64,
    ) -> (Self, bool) {
        let full = settings.full_seconds(mode);
        let (remaining, repaired) = match remaining_seconds {
            Some(secs) if secs >= 0 && secs <= i64::from(full) => (secs as u32, false),
            _ => (full, true),
        };
        let engine = Self {
            settings,
            mode,
            remaining_seconds: remaining,
            is_active: false,
            session_sequence,
        };
        (engine, repaired)
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn settings(&self) -> &TimerSettings {
        &self.settings
    }

    pub fn mode(&self) -> TimerMode {
        self.mode
    }

    pub fn remaining_seconds(&self) -> u32 {
        self.remaining_seconds
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn session_sequence(&self) -> u64 {
        self.session_sequence
    }

    pub fn full_seconds(&self) -> u32 {
        self.settings.full_seconds(self.mode)
    }

    /// Seconds spent in the current session, clamped to `[0, full]`.
    pub fn elapsed_seconds(&self) -> u32 {
        let full = self.full_seconds();
        full.saturating_sub(self.remaining_seconds.min(full))
    }

    /// A session counts as in progress while ticking or once any time has
    /// been used up.
    pub fn in_progress(&self) -> bool {
        self.is_active || self.remaining_seconds < self.full_seconds()
    }

    pub fn phase(&self) -> TimerPhase {
        match (self.mode, self.is_active) {
            (TimerMode::Focus, true) => TimerPhase::FocusActive,
            (TimerMode::Focus, false) => TimerPhase::FocusPaused,
            (TimerMode::Break, true) => TimerPhase::BreakActive,
            (TimerMode::Break, false) => TimerPhase::BreakPaused,
        }
    }

    pub fn progress(&self) -> f64 {
        let full = self.full_seconds();
        if full == 0 {
            return 0.0;
        }
        f64::from(self.elapsed_seconds()) / f64::from(full)
    }

    pub fn snapshot(&self) -> TimerSnapshot {
        TimerSnapshot {
            mode: self.mode,
            phase: self.phase(),
            remaining_seconds: self.remaining_seconds,
            full_seconds: self.full_seconds(),
            is_active: self.is_active,
            session_sequence: self.session_sequence,
            progress: self.progress(),
        }
    }

    // ── Transitions ──────────────────────────────────────────────────

    /// Move to the matching `*Active` phase. Returns `false` if already active.
    pub fn activate(&mut self) -> bool {
        if self.is_active {
            return false;
        }
        self.is_active = true;
        true
    }

    /// Move to the matching `*Paused` phase. Returns `false` if already paused.
    pub fn deactivate(&mut self) -> bool {
        if !self.is_active {
            return false;
        }
        self.is_active = false;
        true
    }

    /// Consume one second. Returns `true` once the countdown sits at zero.
    pub fn decrement(&mut self) -> bool {
        self.remaining_seconds = self.remaining_seconds.saturating_sub(1);
        self.remaining_seconds == 0
    }

    /// Remove up to `seconds` from the countdown without going below zero.
    /// Returns how many seconds were actually removed.
    pub fn consume(&mut self, seconds: u32) -> u32 {
        let taken = seconds.min(self.remaining_seconds);
        self.remaining_seconds -= taken;
        taken
    }

    /// Flip to the opposite mode with a full countdown, paused, and advance
    /// the session sequence.
    pub fn advance(&mut self) {
        self.mode = self.mode.opposite();
        self.remaining_seconds = self.full_seconds();
        self.is_active = false;
        self.session_sequence += 1;
    }

    /// Switch to `target` with a full countdown, paused. The sequence is
    /// untouched.
    pub fn switch_to(&mut self, target: TimerMode) {
        self.mode = target;
        self.remaining_seconds = self.full_seconds();
        self.is_active = false;
    }

    /// Apply new settings.
    ///
    /// A paused timer takes the new full duration for its mode; a running
    /// one keeps its countdown unless it now exceeds the new full duration.
    pub fn apply_settings(&mut self, settings: TimerSettings) {
        self.settings = settings;
        let full = self.full_seconds();
        if self.is_active {
            self.remaining_seconds = self.remaining_seconds.min(full);
        } else {
            self.remaining_seconds = full;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> TimerEngine {
        TimerEngine::new(TimerSettings::new(50, 10))
    }

    #[test]
    fn starts_focus_paused_with_full_duration() {
        let engine = engine();
        assert_eq!(engine.phase(), TimerPhase::FocusPaused);
        assert_eq!(engine.remaining_seconds(), 3000);
        assert!(!engine.in_progress());
    }

    #[test]
    fn activate_and_deactivate_are_idempotent() {
        let mut engine = engine();
        assert!(engine.activate());
        assert!(!engine.activate());
        assert_eq!(engine.phase(), TimerPhase::FocusActive);
        assert!(engine.deactivate());
        assert!(!engine.deactivate());
    }

    #[test]
    fn decrement_stops_at_zero() {
        let mut engine = TimerEngine::new(TimerSettings::new(1, 1));
        for _ in 0..59 {
            assert!(!engine.decrement());
        }
        assert!(engine.decrement());
        assert!(engine.decrement());
        assert_eq!(engine.remaining_seconds(), 0);
    }

    #[test]
    fn advance_flips_mode_and_bumps_sequence() {
        let mut engine = engine();
        engine.activate();
        engine.decrement();
        engine.advance();
        assert_eq!(engine.mode(), TimerMode::Break);
        assert_eq!(engine.remaining_seconds(), 600);
        assert_eq!(engine.session_sequence(), 1);
        assert!(!engine.is_active());
    }

    #[test]
    fn switch_to_keeps_sequence() {
        let mut engine = engine();
        engine.switch_to(TimerMode::Break);
        assert_eq!(engine.session_sequence(), 0);
        assert_eq!(engine.remaining_seconds(), 600);
    }

    #[test]
    fn paused_settings_change_resizes_countdown() {
        let mut engine = engine();
        engine.consume(100);
        engine.apply_settings(TimerSettings::new(30, 5));
        assert_eq!(engine.remaining_seconds(), 1800);
    }

    #[test]
    fn running_settings_change_only_clamps() {
        let mut engine = engine();
        engine.activate();
        engine.consume(100);
        engine.apply_settings(TimerSettings::new(60, 5));
        assert_eq!(engine.remaining_seconds(), 2900);
        engine.apply_settings(TimerSettings::new(20, 5));
        assert_eq!(engine.remaining_seconds(), 1200);
    }

    #[test]
    fn restore_repairs_out_of_range_values() {
        let settings = TimerSettings::new(50, 10);
        let (engine, repaired) = TimerEngine::restore(settings, TimerMode::Focus, Some(-5), 3);
        assert!(repaired);
        assert_eq!(engine.remaining_seconds(), 3000);
        assert_eq!(engine.session_sequence(), 3);

        let (engine, repaired) = TimerEngine::restore(settings, TimerMode::Break, Some(9999), 0);
        assert!(repaired);
        assert_eq!(engine.remaining_seconds(), 600);

        let (engine, repaired) = TimerEngine::restore(settings, TimerMode::Break, None, 0);
        assert!(repaired);
        assert_eq!(engine.remaining_seconds(), 600);

        let (engine, repaired) = TimerEngine::restore(settings, TimerMode::Focus, Some(1200), 0);
        assert!(!repaired);
        assert_eq!(engine.remaining_seconds(), 1200);
        assert!(!engine.is_active());
    }

    #[test]
    fn consume_never_goes_negative() {
        let mut engine = engine();
        assert_eq!(engine.consume(5000), 3000);
        assert_eq!(engine.remaining_seconds(), 0);
        assert_eq!(engine.elapsed_seconds(), 3000);
    }
}
