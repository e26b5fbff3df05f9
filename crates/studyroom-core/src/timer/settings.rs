use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerMode {
    Focus,
    Break,
}

impl TimerMode {
    pub fn opposite(self) -> Self {
        match self {
            TimerMode::Focus => TimerMode::Break,
            TimerMode::Break => TimerMode::Focus,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TimerMode::Focus => "focus",
            TimerMode::Break => "break",
        }
    }
}

impl std::fmt::Display for TimerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-user timer preferences.
///
/// Owned by the user and mutable at any time; the engine resizes the
/// running countdown when these change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerSettings {
    #[serde(default = "default_focus_minutes")]
    pub focus_minutes: u32,
    #[serde(default = "default_break_minutes")]
    pub break_minutes: u32,
    #[serde(default)]
    pub auto_start_breaks: bool,
    #[serde(default)]
    pub auto_start_focus: bool,
}

fn default_focus_minutes() -> u32 {
    25
}

fn default_break_minutes() -> u32 {
    5
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            focus_minutes: default_focus_minutes(),
            break_minutes: default_break_minutes(),
            auto_start_breaks: false,
            auto_start_focus: false,
        }
    }
}

impl TimerSettings {
    pub fn new(focus_minutes: u32, break_minutes: u32) -> Self {
        Self {
            focus_minutes,
            break_minutes,
            ..Self::default()
        }
    }

    pub fn minutes_for(&self, mode: TimerMode) -> u32 {
        match mode {
            TimerMode::Focus => self.focus_minutes,
            TimerMode::Break => self.break_minutes,
        }
    }

    /// Full length of a `mode` session in seconds.
    ///
    /// Uses saturating arithmetic so absurd persisted values cannot overflow.
    pub fn full_seconds(&self, mode: TimerMode) -> u32 {
        self.minutes_for(mode).saturating_mul(60)
    }

    /// Whether a session of `mode` should start by itself once the previous
    /// one completes.
    pub fn auto_starts(&self, mode: TimerMode) -> bool {
        match mode {
            TimerMode::Focus => self.auto_start_focus,
            TimerMode::Break => self.auto_start_breaks,
        }
    }

    /// Clamp both durations into `[min_minutes, max_minutes]`.
    pub fn sanitized(self, min_minutes: u32, max_minutes: u32) -> Self {
        let (lo, hi) = if min_minutes <= max_minutes {
            (min_minutes.max(1), max_minutes.max(1))
        } else {
            (max_minutes.max(1), min_minutes.max(1))
        };
        Self {
            focus_minutes: self.focus_minutes.clamp(lo, hi),
            break_minutes: self.break_minutes.clamp(lo, hi),
            ..self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opposite_flips_mode() {
        assert_eq!(TimerMode::Focus.opposite(), TimerMode::Break);
        assert_eq!(TimerMode::Break.opposite(), TimerMode::Focus);
    }

    #[test]
    fn full_seconds_follow_mode() {
        let settings = TimerSettings::new(50, 10);
        assert_eq!(settings.full_seconds(TimerMode::Focus), 3000);
        assert_eq!(settings.full_seconds(TimerMode::Break), 600);
    }

    #[test]
    fn sanitized_clamps_into_bounds() {
        let settings = TimerSettings::new(0, 999).sanitized(1, 180);
        assert_eq!(settings.focus_minutes, 1);
        assert_eq!(settings.break_minutes, 180);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let settings: TimerSettings = serde_json::from_str(r#"{"focus_minutes": 40}"#).unwrap();
        assert_eq!(settings.focus_minutes, 40);
        assert_eq!(settings.break_minutes, 5);
        assert!(!settings.auto_start_breaks);
    }
}
