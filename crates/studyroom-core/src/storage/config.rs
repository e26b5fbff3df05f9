//! TOML-based service configuration.
//!
//! Stores:
//! - Default timer settings handed to users on first join
//! - Snapshot intervals and the database file name
//! - Crash recovery policy constants
//! - Dead-time and data-retention thresholds
//!
//! Configuration is stored at `~/.config/studyroom/config.toml`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::data_dir;
use crate::error::ConfigError;
use crate::recovery::RecoveryConfig;
use crate::timer::TimerSettings;

/// Timer defaults and bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerDefaults {
    #[serde(default = "default_focus_minutes")]
    pub focus_minutes: u32,
    #[serde(default = "default_break_minutes")]
    pub break_minutes: u32,
    #[serde(default)]
    pub auto_start_breaks: bool,
    #[serde(default)]
    pub auto_start_focus: bool,
    /// Delay before an auto-started session begins, so clients can show
    /// the completion first.
    #[serde(default = "default_auto_start_delay_ms")]
    pub auto_start_delay_ms: u64,
    #[serde(default = "default_min_minutes")]
    pub min_minutes: u32,
    #[serde(default = "default_max_minutes")]
    pub max_minutes: u32,
    /// How often every engine is checked for a local date change.
    #[serde(default = "default_rollover_sweep_secs")]
    pub rollover_sweep_secs: u64,
}

/// Snapshot scheduling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_snapshot_interval_secs")]
    pub snapshot_interval_secs: u64,
    /// Used instead while any timer is running.
    #[serde(default = "default_active_snapshot_interval_secs")]
    pub active_snapshot_interval_secs: u64,
    #[serde(default = "default_database_file")]
    pub database_file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    #[serde(default = "default_dead_time_threshold_minutes")]
    pub dead_time_threshold_minutes: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_inactive_days")]
    pub inactive_days: i64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Per-user broadcast buffer; slow subscribers lag past this.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

/// Service configuration.
///
/// Serialized to/from TOML at `~/.config/studyroom/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub timer: TimerDefaults,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub events: EventsConfig,
}

// Default functions
fn default_focus_minutes() -> u32 {
    25
}
fn default_break_minutes() -> u32 {
    5
}
fn default_auto_start_delay_ms() -> u64 {
    3000
}
fn default_min_minutes() -> u32 {
    1
}
fn default_max_minutes() -> u32 {
    180
}
fn default_rollover_sweep_secs() -> u64 {
    60
}
fn default_snapshot_interval_secs() -> u64 {
    60
}
fn default_active_snapshot_interval_secs() -> u64 {
    10
}
fn default_database_file() -> String {
    "studyroom.db".into()
}
fn default_dead_time_threshold_minutes() -> f64 {
    10.0
}
fn default_inactive_days() -> i64 {
    30
}
fn default_sweep_interval_secs() -> u64 {
    3600
}
fn default_channel_capacity() -> usize {
    256
}

impl Default for TimerDefaults {
    fn default() -> Self {
        Self {
            focus_minutes: default_focus_minutes(),
            break_minutes: default_break_minutes(),
            auto_start_breaks: false,
            auto_start_focus: false,
            auto_start_delay_ms: default_auto_start_delay_ms(),
            min_minutes: default_min_minutes(),
            max_minutes: default_max_minutes(),
            rollover_sweep_secs: default_rollover_sweep_secs(),
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            snapshot_interval_secs: default_snapshot_interval_secs(),
            active_snapshot_interval_secs: default_active_snapshot_interval_secs(),
            database_file: default_database_file(),
        }
    }
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            dead_time_threshold_minutes: default_dead_time_threshold_minutes(),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            inactive_days: default_inactive_days(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl TimerDefaults {
    /// Settings handed to a user seen for the first time.
    pub fn settings(&self) -> TimerSettings {
        self.sanitize(TimerSettings {
            focus_minutes: self.focus_minutes,
            break_minutes: self.break_minutes,
            auto_start_breaks: self.auto_start_breaks,
            auto_start_focus: self.auto_start_focus,
        })
    }

    pub fn sanitize(&self, settings: TimerSettings) -> TimerSettings {
        settings.sanitized(self.min_minutes, self.max_minutes)
    }

    pub fn auto_start_delay(&self) -> Duration {
        Duration::from_millis(self.auto_start_delay_ms)
    }

    pub fn rollover_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.rollover_sweep_secs.max(1))
    }
}

impl PersistenceConfig {
    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_secs(self.snapshot_interval_secs.max(1))
    }

    pub fn active_snapshot_interval(&self) -> Duration {
        Duration::from_secs(self.active_snapshot_interval_secs.max(1))
    }
}

impl RetentionConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl Config {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let unknown = || ConfigError::UnknownKey(key.to_string());
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let mut parts = key.split('.').peekable();
        if key.is_empty() {
            return Err(unknown());
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            if parts.peek().is_none() {
                let obj = current.as_object_mut().ok_or_else(unknown)?;
                let existing = obj.get(part).ok_or_else(unknown)?;

                let new_value = match existing {
                    serde_json::Value::Bool(_) => serde_json::Value::Bool(
                        value
                            .parse::<bool>()
                            .map_err(|e| invalid(e.to_string()))?,
                    ),
                    serde_json::Value::Number(_) => {
                        if let Ok(n) = value.parse::<i64>() {
                            serde_json::Value::Number(n.into())
                        } else if let Ok(n) = value.parse::<f64>() {
                            serde_json::Number::from_f64(n)
                                .map(serde_json::Value::Number)
                                .ok_or_else(|| invalid(format!("cannot parse '{value}' as number")))?
                        } else {
                            return Err(invalid(format!("cannot parse '{value}' as number")));
                        }
                    }
                    serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                        serde_json::from_str(value).map_err(|e| invalid(e.to_string()))?
                    }
                    _ => serde_json::Value::String(value.into()),
                };

                obj.insert(part.to_string(), new_value);
                return Ok(());
            }

            current = current.get_mut(part).ok_or_else(unknown)?;
        }

        Err(unknown())
    }

    /// Default location of the config file.
    pub fn path() -> Result<PathBuf, ConfigError> {
        let dir = data_dir().map_err(|e| ConfigError::LoadFailed {
            path: PathBuf::from("~/.config/studyroom"),
            message: e.to_string(),
        })?;
        Ok(dir.join("config.toml"))
    }

    /// Path of the snapshot database next to the config file.
    pub fn database_path(&self) -> Result<PathBuf, ConfigError> {
        let config_path = Self::path()?;
        let dir = config_path.parent().unwrap_or_else(|| Path::new("."));
        Ok(dir.join(&self.persistence.database_file))
    }

    /// Load from disk or write and return defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let cfg = Self::default();
                cfg.save_to(path)?;
                Ok(cfg)
            }
            Err(e) => Err(ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
        }
    }

    /// Persist to disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be serialized or written to disk.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| save_failed(e.to_string()))
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a config value by key in memory. Returns error if key is unknown
    /// or the value does not fit the field.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut json =
            serde_json::to_value(&*self).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        *self = serde_json::from_value(json).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        Ok(())
    }

    /// Load from disk, returning default on error.
    /// This is a convenience method that never fails.
    pub fn load_or_default() -> Self {
        match Self::load() {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::warn!(error = %e, "using default configuration");
                Self::default()
            }
        }
    }
}
