//! Persisted per-user snapshot format.
//!
//! Snapshots are JSON documents keyed by user id. Decoding is lenient:
//! every field has a default and a non-numeric countdown decodes as
//! `None`, so corrupt rows are repaired on load instead of rejected.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::events::UserId;
use crate::ledger::{SessionLedger, UserTimezone};
use crate::timer::{TimerMode, TimerSettings};

/// Current on-disk format version.
pub const SNAPSHOT_VERSION: u32 = 1;

fn current_version() -> u32 {
    SNAPSHOT_VERSION
}

/// Timer fields as they were at save time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerRecord {
    #[serde(default = "default_mode")]
    pub mode: TimerMode,
    /// `None` when the stored value was missing or not a number.
    #[serde(default, deserialize_with = "lenient_seconds")]
    pub remaining_seconds: Option<i64>,
    /// Informational only: restored timers are always paused.
    #[serde(default)]
    pub was_active: bool,
    #[serde(default)]
    pub session_sequence: u64,
}

fn default_mode() -> TimerMode {
    TimerMode::Focus
}

impl Default for TimerRecord {
    fn default() -> Self {
        Self {
            mode: TimerMode::Focus,
            remaining_seconds: None,
            was_active: false,
            session_sequence: 0,
        }
    }
}

/// Everything needed to rebuild one user's engine and ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSnapshot {
    #[serde(default = "current_version")]
    pub version: u32,
    pub user_id: UserId,
    #[serde(default)]
    pub settings: TimerSettings,
    #[serde(default)]
    pub timer: TimerRecord,
    /// Current day plus archived `daily_history`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ledger: Option<SessionLedger>,
    #[serde(default)]
    pub timezone: UserTimezone,
    #[serde(default)]
    pub last_activity: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_save_timestamp: Option<DateTime<Utc>>,
}

impl UserSnapshot {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Accept integers, floats and numeric strings; anything else becomes `None`.
fn lenient_seconds<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        serde_json::Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite())
                .map(|f| f.floor() as i64)
        }),
        serde_json::Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_minimal_document() {
        let snap = UserSnapshot::decode(r#"{"user_id": "alice"}"#).unwrap();
        assert_eq!(snap.user_id, "alice");
        assert_eq!(snap.version, SNAPSHOT_VERSION);
        assert_eq!(snap.timer.remaining_seconds, None);
        assert!(snap.ledger.is_none());
        assert_eq!(snap.timezone, UserTimezone::utc());
    }

    #[test]
    fn non_numeric_countdown_decodes_as_none() {
        let snap = UserSnapshot::decode(
            r#"{"user_id": "bob", "timer": {"mode": "break", "remaining_seconds": "soon"}}"#,
        )
        .unwrap();
        assert_eq!(snap.timer.mode, TimerMode::Break);
        assert_eq!(snap.timer.remaining_seconds, None);
    }

    #[test]
    fn numeric_strings_and_floats_are_accepted() {
        let snap = UserSnapshot::decode(
            r#"{"user_id": "c", "timer": {"remaining_seconds": "120"}}"#,
        )
        .unwrap();
        assert_eq!(snap.timer.remaining_seconds, Some(120));

        let snap = UserSnapshot::decode(
            r#"{"user_id": "c", "timer": {"remaining_seconds": 99.7}}"#,
        )
        .unwrap();
        assert_eq!(snap.timer.remaining_seconds, Some(99));

        let snap = UserSnapshot::decode(
            r#"{"user_id": "c", "timer": {"remaining_seconds": -30}}"#,
        )
        .unwrap();
        assert_eq!(snap.timer.remaining_seconds, Some(-30));
    }

    #[test]
    fn null_countdown_is_none() {
        let snap = UserSnapshot::decode(
            r#"{"user_id": "d", "timer": {"remaining_seconds": null}}"#,
        )
        .unwrap();
        assert_eq!(snap.timer.remaining_seconds, None);
    }
}
