mod config;
pub mod database;
pub mod snapshot;

pub use config::{
    AnalyticsConfig, Config, EventsConfig, PersistenceConfig, RetentionConfig, TimerDefaults,
};
pub use database::SnapshotDb;
pub use snapshot::{TimerRecord, UserSnapshot, SNAPSHOT_VERSION};

use std::path::PathBuf;

use crate::error::DatabaseError;

/// Durable home for per-user snapshots, keyed by user id.
///
/// Implementations are called from a blocking worker, never from a tick.
pub trait SnapshotStore: Send + Sync {
    /// Every decodable snapshot. Rows that fail to decode are logged and
    /// skipped; the second value counts them.
    fn load_all(&self) -> Result<(Vec<UserSnapshot>, usize), DatabaseError>;

    /// Upsert all given snapshots in one batch.
    fn save_all(&self, snapshots: &[UserSnapshot]) -> Result<(), DatabaseError>;

    fn remove(&self, user_id: &str) -> Result<(), DatabaseError>;
}

/// Returns `~/.config/studyroom[-dev]/` based on STUDYROOM_ENV.
///
/// Set STUDYROOM_ENV=dev to use development data directory, or
/// STUDYROOM_DATA_DIR to point somewhere else entirely.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> std::io::Result<PathBuf> {
    let dir = match std::env::var_os("STUDYROOM_DATA_DIR") {
        Some(dir) => PathBuf::from(dir),
        None => {
            let base_dir = dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config");
            let env = std::env::var("STUDYROOM_ENV").unwrap_or_else(|_| "production".to_string());
            if env == "dev" {
                base_dir.join("studyroom-dev")
            } else {
                base_dir.join("studyroom")
            }
        }
    };

    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
