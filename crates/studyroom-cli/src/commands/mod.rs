pub mod config;
pub mod daemon;
pub mod snapshot;
pub mod stats;

use studyroom_core::{Config, SnapshotDb};

/// Open the snapshot database named by the config.
pub fn open_db(config: &Config) -> Result<SnapshotDb, Box<dyn std::error::Error>> {
    let path = config.database_path()?;
    Ok(SnapshotDb::open(&path)?)
}
