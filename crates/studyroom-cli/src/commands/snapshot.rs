use clap::Subcommand;
use studyroom_core::{Config, SnapshotStore, UserSnapshot};

use super::open_db;

#[derive(Subcommand)]
pub enum SnapshotAction {
    /// List stored snapshots
    List,
    /// Print one user's snapshot
    Inspect {
        /// User id
        user: String,
    },
    /// Delete one user's snapshot
    Remove {
        /// User id
        user: String,
    },
}

pub fn run(action: SnapshotAction) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let db = open_db(&config)?;

    match action {
        SnapshotAction::List => {
            println!("{}", serde_json::to_string_pretty(&db.list()?)?);
        }
        SnapshotAction::Inspect { user } => {
            let raw = db
                .get_raw(&user)?
                .ok_or_else(|| format!("no snapshot for user: {user}"))?;
            match UserSnapshot::decode(&raw) {
                Ok(snapshot) => println!("{}", serde_json::to_string_pretty(&snapshot)?),
                // Show what is actually stored, even if it no longer decodes.
                Err(e) => {
                    eprintln!("warning: snapshot does not decode: {e}");
                    println!("{raw}");
                }
            }
        }
        SnapshotAction::Remove { user } => {
            if db.get_raw(&user)?.is_none() {
                return Err(format!("no snapshot for user: {user}").into());
            }
            db.remove(&user)?;
            println!("removed {user}");
        }
    }
    Ok(())
}
