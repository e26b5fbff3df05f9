use chrono::Utc;
use clap::Subcommand;
use serde_json::json;
use studyroom_core::{Config, DeadTimeDetector, UserSession, UserSnapshot};

use super::open_db;

#[derive(Subcommand)]
pub enum StatsAction {
    /// Today's totals and sessions
    Today {
        #[arg(long)]
        user: String,
    },
    /// Archived daily totals
    History {
        #[arg(long)]
        user: String,
    },
    /// Dead-time gaps for today
    Gaps {
        #[arg(long)]
        user: String,
    },
}

/// Rebuild the user's session from disk with the day rollover applied.
fn load_session(config: &Config, user: &str) -> Result<UserSession, Box<dyn std::error::Error>> {
    let db = open_db(config)?;
    let raw = db
        .get_raw(user)?
        .ok_or_else(|| format!("no snapshot for user: {user}"))?;
    let snapshot = UserSnapshot::decode(&raw)?;
    let (session, _) = UserSession::from_snapshot(snapshot, Utc::now());
    Ok(session)
}

pub fn run(action: StatsAction) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let detector =
        DeadTimeDetector::new().with_threshold(config.analytics.dead_time_threshold_minutes);

    match action {
        StatsAction::Today { user } => {
            let mut session = load_session(&config, &user)?;
            let (view, _) = session.view(Utc::now(), &detector);
            let out = json!({
                "user_id": view.user_id,
                "date": view.ledger.local_date_key(),
                "timezone": view.timezone,
                "today": view.ledger.today(),
                "in_progress_minutes": view.in_progress_minutes,
                "state": view.state,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        StatsAction::History { user } => {
            let mut session = load_session(&config, &user)?;
            session.check_and_rollover(Utc::now());
            println!("{}", serde_json::to_string_pretty(session.ledger().daily_history())?);
        }
        StatsAction::Gaps { user } => {
            let mut session = load_session(&config, &user)?;
            let (view, _) = session.view(Utc::now(), &detector);
            println!("{}", serde_json::to_string_pretty(&view.gaps)?);
        }
    }
    Ok(())
}
