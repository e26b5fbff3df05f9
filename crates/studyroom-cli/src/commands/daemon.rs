//! Line-oriented front end for the timer service.
//!
//! Reads one JSON command per stdin line and writes one JSON object per
//! stdout line: every outbound event, plus replies to `view` and errors.
//! EOF or Ctrl-C shuts the service down with a final snapshot.

use std::sync::Arc;

use clap::Args;
use serde::Deserialize;
use serde_json::json;
use studyroom_core::{Config, Event, SnapshotStore, TimerMode, TimerService, TimerSettings};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::broadcast::Receiver;

use super::open_db;

#[derive(Args)]
pub struct DaemonArgs {
    /// Keep all state in memory; nothing is restored or saved
    #[arg(long)]
    pub memory: bool,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
enum DaemonCommand {
    Connect {
        conn: String,
        user: String,
        #[serde(default)]
        tz: Option<String>,
    },
    Disconnect {
        conn: String,
    },
    Start {
        user: String,
    },
    Pause {
        user: String,
    },
    Reset {
        user: String,
    },
    ChangeMode {
        user: String,
        mode: TimerMode,
    },
    Skip {
        user: String,
        #[serde(default)]
        from: Option<TimerMode>,
    },
    Settings {
        user: String,
        #[serde(flatten)]
        settings: TimerSettings,
    },
    View {
        user: String,
    },
    Persist,
}

pub fn run(args: DaemonArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(serve(config, args))
}

async fn serve(config: Config, args: DaemonArgs) -> Result<(), Box<dyn std::error::Error>> {
    let snapshots: Option<Arc<dyn SnapshotStore>> = if args.memory {
        None
    } else {
        let db: Arc<dyn SnapshotStore> = Arc::new(open_db(&config)?);
        Some(db)
    };
    let service = TimerService::new(config, snapshots);

    match service.restore().await {
        Ok(report) => emit(&json!({ "type": "recovery_report", "report": report })),
        Err(e) => tracing::error!(error = %e, "restore failed; starting empty"),
    }
    service.spawn_background();

    let mut events = service.subscribe_all();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => {
                    let reply = handle_line(&service, &line).await;
                    // Events caused by the command go out before its reply.
                    drain(&mut events);
                    if let Some(reply) = reply {
                        emit(&reply);
                    }
                }
                None => break,
            },
            event = events.recv() => match event {
                Ok(event) => emit_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event output fell behind");
                }
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    let result = service.shutdown().await;
    drain(&mut events);
    result?;
    Ok(())
}

/// Run one command line. Returns the reply to print, if any.
async fn handle_line(service: &TimerService, line: &str) -> Option<serde_json::Value> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let command: DaemonCommand = match serde_json::from_str(line) {
        Ok(command) => command,
        Err(e) => return Some(json!({ "type": "error", "message": e.to_string() })),
    };
    tracing::debug!(?command, "command");

    match command {
        DaemonCommand::Connect { conn, user, tz } => {
            service.connect(&conn, &user, tz.as_deref()).await;
        }
        DaemonCommand::Disconnect { conn } => {
            service.disconnect(&conn).await;
        }
        DaemonCommand::Start { user } => {
            service.start(&user).await;
        }
        DaemonCommand::Pause { user } => {
            service.pause(&user).await;
        }
        DaemonCommand::Reset { user } => {
            service.reset(&user).await;
        }
        DaemonCommand::ChangeMode { user, mode } => {
            if service.change_mode_when_idle(&user, mode).await.is_none() {
                return Some(json!({
                    "type": "error",
                    "user_id": user,
                    "message": "mode change refused while a session is in progress",
                }));
            }
        }
        DaemonCommand::Skip { user, from } => {
            service.skip_to_opposite(&user, from).await;
        }
        DaemonCommand::Settings { user, settings } => {
            service.update_settings(&user, settings).await;
        }
        DaemonCommand::View { user } => {
            return Some(match service.view(&user).await {
                Some(view) => json!({ "type": "view", "view": view }),
                None => json!({ "type": "error", "user_id": user, "message": "unknown user" }),
            });
        }
        DaemonCommand::Persist => {
            return Some(match service.persist_now().await {
                Ok(written) => json!({ "type": "persisted", "count": written }),
                Err(e) => json!({ "type": "error", "message": e.to_string() }),
            });
        }
    }
    None
}

fn drain(events: &mut Receiver<Event>) {
    loop {
        match events.try_recv() {
            Ok(event) => emit_event(&event),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
        }
    }
}

fn emit_event(event: &Event) {
    match serde_json::to_value(event) {
        Ok(value) => emit(&value),
        Err(e) => tracing::error!(error = %e, event = event.name(), "failed to encode event"),
    }
}

fn emit(value: &serde_json::Value) {
    println!("{value}");
}
