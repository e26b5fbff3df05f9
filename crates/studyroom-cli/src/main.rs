use clap::{Parser, Subcommand};

mod commands;
mod logging;

#[derive(Parser)]
#[command(name = "studyroom-cli", version, about = "Studyroom timer service CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the timer service, reading JSON-line commands from stdin
    Daemon(commands::daemon::DaemonArgs),
    /// Per-user session statistics from stored snapshots
    Stats {
        #[command(subcommand)]
        action: commands::stats::StatsAction,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
    /// Stored snapshot maintenance
    Snapshot {
        #[command(subcommand)]
        action: commands::snapshot::SnapshotAction,
    },
}

fn main() {
    let cli = Cli::parse();
    let default_filter = match cli.command {
        Commands::Daemon(_) => "info",
        _ => "warn",
    };
    logging::init_tracing_from_env(default_filter);

    let result = match cli.command {
        Commands::Daemon(args) => commands::daemon::run(args),
        Commands::Stats { action } => commands::stats::run(action),
        Commands::Config { action } => commands::config::run(action),
        Commands::Snapshot { action } => commands::snapshot::run(action),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
