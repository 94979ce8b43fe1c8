//! dtimer CLI - Command-line interface for dtimer schedules

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(name = "dtimer")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to the schedule store directory
    #[arg(short, long, default_value = "./data")]
    db_path: PathBuf,

    /// Key prefix shared by every node of one timer
    #[arg(short, long, default_value = "dtimer")]
    namespace: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Schedule an event
    Post {
        /// Delay before the event fires, in milliseconds
        delay: String,

        /// Event payload as a JSON object
        #[arg(default_value = "{}")]
        payload: String,

        /// Event id (generated when omitted)
        #[arg(long)]
        id: Option<String>,

        /// Redeliveries allowed when the event is not confirmed
        #[arg(long)]
        max_retries: Option<u32>,
    },

    /// Show a pending event
    Peek { id: String },

    /// Cancel a pending event
    Cancel { id: String },

    /// Confirm a delivered event
    Confirm { id: String },

    /// Change when a pending event fires
    ChangeDelay {
        id: String,

        /// New delay from now, in milliseconds
        delay: String,
    },

    /// List pending events in a time window
    Upcoming {
        /// Window start relative to now, in milliseconds
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        offset: i64,

        /// Window length in milliseconds
        #[arg(long)]
        duration: Option<u64>,

        /// Maximum number of events
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Schedule information and status
    Status,

    /// Join as a node and print delivered events
    Run {
        /// Node identity
        #[arg(long)]
        node_id: Option<String>,

        /// Events claimed per poll
        #[arg(short, long, default_value_t = 8)]
        max_events: usize,

        /// Confirm each event after printing it
        #[arg(long)]
        auto_confirm: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    let target = commands::Target {
        db_path: cli.db_path,
        namespace: cli.namespace,
    };

    // Execute command
    match cli.command {
        Commands::Post {
            delay,
            payload,
            id,
            max_retries,
        } => {
            commands::events::post(&target, &delay, &payload, id, max_retries).await?;
        }
        Commands::Peek { id } => {
            commands::events::peek(&target, &id).await?;
        }
        Commands::Cancel { id } => {
            commands::events::cancel(&target, &id).await?;
        }
        Commands::Confirm { id } => {
            commands::events::confirm(&target, &id).await?;
        }
        Commands::ChangeDelay { id, delay } => {
            commands::events::change_delay(&target, &id, &delay).await?;
        }
        Commands::Upcoming {
            offset,
            duration,
            limit,
        } => {
            commands::status::upcoming(&target, offset, duration, limit).await?;
        }
        Commands::Status => {
            commands::status::execute(&target).await?;
        }
        Commands::Run {
            node_id,
            max_events,
            auto_confirm,
        } => {
            commands::run::execute(&target, node_id, max_events, auto_confirm).await?;
        }
    }

    Ok(())
}
