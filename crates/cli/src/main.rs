//! TrailVerse CLI — the main entry point.
//!
//! Commands:
//! - `init`      — Write a default config file
//! - `serve`     — Start the HTTP gateway
//! - `providers` — List configured AI providers
//! - `doctor`    — Diagnose configuration
//! - `sessions`  — Inspect or purge anonymous chat sessions

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "trailverse",
    about = "TrailVerse — AI trip-planning chat relay",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file to ~/.trailverse/config.toml
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Start the HTTP gateway server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,

        /// Keep sessions in memory instead of SQLite
        #[arg(long)]
        memory: bool,
    },

    /// List configured AI providers and their models
    Providers,

    /// Diagnose configuration and connectivity prerequisites
    Doctor,

    /// Inspect or maintain anonymous chat sessions
    Sessions {
        #[command(subcommand)]
        action: SessionsAction,
    },
}

#[derive(Subcommand)]
enum SessionsAction {
    /// Show the gate state of one anonymous session
    Status {
        /// Anonymous session ID (anon_...)
        anonymous_id: String,
    },

    /// Delete sessions idle for more than 48 hours
    Purge,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }

    match cli.command {
        Commands::Init { force } => commands::init::run(force).await?,
        Commands::Serve { port, memory } => commands::serve::run(port, memory).await?,
        Commands::Providers => commands::providers::run().await?,
        Commands::Doctor => commands::doctor::run().await?,
        Commands::Sessions { action } => match action {
            SessionsAction::Status { anonymous_id } => {
                commands::sessions::status(&anonymous_id).await?
            }
            SessionsAction::Purge => commands::sessions::purge().await?,
        },
    }

    Ok(())
}
