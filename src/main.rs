// ABOUTME: CLI entry point for delta-replicator
// ABOUTME: Parses commands and routes to the stream and sync handlers

use anyhow::Result;
use clap::{Parser, Subcommand};
use delta_replicator::commands;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "delta-replicator")]
#[command(about = "Streaming and batch delta replication into PostgreSQL", long_about = None)]
#[command(version)]
struct Cli {
    /// Set the log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log: String,
    /// Path to the replication config file
    #[arg(long, global = true, default_value = "delta-replicator.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Consume the logical replication stream continuously
    Stream {
        /// Override the checkpoint file path
        #[arg(long)]
        checkpoint: Option<PathBuf>,
    },
    /// Run batch reconciliation cycles (ledger deletes, then upserts)
    Sync {
        /// Run a single cycle and exit instead of looping
        #[arg(long)]
        once: bool,
    },
    /// Load one full table through the bulk transfer channel
    BulkSync {
        /// Table to load (must appear in [[tables]])
        #[arg(long)]
        table: String,
    },
    /// Show or reset the persisted stream checkpoint
    Checkpoint {
        #[command(subcommand)]
        action: CheckpointAction,
    },
}

#[derive(Subcommand)]
enum CheckpointAction {
    /// Print the last persisted position
    Show {
        /// Override the checkpoint file path
        #[arg(long)]
        path: Option<PathBuf>,
    },
    /// Remove the checkpoint so the next run starts from the earliest position
    Reset {
        /// Override the checkpoint file path
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG takes precedence over --log, defaulting to info
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log.clone()));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    match cli.command {
        Commands::Stream { checkpoint } => commands::stream(&cli.config, checkpoint).await,
        Commands::Sync { once } => commands::sync(&cli.config, once).await,
        Commands::BulkSync { table } => commands::bulk_sync(&cli.config, &table).await,
        Commands::Checkpoint { action } => match action {
            CheckpointAction::Show { path } => commands::checkpoint_show(&cli.config, path),
            CheckpointAction::Reset { path } => commands::checkpoint_reset(&cli.config, path),
        },
    }
}
