// ABOUTME: `stream` command: runs the continuous replication consumer
// ABOUTME: Wires checkpoint store, session, and router together with signal handling

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;

use crate::checkpoint::FileCheckpointStore;
use crate::config::ReplicatorConfig;
use crate::stream::{ChangeRouter, LogSink, ReplicationSession, SessionConfig, StreamConsumer};

/// Consume the logical replication stream until interrupted.
///
/// Transient failures reconnect with backoff from the last persisted
/// checkpoint. Fatal failures propagate and terminate the process; external
/// supervision is expected to restart it.
pub async fn stream(config_path: &Path, checkpoint_override: Option<PathBuf>) -> Result<()> {
    let config = ReplicatorConfig::load(config_path)?;

    let checkpoint_path = checkpoint_override
        .or_else(|| config.stream.checkpoint_path.clone())
        .unwrap_or_else(FileCheckpointStore::default_path);
    tracing::info!("Using checkpoint file {:?}", checkpoint_path);
    let store = FileCheckpointStore::new(checkpoint_path);

    let session = ReplicationSession::new(SessionConfig::new(&config.source_url, &config.stream));
    let router = ChangeRouter::new(Box::new(LogSink));
    let mut consumer = StreamConsumer::new(
        session,
        router,
        Box::new(store),
        config.stream.checkpoint_interval,
    );

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, shutting down gracefully");
            let _ = shutdown_tx.send(());
        }
    });

    consumer
        .run(shutdown_rx)
        .await
        .context("Stream consumer terminated")?;
    Ok(())
}
