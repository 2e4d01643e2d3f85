// ABOUTME: `sync` and `bulk-sync` commands: batch reconciliation entry points
// ABOUTME: Runs one cycle, the continuous loop, or a full-table bulk load

use anyhow::{bail, Context, Result};
use std::path::Path;
use tokio::sync::broadcast;

use crate::config::ReplicatorConfig;
use crate::sync::SyncEngine;

/// Run batch reconciliation: a single cycle with `once`, otherwise the
/// continuous loop until interrupted.
pub async fn sync(config_path: &Path, once: bool) -> Result<()> {
    let config = ReplicatorConfig::load(config_path)?;
    if config.tasks.is_empty() {
        bail!("No [[tables]] entries configured in {:?}", config_path);
    }
    let engine = SyncEngine::new(config);

    if once {
        let stats = engine.run_cycle().await?;
        println!(
            "Sync cycle completed: {} tables, {} rows upserted, {} rows deleted in {}ms",
            stats.tables_synced, stats.rows_upserted, stats.rows_deleted, stats.duration_ms
        );
        if !stats.is_success() {
            for error in &stats.errors {
                eprintln!("  error: {}", error);
            }
            bail!("Sync cycle finished with {} errors", stats.errors.len());
        }
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, shutting down gracefully");
            let _ = shutdown_tx.send(());
        }
    });

    engine.run(shutdown_rx).await
}

/// Full-table load for one configured table through the bulk transfer channel.
pub async fn bulk_sync(config_path: &Path, table: &str) -> Result<()> {
    let config = ReplicatorConfig::load(config_path)?;
    let task = config
        .find_task(table)
        .with_context(|| format!("Table '{}' is not configured in [[tables]]", table))?
        .clone();

    let engine = SyncEngine::new(config);
    let copied = engine.bulk_sync(&task).await?;
    println!("Bulk sync completed: {} rows copied into {}", copied, task.qualified_name());
    Ok(())
}
