// ABOUTME: `checkpoint` command: inspect or reset the persisted stream position
// ABOUTME: Reset removes the file so the next run starts from the earliest position

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::checkpoint::{CheckpointStore, FileCheckpointStore};
use crate::config::ReplicatorConfig;

fn resolve_path(config_path: &Path, path_override: Option<PathBuf>) -> PathBuf {
    path_override
        .or_else(|| {
            ReplicatorConfig::load(config_path)
                .ok()
                .and_then(|c| c.stream.checkpoint_path)
        })
        .unwrap_or_else(FileCheckpointStore::default_path)
}

/// Print the last persisted stream position.
pub fn show(config_path: &Path, path_override: Option<PathBuf>) -> Result<()> {
    let path = resolve_path(config_path, path_override);
    let store = FileCheckpointStore::new(&path);
    let position = store.get().context("Failed to read checkpoint")?;
    println!("Checkpoint file: {:?}", path);
    println!("Position: {} ({})", u64::from(position), position);
    Ok(())
}

/// Remove the checkpoint so the next stream run starts from the earliest
/// position. The store itself refuses to move backward, so a reset is a
/// deletion rather than a rewrite.
pub fn reset(config_path: &Path, path_override: Option<PathBuf>) -> Result<()> {
    let path = resolve_path(config_path, path_override);
    match std::fs::remove_file(&path) {
        Ok(()) => {
            println!("Checkpoint {:?} removed; next run starts from the earliest position", path);
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            println!("No checkpoint at {:?}", path);
            Ok(())
        }
        Err(e) => Err(e).with_context(|| format!("Failed to remove checkpoint {:?}", path)),
    }
}
