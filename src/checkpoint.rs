// ABOUTME: Durable checkpoint storage for the last confirmed stream position
// ABOUTME: File backend writes the LSN as decimal text via an atomic temp-file swap

use std::fs;
use std::io;
use std::path::PathBuf;
use tokio_postgres::types::PgLsn;

use crate::error::ReplicationError;

/// Durable single-value position storage.
///
/// The backend is pluggable so the consumer loop does not care whether the
/// position lives in a file, an embedded store, or a database table. For any
/// sequence of calls, a later `get` never returns a smaller position than an
/// earlier persisted `set`.
pub trait CheckpointStore: Send + Sync {
    /// Load the last persisted position. Missing or corrupt storage yields
    /// position 0 with a warning, never an error.
    fn get(&self) -> Result<PgLsn, ReplicationError>;

    /// Persist a position. Writes must be atomic so a crash cannot leave a
    /// torn value behind.
    fn set(&self, position: PgLsn) -> Result<(), ReplicationError>;
}

/// File-backed checkpoint store holding one decimal-text LSN.
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Default checkpoint location under the user's home directory.
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .map(|home| home.join(".delta-replicator").join("checkpoint"))
            .unwrap_or_else(|| PathBuf::from(".delta-replicator/checkpoint"))
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Read the raw stored value without logging, for internal comparisons.
    fn read_raw(&self) -> Option<u64> {
        let contents = fs::read_to_string(&self.path).ok()?;
        contents.trim().parse::<u64>().ok()
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn get(&self) -> Result<PgLsn, ReplicationError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => match contents.trim().parse::<u64>() {
                Ok(raw) => Ok(PgLsn::from(raw)),
                Err(_) => {
                    tracing::warn!(
                        "Corrupt checkpoint at {:?}, resuming from position 0",
                        self.path
                    );
                    Ok(PgLsn::from(0))
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::warn!(
                    "No checkpoint at {:?}, resuming from position 0",
                    self.path
                );
                Ok(PgLsn::from(0))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, position: PgLsn) -> Result<(), ReplicationError> {
        let raw = u64::from(position);

        // The checkpoint never moves backward.
        if let Some(current) = self.read_raw() {
            if raw < current {
                tracing::warn!(
                    "Refusing to move checkpoint backward ({} -> {})",
                    current,
                    raw
                );
                return Ok(());
            }
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        // Write-then-rename so a crash mid-write leaves the old value intact.
        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, raw.to_string())?;
        fs::rename(&tmp_path, &self.path)?;

        tracing::debug!("Checkpoint persisted: {}", position);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_get_missing_returns_zero() {
        let dir = tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("checkpoint"));
        assert_eq!(u64::from(store.get().unwrap()), 0);
    }

    #[test]
    fn test_set_then_get_roundtrip() {
        let dir = tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("checkpoint"));
        store.set(PgLsn::from(42_000_000)).unwrap();
        assert_eq!(u64::from(store.get().unwrap()), 42_000_000);
    }

    #[test]
    fn test_stores_decimal_text() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("checkpoint");
        let store = FileCheckpointStore::new(&path);
        store.set(PgLsn::from(1234)).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "1234");
    }

    #[test]
    fn test_corrupt_value_returns_zero() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("checkpoint");
        fs::write(&path, "not-a-number").unwrap();
        let store = FileCheckpointStore::new(&path);
        assert_eq!(u64::from(store.get().unwrap()), 0);
    }

    #[test]
    fn test_set_refuses_to_move_backward() {
        let dir = tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("checkpoint"));
        store.set(PgLsn::from(500)).unwrap();
        store.set(PgLsn::from(100)).unwrap();
        assert_eq!(u64::from(store.get().unwrap()), 500);
    }

    #[test]
    fn test_no_temp_file_left_behind() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("checkpoint");
        let store = FileCheckpointStore::new(&path);
        store.set(PgLsn::from(7)).unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("checkpoint");
        {
            let store = FileCheckpointStore::new(&path);
            store.set(PgLsn::from(999)).unwrap();
        }
        let reopened = FileCheckpointStore::new(&path);
        assert_eq!(u64::from(reopened.get().unwrap()), 999);
    }

    #[test]
    fn test_creates_parent_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("deep").join("checkpoint");
        let store = FileCheckpointStore::new(&path);
        store.set(PgLsn::from(1)).unwrap();
        assert!(path.exists());
    }
}
