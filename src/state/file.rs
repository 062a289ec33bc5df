//! File-backed state store
//!
//! Writes the container snapshot to a JSON file by writing a temporary file
//! and atomically renaming it over the target, so a crash mid-write leaves
//! the previous snapshot intact.

use super::{PersistedContainer, StateStore, StoreError};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

/// State store persisting snapshots to a single JSON file
pub struct FileStateStore {
    /// Snapshot file path
    path: PathBuf,
    /// Serializes writers; rename is atomic but the temp file is shared
    write_lock: Mutex<()>,
}

impl FileStateStore {
    /// Create a store writing to `path`, creating parent directories
    pub fn new(path: PathBuf) -> std::result::Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    /// Snapshot file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut path = self.path.as_os_str().to_os_string();
        path.push(".tmp");
        PathBuf::from(path)
    }
}

impl StateStore for FileStateStore {
    fn snapshot(&self, records: &[PersistedContainer]) -> std::result::Result<(), StoreError> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| StoreError::Lock("Failed to acquire write lock".to_string()))?;

        let json = serde_json::to_vec_pretty(records)?;
        let temp = self.temp_path();

        let mut file = std::fs::File::create(&temp)?;
        file.write_all(&json)?;
        file.sync_all()?;
        drop(file);

        std::fs::rename(&temp, &self.path)?;
        debug!(
            "Persisted {} container(s) to {}",
            records.len(),
            self.path.display()
        );
        Ok(())
    }

    fn load(&self) -> std::result::Result<Vec<PersistedContainer>, StoreError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let bytes = std::fs::read(&self.path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}
