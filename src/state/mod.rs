//! Durable registry state
//!
//! Stores persist one identity/coordinate/status tuple per known container.
//! Runtime handles are process-local and never persisted; the tuples carry
//! enough information to re-resolve after a restart.

pub mod file;

pub use file::FileStateStore;

use crate::artifact::coordinate::ReleaseCoordinate;
use crate::container::record::{ContainerRecord, ContainerStatus};
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use thiserror::Error;

/// State store error types
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt state snapshot: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("Lock error: {0}")]
    Lock(String),
}

/// Durable tuple for one container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedContainer {
    /// Container id
    pub id: String,
    /// Artifact group
    pub group: String,
    /// Artifact name
    pub name: String,
    /// Artifact version
    pub version: String,
    /// Lifecycle status at the time of the snapshot
    pub status: ContainerStatus,
}

impl PersistedContainer {
    /// Tuple for a container record
    pub fn from_record(record: &ContainerRecord) -> Self {
        Self {
            id: record.id.clone(),
            group: record.coordinate.group.clone(),
            name: record.coordinate.name.clone(),
            version: record.coordinate.version.clone(),
            status: record.status,
        }
    }

    /// Coordinate carried by this tuple
    pub fn coordinate(&self) -> ReleaseCoordinate {
        ReleaseCoordinate {
            group: self.group.clone(),
            name: self.name.clone(),
            version: self.version.clone(),
        }
    }
}

/// Durable snapshot store for registry contents
///
/// `snapshot` must be atomic: a crash mid-write leaves the previously
/// durable snapshot intact and readable.
pub trait StateStore: Send + Sync {
    /// Durably replace the stored container set
    fn snapshot(&self, records: &[PersistedContainer]) -> std::result::Result<(), StoreError>;

    /// Load the last durable snapshot
    fn load(&self) -> std::result::Result<Vec<PersistedContainer>, StoreError>;
}

/// Volatile store for tests and embedders that do not need durability
#[derive(Default)]
pub struct MemoryStateStore {
    records: RwLock<Vec<PersistedContainer>>,
}

impl StateStore for MemoryStateStore {
    fn snapshot(&self, records: &[PersistedContainer]) -> std::result::Result<(), StoreError> {
        let mut stored = self
            .records
            .write()
            .map_err(|_| StoreError::Lock("Failed to acquire write lock".to_string()))?;
        *stored = records.to_vec();
        Ok(())
    }

    fn load(&self) -> std::result::Result<Vec<PersistedContainer>, StoreError> {
        let stored = self
            .records
            .read()
            .map_err(|_| StoreError::Lock("Failed to acquire read lock".to_string()))?;
        Ok(stored.clone())
    }
}
