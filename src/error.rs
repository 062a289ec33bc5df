//! Error types for Crucible

use crate::artifact::coordinate::ReleaseCoordinate;
use crate::artifact::loader::ResolveError;
use crate::state::StoreError;
use thiserror::Error;

/// Result type for Crucible operations
pub type Result<T> = std::result::Result<T, CrucibleError>;

/// Crucible error types
#[derive(Error, Debug)]
pub enum CrucibleError {
    #[error("Container already exists: {0}")]
    ContainerExists(String),

    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    #[error("Failed to resolve {coordinate} for container {id}: {source}")]
    ResolutionFailed {
        id: String,
        coordinate: ReleaseCoordinate,
        #[source]
        source: ResolveError,
    },

    #[error("Persistence failed: {0}")]
    Persistence(#[from] StoreError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
