//! Container records

use crate::artifact::coordinate::ReleaseCoordinate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Container lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    /// Container holds a live runtime for its coordinate
    Active,
    /// Container has no runtime because resolution failed
    Failed,
    /// Container has been disposed
    Disposed,
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContainerStatus::Active => write!(f, "active"),
            ContainerStatus::Failed => write!(f, "failed"),
            ContainerStatus::Disposed => write!(f, "disposed"),
        }
    }
}

/// Details of the most recent failed transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureInfo {
    /// Human-readable cause
    pub message: String,
    /// Coordinate the failed operation asked for
    pub requested: ReleaseCoordinate,
    /// When the failure happened
    pub occurred_at: DateTime<Utc>,
}

/// Point-in-time snapshot of one container
///
/// The live runtime handle stays inside the registry; a record only carries
/// the identity, coordinate, and status a caller can act on. For Active and
/// Failed containers `coordinate` is the version of the runtime currently
/// held (or last held), never the version of a request that failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerRecord {
    /// Stable external id
    pub id: String,
    /// Coordinate of the held (or last held) runtime
    pub coordinate: ReleaseCoordinate,
    /// Lifecycle status
    pub status: ContainerStatus,
    /// Most recent failed transition, if any
    pub last_error: Option<FailureInfo>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last mutation time
    pub updated_at: DateTime<Utc>,
}
