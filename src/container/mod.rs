//! Container management module
//!
//! This module provides the container registry and its lifecycle state
//! machine: creation, hot-swap to new artifact versions, disposal, and
//! read-only snapshots.

pub mod record;
pub mod registry;

pub use record::{ContainerRecord, ContainerStatus, FailureInfo};
pub use registry::ContainerRegistry;
