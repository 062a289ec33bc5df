//! Artifact coordinates and loading
//!
//! This module provides the coordinate value type identifying artifact
//! versions, the loader capability that turns coordinates into live runtime
//! handles, and a loader backed by a local on-disk repository.

pub mod coordinate;
pub mod loader;
pub mod repository;

pub use coordinate::ReleaseCoordinate;
pub use loader::{ArtifactLoader, EngineKind, EngineRuntime, ResolveError, RuntimeHandle};
pub use repository::{ArtifactDescriptor, Definition, EngineFactory, RepositoryLoader};
