//! Artifact loader capability
//!
//! A loader turns a [`ReleaseCoordinate`] into a live [`RuntimeHandle`] and
//! releases handles when their container no longer needs them. Handles are
//! moved into `dispose`, so a handle can never be released twice.

use super::coordinate::ReleaseCoordinate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Engine technology backing a loaded artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Decision/rule payloads
    Rules,
    /// Workflow/process payloads
    Process,
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineKind::Rules => write!(f, "rules"),
            EngineKind::Process => write!(f, "process"),
        }
    }
}

/// Live, in-memory runtime built from a resolved artifact
///
/// Everything the runtime owns (definition tables, caches) must be reachable
/// only through it, so dropping the runtime releases the whole payload.
pub trait EngineRuntime: Send + Sync {
    /// Engine technology this runtime executes on
    fn kind(&self) -> EngineKind;

    /// Number of business-logic definitions loaded
    fn definition_count(&self) -> usize;
}

/// Exclusively-owned resource representing one resolved artifact version
///
/// A handle belongs to exactly one container at a time and is consumed by
/// [`ArtifactLoader::dispose`].
pub struct RuntimeHandle {
    id: String,
    coordinate: ReleaseCoordinate,
    runtime: Box<dyn EngineRuntime>,
}

impl RuntimeHandle {
    /// Wrap a freshly built runtime
    pub fn new(coordinate: ReleaseCoordinate, runtime: Box<dyn EngineRuntime>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            coordinate,
            runtime,
        }
    }

    /// Unique handle id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Coordinate this handle was resolved from
    pub fn coordinate(&self) -> &ReleaseCoordinate {
        &self.coordinate
    }

    /// The live runtime
    pub fn runtime(&self) -> &dyn EngineRuntime {
        self.runtime.as_ref()
    }
}

impl std::fmt::Debug for RuntimeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeHandle")
            .field("id", &self.id)
            .field("coordinate", &self.coordinate)
            .field("kind", &self.runtime.kind())
            .finish()
    }
}

/// Errors produced while resolving a coordinate
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("Artifact not found: {0}")]
    ArtifactNotFound(ReleaseCoordinate),

    #[error("Version {} of {}:{} is unavailable (available: {})",
        .coordinate.version, .coordinate.group, .coordinate.name, .available.join(", "))]
    VersionUnavailable {
        coordinate: ReleaseCoordinate,
        available: Vec<String>,
    },

    #[error("Artifact validation failed for {coordinate}: {message}")]
    Validation {
        coordinate: ReleaseCoordinate,
        message: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Capability for resolving coordinates into live runtime handles
///
/// Implementations must be safe to call concurrently for different
/// coordinates. `dispose` takes the handle by value and must release every
/// resource transitively reachable from it before returning.
pub trait ArtifactLoader: Send + Sync {
    /// Resolve a coordinate into a live handle
    fn resolve(&self, coordinate: &ReleaseCoordinate)
        -> std::result::Result<RuntimeHandle, ResolveError>;

    /// Release a handle and everything it owns
    fn dispose(&self, handle: RuntimeHandle);
}
