//! Local artifact repository
//!
//! Resolves coordinates against an on-disk repository laid out Maven-style:
//! the group is split on `.` into nested directories, followed by one
//! directory per artifact name and one per published version:
//!
//! ```text
//! <root>/com/example/billing/pricing-rules/1.0/pricing-rules-1.0.json
//! ```
//!
//! Each version directory holds a JSON descriptor and an optional
//! `.sha256` sidecar; a sidecar that does not match the descriptor bytes
//! fails resolution. The descriptor names the engine technology its payload
//! targets, and a registered [`EngineFactory`] for that technology builds
//! the live runtime.

use super::coordinate::ReleaseCoordinate;
use super::loader::{ArtifactLoader, EngineKind, EngineRuntime, ResolveError, RuntimeHandle};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;
use walkdir::WalkDir;

/// One named business-logic definition inside an artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Definition {
    /// Definition name, unique within the artifact
    pub name: String,
    /// Definition body
    pub body: String,
}

/// Artifact descriptor stored in the repository
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactDescriptor {
    /// Group the artifact was published under
    pub group: String,
    /// Artifact name
    pub name: String,
    /// Artifact version
    pub version: String,
    /// Engine technology the payload targets
    pub kind: EngineKind,
    /// Business-logic definitions
    pub definitions: Vec<Definition>,
}

impl ArtifactDescriptor {
    /// Coordinate this descriptor was published under
    pub fn coordinate(&self) -> ReleaseCoordinate {
        ReleaseCoordinate {
            group: self.group.clone(),
            name: self.name.clone(),
            version: self.version.clone(),
        }
    }
}

/// Builds live runtimes for one engine technology
pub trait EngineFactory: Send + Sync {
    /// Engine technology this factory covers
    fn kind(&self) -> EngineKind;

    /// Build a runtime from a descriptor
    fn build(
        &self,
        descriptor: &ArtifactDescriptor,
    ) -> std::result::Result<Box<dyn EngineRuntime>, ResolveError>;
}

/// Rule-engine runtime: indexed rule definitions
struct RuleSetRuntime {
    rules: HashMap<String, String>,
}

impl EngineRuntime for RuleSetRuntime {
    fn kind(&self) -> EngineKind {
        EngineKind::Rules
    }

    fn definition_count(&self) -> usize {
        self.rules.len()
    }
}

/// Process-engine runtime: indexed process definitions
struct ProcessSetRuntime {
    processes: HashMap<String, String>,
}

impl EngineRuntime for ProcessSetRuntime {
    fn kind(&self) -> EngineKind {
        EngineKind::Process
    }

    fn definition_count(&self) -> usize {
        self.processes.len()
    }
}

fn index_definitions(
    descriptor: &ArtifactDescriptor,
) -> std::result::Result<HashMap<String, String>, ResolveError> {
    let mut indexed = HashMap::with_capacity(descriptor.definitions.len());
    for definition in &descriptor.definitions {
        if definition.name.is_empty() {
            return Err(ResolveError::Validation {
                coordinate: descriptor.coordinate(),
                message: "definition with empty name".to_string(),
            });
        }
        if indexed
            .insert(definition.name.clone(), definition.body.clone())
            .is_some()
        {
            return Err(ResolveError::Validation {
                coordinate: descriptor.coordinate(),
                message: format!("duplicate definition '{}'", definition.name),
            });
        }
    }
    Ok(indexed)
}

/// Factory for rule-engine artifacts
pub struct RuleEngineFactory;

impl EngineFactory for RuleEngineFactory {
    fn kind(&self) -> EngineKind {
        EngineKind::Rules
    }

    fn build(
        &self,
        descriptor: &ArtifactDescriptor,
    ) -> std::result::Result<Box<dyn EngineRuntime>, ResolveError> {
        let rules = index_definitions(descriptor)?;
        Ok(Box::new(RuleSetRuntime { rules }))
    }
}

/// Factory for process-engine artifacts
pub struct ProcessEngineFactory;

impl EngineFactory for ProcessEngineFactory {
    fn kind(&self) -> EngineKind {
        EngineKind::Process
    }

    fn build(
        &self,
        descriptor: &ArtifactDescriptor,
    ) -> std::result::Result<Box<dyn EngineRuntime>, ResolveError> {
        let processes = index_definitions(descriptor)?;
        Ok(Box::new(ProcessSetRuntime { processes }))
    }
}

/// Loader backed by a local artifact repository
///
/// The engine technology named in each descriptor selects the factory that
/// builds the runtime; the loaded payload is never type-inspected.
pub struct RepositoryLoader {
    /// Repository root
    root: PathBuf,
    /// Factories indexed by engine kind
    factories: HashMap<EngineKind, Arc<dyn EngineFactory>>,
}

impl RepositoryLoader {
    /// Create a loader with the rule and process factories registered
    pub fn new(root: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&root)?;

        let mut factories: HashMap<EngineKind, Arc<dyn EngineFactory>> = HashMap::new();
        factories.insert(EngineKind::Rules, Arc::new(RuleEngineFactory));
        factories.insert(EngineKind::Process, Arc::new(ProcessEngineFactory));

        Ok(Self { root, factories })
    }

    /// Create a loader with no factories registered
    pub fn bare(root: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&root)?;

        Ok(Self {
            root,
            factories: HashMap::new(),
        })
    }

    /// Register a factory, replacing any existing one for the same kind
    pub fn with_factory(mut self, factory: Arc<dyn EngineFactory>) -> Self {
        self.factories.insert(factory.kind(), factory);
        self
    }

    /// Publish a descriptor into the repository, with a checksum sidecar
    pub fn publish(&self, descriptor: &ArtifactDescriptor) -> Result<ReleaseCoordinate> {
        let coordinate = ReleaseCoordinate::new(
            &descriptor.group,
            &descriptor.name,
            &descriptor.version,
        )?;

        let dir = self.version_dir(&coordinate);
        std::fs::create_dir_all(&dir)?;

        let bytes = serde_json::to_vec_pretty(descriptor)?;
        let path = self.descriptor_path(&coordinate);
        std::fs::write(&path, &bytes)?;
        std::fs::write(sidecar_path(&path), hex_digest(&bytes))?;

        debug!("Published {} to {}", coordinate, path.display());
        Ok(coordinate)
    }

    fn family_dir(&self, coordinate: &ReleaseCoordinate) -> PathBuf {
        let mut dir = self.root.clone();
        for part in coordinate.group.split('.') {
            dir.push(part);
        }
        dir.push(&coordinate.name);
        dir
    }

    fn version_dir(&self, coordinate: &ReleaseCoordinate) -> PathBuf {
        self.family_dir(coordinate).join(&coordinate.version)
    }

    fn descriptor_path(&self, coordinate: &ReleaseCoordinate) -> PathBuf {
        self.version_dir(coordinate)
            .join(format!("{}-{}.json", coordinate.name, coordinate.version))
    }

    /// Published versions of a coordinate's artifact family, sorted
    fn available_versions(&self, coordinate: &ReleaseCoordinate) -> Vec<String> {
        let mut versions: Vec<String> = WalkDir::new(self.family_dir(coordinate))
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_dir())
            .filter_map(|entry| entry.file_name().to_str().map(String::from))
            .collect();
        versions.sort();
        versions
    }
}

fn sidecar_path(descriptor_path: &std::path::Path) -> PathBuf {
    let mut path = descriptor_path.as_os_str().to_os_string();
    path.push(".sha256");
    PathBuf::from(path)
}

fn hex_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

impl ArtifactLoader for RepositoryLoader {
    fn resolve(
        &self,
        coordinate: &ReleaseCoordinate,
    ) -> std::result::Result<RuntimeHandle, ResolveError> {
        let path = self.descriptor_path(coordinate);
        if !path.exists() {
            if self.family_dir(coordinate).exists() {
                return Err(ResolveError::VersionUnavailable {
                    coordinate: coordinate.clone(),
                    available: self.available_versions(coordinate),
                });
            }
            return Err(ResolveError::ArtifactNotFound(coordinate.clone()));
        }

        let bytes = std::fs::read(&path)?;

        let sidecar = sidecar_path(&path);
        if sidecar.exists() {
            let expected = std::fs::read_to_string(&sidecar)?;
            if expected.trim() != hex_digest(&bytes) {
                return Err(ResolveError::Validation {
                    coordinate: coordinate.clone(),
                    message: "checksum mismatch".to_string(),
                });
            }
        }

        let descriptor: ArtifactDescriptor =
            serde_json::from_slice(&bytes).map_err(|e| ResolveError::Validation {
                coordinate: coordinate.clone(),
                message: format!("malformed descriptor: {}", e),
            })?;

        if descriptor.coordinate() != *coordinate {
            return Err(ResolveError::Validation {
                coordinate: coordinate.clone(),
                message: format!(
                    "descriptor declares {}, expected {}",
                    descriptor.coordinate(),
                    coordinate
                ),
            });
        }

        let factory =
            self.factories
                .get(&descriptor.kind)
                .ok_or_else(|| ResolveError::Validation {
                    coordinate: coordinate.clone(),
                    message: format!("no engine registered for kind '{}'", descriptor.kind),
                })?;

        let runtime = factory.build(&descriptor)?;
        debug!(
            "Resolved {} ({} definitions, {} engine)",
            coordinate,
            runtime.definition_count(),
            descriptor.kind
        );

        Ok(RuntimeHandle::new(coordinate.clone(), runtime))
    }

    fn dispose(&self, handle: RuntimeHandle) {
        debug!("Releasing runtime {} for {}", handle.id(), handle.coordinate());
        drop(handle);
    }
}
