//! Versioned artifact coordinates

use crate::error::{CrucibleError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Coordinate of one resolvable artifact version
///
/// Two coordinates belong to the same artifact family when group and name
/// match, regardless of version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReleaseCoordinate {
    /// Group the artifact is published under (e.g. "com.example.billing")
    pub group: String,
    /// Artifact name
    pub name: String,
    /// Artifact version
    pub version: String,
}

impl ReleaseCoordinate {
    /// Create a coordinate, validating all three segments
    pub fn new(group: &str, name: &str, version: &str) -> Result<Self> {
        validate_segment("group", group)?;
        validate_segment("name", name)?;
        validate_segment("version", version)?;

        Ok(Self {
            group: group.to_string(),
            name: name.to_string(),
            version: version.to_string(),
        })
    }

    /// Whether two coordinates identify the same artifact family
    pub fn same_family(&self, other: &ReleaseCoordinate) -> bool {
        self.group == other.group && self.name == other.name
    }
}

fn validate_segment(label: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(CrucibleError::InvalidRequest(format!(
            "coordinate {} must not be empty",
            label
        )));
    }
    if value.contains(':') || value.chars().any(char::is_whitespace) {
        return Err(CrucibleError::InvalidRequest(format!(
            "coordinate {} '{}' must not contain ':' or whitespace",
            label, value
        )));
    }
    Ok(())
}

impl std::fmt::Display for ReleaseCoordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.group, self.name, self.version)
    }
}

impl FromStr for ReleaseCoordinate {
    type Err = CrucibleError;

    /// Parse a coordinate in `group:name:version` form
    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 3 {
            return Err(CrucibleError::InvalidRequest(format!(
                "coordinate '{}' must have the form group:name:version",
                s
            )));
        }
        ReleaseCoordinate::new(parts[0], parts[1], parts[2])
    }
}
