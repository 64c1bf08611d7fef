//! Identifiers for stagehand entities.

use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Unique identifier for a single boot sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BootId(Ulid);

impl BootId {
    /// Generate a new BootId
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for BootId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BootId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for BootId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Stable identity of a shared resource: the scope it is declared in plus
/// its index within that scope.
///
/// The derived ordering (scope, then index) is the baseline order used when
/// resolving dependencies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    /// Declaring scope
    pub scope: String,
    /// Position within the scope
    pub index: u32,
}

impl ResourceKey {
    /// Create a new resource key.
    pub fn new(scope: impl Into<String>, index: u32) -> Self {
        Self {
            scope: scope.into(),
            index,
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.scope, self.index)
    }
}
