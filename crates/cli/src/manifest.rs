//! JSON manifest describing resources, work units and providers.

use serde::Deserialize;
use stagehand_core::ResourceKey;
use stagehand_execution::{ResourceDescriptor, StartupConfig, WorkUnit};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Errors while loading a manifest.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    /// The file could not be read
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not a valid manifest
    #[error("Invalid manifest {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Two resources share an identity
    #[error("Resource {key} is declared more than once")]
    DuplicateResource { key: ResourceKey },
}

/// A resource declaration.
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceEntry {
    pub scope: String,
    pub index: u32,
    pub name: String,
    #[serde(default)]
    pub depends_on: Vec<ResourceKey>,
}

/// A simulated provider declaration.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderEntry {
    pub name: String,
    #[serde(default)]
    pub before: Vec<String>,
    #[serde(default)]
    pub after: Vec<String>,
    /// How long startup takes; zero completes inside `start`
    #[serde(default)]
    pub delay_ms: u64,
    /// Fail with this message instead of completing
    #[serde(default)]
    pub fail: Option<String>,
    /// Never signal completion
    #[serde(default)]
    pub never_complete: bool,
}

/// The whole manifest.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub boot: StartupConfig,
    #[serde(default)]
    pub resources: Vec<ResourceEntry>,
    #[serde(default)]
    pub units: Vec<WorkUnit>,
    #[serde(default)]
    pub providers: Vec<ProviderEntry>,
}

impl Manifest {
    /// Read and parse a manifest file.
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        serde_json::from_str(&content).map_err(|source| ManifestError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Index the declared resources for lookup.
    pub fn catalog(&self) -> Result<BTreeMap<ResourceKey, ResourceDescriptor>, ManifestError> {
        let mut catalog = BTreeMap::new();

        for entry in &self.resources {
            let key = ResourceKey::new(entry.scope.clone(), entry.index);
            let descriptor = ResourceDescriptor {
                name: entry.name.clone(),
                dependencies: entry.depends_on.clone(),
            };
            if catalog.insert(key.clone(), descriptor).is_some() {
                return Err(ManifestError::DuplicateResource { key });
            }
        }

        Ok(catalog)
    }
}
