//! Boot-time configuration for the startup scheduler.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::time::Duration;

/// Configuration for a boot sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartupConfig {
    /// Name of the boot-level asset, used when reporting issues
    #[serde(default = "default_boot_name")]
    pub boot_name: String,
    /// Maximum time to wait for every provider (None = unbounded)
    #[serde(
        default,
        rename = "max_wait_ms",
        serialize_with = "serialize_millis",
        deserialize_with = "deserialize_millis"
    )]
    pub max_wait: Option<Duration>,
}

fn default_boot_name() -> String {
    "application".to_string()
}

fn serialize_millis<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
    value
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .serialize(s)
}

fn deserialize_millis<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
    Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            boot_name: default_boot_name(),
            max_wait: None,
        }
    }
}

impl StartupConfig {
    /// Create a new configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the boot asset name.
    pub fn with_boot_name(mut self, name: impl Into<String>) -> Self {
        self.boot_name = name.into();
        self
    }

    /// Bound the overall startup wait.
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }
}
