//! Configuration issues and the sinks that collect them.
//!
//! Expected configuration problems (missing names, cycles) never panic or
//! bubble up as hard errors from the resolver. They are reported here and
//! the affected asset is excluded from the result.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Mutex, PoisonError};
use tracing::warn;

/// The kind of asset an issue is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    /// A unit of work whose resources are being resolved
    Task,
    /// A startup provider
    Provider,
    /// The boot sequence as a whole
    Boot,
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetKind::Task => write!(f, "task"),
            AssetKind::Provider => write!(f, "provider"),
            AssetKind::Boot => write!(f, "boot"),
        }
    }
}

/// A single reported configuration issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    /// What kind of asset is affected
    pub kind: AssetKind,
    /// Name of the affected asset
    pub asset: String,
    /// Human-readable description
    pub message: String,
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}': {}", self.kind, self.asset, self.message)
    }
}

/// Receives configuration issues.
pub trait IssueSink: Send + Sync {
    /// Report an issue about an asset.
    fn report_issue(&self, kind: AssetKind, asset: &str, message: &str);
}

/// Forwards issues to `tracing` as warnings.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingIssueSink;

impl IssueSink for TracingIssueSink {
    fn report_issue(&self, kind: AssetKind, asset: &str, message: &str) {
        warn!(%kind, asset, "{}", message);
    }
}

/// Keeps every reported issue in memory.
#[derive(Debug, Default)]
pub struct CollectingIssueSink {
    issues: Mutex<Vec<Issue>>,
}

impl CollectingIssueSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the issues reported so far.
    pub fn issues(&self) -> Vec<Issue> {
        self.issues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of issues reported so far.
    pub fn len(&self) -> usize {
        self.issues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no issue was reported.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl IssueSink for CollectingIssueSink {
    fn report_issue(&self, kind: AssetKind, asset: &str, message: &str) {
        self.issues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Issue {
                kind,
                asset: asset.to_string(),
                message: message.to_string(),
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collecting_sink_keeps_order() {
        let sink = CollectingIssueSink::new();
        assert!(sink.is_empty());

        sink.report_issue(AssetKind::Task, "checkout", "missing resource db#1");
        sink.report_issue(AssetKind::Provider, "cache", "unknown provider 'UNKNOWN'");

        let issues = sink.issues();
        assert_eq!(sink.len(), 2);
        assert_eq!(issues[0].asset, "checkout");
        assert_eq!(issues[1].kind, AssetKind::Provider);
        assert_eq!(
            issues[1].to_string(),
            "provider 'cache': unknown provider 'UNKNOWN'"
        );
    }

    #[test]
    fn test_asset_kind_serializes_lowercase() {
        let json = serde_json::to_string(&AssetKind::Boot).unwrap();
        assert_eq!(json, "\"boot\"");
    }

    #[test]
    fn test_tracing_sink_accepts_issues() {
        TracingIssueSink.report_issue(AssetKind::Boot, "application", "cycle");
    }
}
