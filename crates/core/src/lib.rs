//! Stagehand core data model.
//!
//! This crate defines the dependency graph shared by the resource resolver
//! and the startup scheduler, along with identifiers, provider lifecycle
//! states and the configuration-issue sink.

#![warn(missing_docs)]

// Identities
mod id;

// Graph and lifecycle
mod graph;
mod state;

// Configuration issues
mod issue;

// Re-exports
pub use id::{BootId, ResourceKey};
pub use graph::{Closures, DependencyGraph, GraphError, GraphResult};
pub use state::ProviderState;
pub use issue::{AssetKind, CollectingIssueSink, Issue, IssueSink, TracingIssueSink};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
