//! Dependency resolution for work units.
//!
//! Given the resources a work unit references directly, the resolver walks
//! the lookup to collect every transitively required resource, then orders
//! them so each resource comes after everything it depends on.

use serde::{Deserialize, Serialize};
use stagehand_core::{AssetKind, DependencyGraph, GraphError, IssueSink, ResourceKey};
use std::collections::{BTreeMap, HashMap};
use std::hash::BuildHasher;
use tracing::{debug, info};

/// What the lookup knows about a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    /// Display name
    pub name: String,
    /// Direct dependencies
    #[serde(default)]
    pub dependencies: Vec<ResourceKey>,
}

impl ResourceDescriptor {
    /// Create a descriptor without dependencies.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dependencies: Vec::new(),
        }
    }

    /// Add a direct dependency.
    pub fn depends_on(mut self, key: ResourceKey) -> Self {
        self.dependencies.push(key);
        self
    }
}

/// Maps a resource identity to its own direct dependencies.
///
/// Implementations must be pure; the resolver may call `lookup` any number
/// of times for the same key.
pub trait ResourceLookup {
    /// Describe a resource, or `None` if it does not exist.
    fn lookup(&self, key: &ResourceKey) -> Option<ResourceDescriptor>;
}

impl<S: BuildHasher> ResourceLookup for HashMap<ResourceKey, ResourceDescriptor, S> {
    fn lookup(&self, key: &ResourceKey) -> Option<ResourceDescriptor> {
        self.get(key).cloned()
    }
}

impl ResourceLookup for BTreeMap<ResourceKey, ResourceDescriptor> {
    fn lookup(&self, key: &ResourceKey) -> Option<ResourceDescriptor> {
        self.get(key).cloned()
    }
}

/// A unit of work and the resources it references directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkUnit {
    /// Unit name
    pub name: String,
    /// Direct resource references
    #[serde(default)]
    pub references: Vec<ResourceKey>,
}

impl WorkUnit {
    /// Create a unit with the given references.
    pub fn new(name: impl Into<String>, references: Vec<ResourceKey>) -> Self {
        Self {
            name: name.into(),
            references,
        }
    }
}

/// A resource in a resolved order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedResource {
    /// Resource identity
    pub key: ResourceKey,
    /// Display name
    pub name: String,
}

/// Every resource a unit needs, dependencies first.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ResolvedOrder {
    resources: Vec<ResolvedResource>,
}

impl ResolvedOrder {
    /// Number of resources.
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Whether the unit needs no resources.
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Iterate the resources in order.
    pub fn iter(&self) -> std::slice::Iter<'_, ResolvedResource> {
        self.resources.iter()
    }

    /// The resource keys in order.
    pub fn keys(&self) -> Vec<&ResourceKey> {
        self.resources.iter().map(|r| &r.key).collect()
    }

    /// The resource names in order.
    pub fn names(&self) -> Vec<&str> {
        self.resources.iter().map(|r| r.name.as_str()).collect()
    }

    /// Position of a resource in the order.
    pub fn position(&self, key: &ResourceKey) -> Option<usize> {
        self.resources.iter().position(|r| &r.key == key)
    }
}

impl<'a> IntoIterator for &'a ResolvedOrder {
    type Item = &'a ResolvedResource;
    type IntoIter = std::slice::Iter<'a, ResolvedResource>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Why a unit could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    /// A reference points at a resource the lookup does not know
    #[error("Missing resource: {key}")]
    MissingResource {
        /// The dangling reference
        key: ResourceKey,
    },

    /// Two resources depend on each other
    #[error("Dependency cycle between '{first}' and '{second}'")]
    Cycle {
        /// Lexicographically lower name of the pair
        first: String,
        /// Lexicographically higher name of the pair
        second: String,
    },

    /// The graph rejected the collected resources
    #[error(transparent)]
    Graph(GraphError),
}

impl From<GraphError> for ResolveError {
    fn from(err: GraphError) -> Self {
        match err {
            GraphError::Cycle { first, second } => ResolveError::Cycle { first, second },
            other => ResolveError::Graph(other),
        }
    }
}

/// Outcome of resolving many units at once.
#[derive(Debug, Clone, Default)]
pub struct ResolutionReport {
    /// Units that resolved, by name
    pub resolved: BTreeMap<String, ResolvedOrder>,
    /// Units that were excluded because of a configuration issue
    pub excluded: Vec<String>,
}

impl ResolutionReport {
    /// Whether every unit resolved.
    pub fn is_clean(&self) -> bool {
        self.excluded.is_empty()
    }
}

/// Resolves the resources required by work units.
pub struct DependencyResolver;

impl DependencyResolver {
    /// Create a new resolver.
    pub fn new() -> Self {
        Self
    }

    /// Resolve one unit.
    pub fn resolve(
        &self,
        unit: &WorkUnit,
        lookup: &dyn ResourceLookup,
    ) -> Result<ResolvedOrder, ResolveError> {
        let mut required = self.collect(unit, lookup)?;

        let mut graph = DependencyGraph::new();
        for (key, descriptor) in &required {
            graph.add_node(key.clone(), descriptor.name.clone())?;
        }
        for (key, descriptor) in &required {
            for dependency in &descriptor.dependencies {
                graph.add_dependency(key, dependency)?;
            }
        }

        let order = graph.resolve()?;
        debug!(unit = %unit.name, resources = order.len(), "Resolved unit");

        let resources = order
            .into_iter()
            .filter_map(|key| {
                required
                    .remove(&key)
                    .map(|descriptor| ResolvedResource {
                        key,
                        name: descriptor.name,
                    })
            })
            .collect();

        Ok(ResolvedOrder { resources })
    }

    /// Walk the lookup from the unit's direct references, keeping each
    /// resource once no matter how many dependents reach it.
    fn collect(
        &self,
        unit: &WorkUnit,
        lookup: &dyn ResourceLookup,
    ) -> Result<BTreeMap<ResourceKey, ResourceDescriptor>, ResolveError> {
        let mut required = BTreeMap::new();
        let mut pending: Vec<ResourceKey> = unit.references.iter().rev().cloned().collect();

        while let Some(key) = pending.pop() {
            if required.contains_key(&key) {
                continue;
            }

            let descriptor = lookup
                .lookup(&key)
                .ok_or_else(|| ResolveError::MissingResource { key: key.clone() })?;

            pending.extend(descriptor.dependencies.iter().rev().cloned());
            required.insert(key, descriptor);
        }

        Ok(required)
    }

    /// Resolve every unit, reporting failures to `sink` and excluding the
    /// failing units instead of stopping at the first one.
    pub fn resolve_all<'a>(
        &self,
        units: impl IntoIterator<Item = &'a WorkUnit>,
        lookup: &dyn ResourceLookup,
        sink: &dyn IssueSink,
    ) -> ResolutionReport {
        let mut report = ResolutionReport::default();

        for unit in units {
            match self.resolve(unit, lookup) {
                Ok(order) => {
                    report.resolved.insert(unit.name.clone(), order);
                }
                Err(e) => {
                    sink.report_issue(AssetKind::Task, &unit.name, &e.to_string());
                    report.excluded.push(unit.name.clone());
                }
            }
        }

        info!(
            resolved = report.resolved.len(),
            excluded = report.excluded.len(),
            "Resolved work units"
        );

        report
    }
}

impl Default for DependencyResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagehand_core::CollectingIssueSink;

    fn key(scope: &str, index: u32) -> ResourceKey {
        ResourceKey::new(scope, index)
    }

    /// config <- db <- repo <- service, plus an independent clock.
    fn catalog() -> HashMap<ResourceKey, ResourceDescriptor> {
        HashMap::from([
            (key("app", 0), ResourceDescriptor::new("config")),
            (
                key("app", 1),
                ResourceDescriptor::new("db").depends_on(key("app", 0)),
            ),
            (
                key("domain", 0),
                ResourceDescriptor::new("repo").depends_on(key("app", 1)),
            ),
            (
                key("domain", 1),
                ResourceDescriptor::new("service")
                    .depends_on(key("domain", 0))
                    .depends_on(key("app", 0)),
            ),
            (key("app", 2), ResourceDescriptor::new("clock")),
        ])
    }

    #[test]
    fn test_resolves_transitive_closure_in_dependency_order() {
        let unit = WorkUnit::new("checkout", vec![key("domain", 1)]);
        let order = DependencyResolver::new().resolve(&unit, &catalog()).unwrap();

        assert_eq!(order.names(), vec!["config", "db", "repo", "service"]);
    }

    #[test]
    fn test_every_dependency_precedes_its_dependent() {
        let lookup = catalog();
        let unit = WorkUnit::new("all", vec![key("domain", 1), key("app", 2)]);
        let order = DependencyResolver::new().resolve(&unit, &lookup).unwrap();

        for resource in &order {
            let descriptor = lookup.lookup(&resource.key).unwrap();
            for dep in &descriptor.dependencies {
                assert!(order.position(dep).unwrap() < order.position(&resource.key).unwrap());
            }
        }
    }

    #[test]
    fn test_independent_resources_with_fewer_dependencies_come_first() {
        let unit = WorkUnit::new("all", vec![key("domain", 1), key("app", 2)]);
        let order = DependencyResolver::new().resolve(&unit, &catalog()).unwrap();

        // clock and config both have no dependencies; baseline order keeps
        // app#0 ahead of app#2.
        assert_eq!(order.names(), vec!["config", "clock", "db", "repo", "service"]);
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let lookup = catalog();
        let unit = WorkUnit::new("all", vec![key("app", 2), key("domain", 1)]);
        let resolver = DependencyResolver::new();

        let first = resolver.resolve(&unit, &lookup).unwrap();
        let second = resolver.resolve(&unit, &lookup).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_diamond_dependency_appears_once() {
        let lookup = BTreeMap::from([
            (key("s", 0), ResourceDescriptor::new("base")),
            (key("s", 1), ResourceDescriptor::new("left").depends_on(key("s", 0))),
            (key("s", 2), ResourceDescriptor::new("right").depends_on(key("s", 0))),
        ]);
        let unit = WorkUnit::new("diamond", vec![key("s", 1), key("s", 2)]);
        let order = DependencyResolver::new().resolve(&unit, &lookup).unwrap();

        assert_eq!(order.len(), 3);
        assert_eq!(order.names().iter().filter(|n| **n == "base").count(), 1);
        assert_eq!(order.names(), vec!["base", "left", "right"]);
    }

    #[test]
    fn test_mutual_reference_is_a_cycle() {
        let lookup = BTreeMap::from([
            (key("s", 0), ResourceDescriptor::new("zeta").depends_on(key("s", 1))),
            (key("s", 1), ResourceDescriptor::new("alpha").depends_on(key("s", 0))),
        ]);
        let unit = WorkUnit::new("loop", vec![key("s", 0)]);
        let err = DependencyResolver::new().resolve(&unit, &lookup).unwrap_err();

        assert_eq!(
            err,
            ResolveError::Cycle {
                first: "alpha".to_string(),
                second: "zeta".to_string(),
            }
        );
    }

    #[test]
    fn test_dangling_reference_is_missing_resource() {
        let lookup = BTreeMap::from([(
            key("s", 0),
            ResourceDescriptor::new("orphan").depends_on(key("gone", 4)),
        )]);
        let unit = WorkUnit::new("broken", vec![key("s", 0)]);

        assert_eq!(
            DependencyResolver::new().resolve(&unit, &lookup),
            Err(ResolveError::MissingResource { key: key("gone", 4) })
        );
    }

    #[test]
    fn test_unit_without_references_resolves_empty() {
        let unit = WorkUnit::new("idle", Vec::new());
        let order = DependencyResolver::new().resolve(&unit, &catalog()).unwrap();
        assert!(order.is_empty());
    }

    #[test]
    fn test_resolve_all_excludes_failing_units_and_reports_them() {
        let lookup = catalog();
        let units = vec![
            WorkUnit::new("checkout", vec![key("domain", 1)]),
            WorkUnit::new("broken", vec![key("missing", 0)]),
            WorkUnit::new("clock", vec![key("app", 2)]),
        ];
        let sink = CollectingIssueSink::new();

        let report = DependencyResolver::new().resolve_all(&units, &lookup, &sink);

        assert!(!report.is_clean());
        assert_eq!(report.excluded, vec!["broken".to_string()]);
        assert_eq!(report.resolved.len(), 2);
        assert_eq!(report.resolved["clock"].names(), vec!["clock"]);

        let issues = sink.issues();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, AssetKind::Task);
        assert_eq!(issues[0].asset, "broken");
        assert!(issues[0].message.contains("missing#0"));
    }

    #[test]
    fn test_descriptor_deserializes_without_dependencies() {
        let descriptor: ResourceDescriptor =
            serde_json::from_str(r#"{"name":"config"}"#).unwrap();
        assert!(descriptor.dependencies.is_empty());
    }
}
