//! Dependency graph over named nodes with deterministic ordering.
//!
//! Both the resource resolver and the startup scheduler are built on this
//! graph. A node is identified by a key whose `Ord` implementation is the
//! *baseline order*: the order two unrelated nodes end up in when nothing
//! else distinguishes them. Edges point from a dependent to its dependency.
//!
//! Resolution sorts the nodes with a comparator that places every
//! dependency before its dependents and otherwise prefers nodes with fewer
//! transitive dependencies, falling back to baseline order. Because a
//! dependent's closure strictly contains its dependency's closure, this
//! comparator is a total order on any acyclic graph.

use std::cmp::Ordering;
use std::collections::{btree_set, BTreeMap, BTreeSet};
use std::fmt;

/// Result type for graph operations
pub type GraphResult<T> = Result<T, GraphError>;

/// Errors that can occur while building or resolving a graph.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// A node was added twice
    #[error("Duplicate node: {node}")]
    DuplicateNode {
        /// The duplicated node
        node: String,
    },

    /// An edge referenced a node that is not in the graph
    #[error("Unknown node: {node}")]
    UnknownNode {
        /// The missing node
        node: String,
    },

    /// Two nodes depend on each other, directly or transitively
    #[error("Cycle detected between '{first}' and '{second}'")]
    Cycle {
        /// Lexicographically lower name of the pair
        first: String,
        /// Lexicographically higher name of the pair
        second: String,
    },
}

/// Transitive dependency sets, keyed by node.
pub type Closures<K> = BTreeMap<K, BTreeSet<K>>;

#[derive(Debug, Clone)]
struct Node<K> {
    name: String,
    dependencies: BTreeSet<K>,
    dependents: BTreeSet<K>,
}

/// A directed dependency graph.
///
/// Edges are immutable once added; the graph is meant to be built, resolved
/// and discarded.
#[derive(Debug, Clone)]
pub struct DependencyGraph<K> {
    nodes: BTreeMap<K, Node<K>>,
}

impl<K: Ord + Clone + fmt::Display> DependencyGraph<K> {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self {
            nodes: BTreeMap::new(),
        }
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether `key` is a node of this graph.
    pub fn contains(&self, key: &K) -> bool {
        self.nodes.contains_key(key)
    }

    /// Add a node with a human-readable name.
    pub fn add_node(&mut self, key: K, name: impl Into<String>) -> GraphResult<()> {
        if self.nodes.contains_key(&key) {
            return Err(GraphError::DuplicateNode {
                node: key.to_string(),
            });
        }
        self.nodes.insert(
            key,
            Node {
                name: name.into(),
                dependencies: BTreeSet::new(),
                dependents: BTreeSet::new(),
            },
        );
        Ok(())
    }

    /// Record that `dependent` depends on `dependency`.
    ///
    /// Both nodes must already be present. A self-edge is accepted and later
    /// reported as a cycle.
    pub fn add_dependency(&mut self, dependent: &K, dependency: &K) -> GraphResult<()> {
        for key in [dependent, dependency] {
            if !self.nodes.contains_key(key) {
                return Err(GraphError::UnknownNode {
                    node: key.to_string(),
                });
            }
        }

        if let Some(node) = self.nodes.get_mut(dependent) {
            node.dependencies.insert(dependency.clone());
        }
        if let Some(node) = self.nodes.get_mut(dependency) {
            node.dependents.insert(dependent.clone());
        }
        Ok(())
    }

    /// The display name of a node.
    pub fn name(&self, key: &K) -> Option<&str> {
        self.nodes.get(key).map(|n| n.name.as_str())
    }

    /// All node keys in baseline order.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.nodes.keys()
    }

    /// Direct dependencies of a node, in baseline order.
    pub fn dependencies(&self, key: &K) -> btree_set::Iter<'_, K> {
        self.nodes
            .get(key)
            .map(|n| n.dependencies.iter())
            .unwrap_or_default()
    }

    /// Nodes that directly depend on `key`, in baseline order.
    pub fn dependents(&self, key: &K) -> btree_set::Iter<'_, K> {
        self.nodes
            .get(key)
            .map(|n| n.dependents.iter())
            .unwrap_or_default()
    }

    /// Compute the transitive dependency set of every node.
    ///
    /// A node only appears in its own closure when it sits on a cycle.
    pub fn closures(&self) -> Closures<K> {
        self.nodes
            .keys()
            .map(|key| (key.clone(), self.closure_of(key)))
            .collect()
    }

    fn closure_of(&self, key: &K) -> BTreeSet<K> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<&K> = self.dependencies(key).collect();

        while let Some(next) = stack.pop() {
            if seen.insert(next.clone()) {
                stack.extend(self.dependencies(next));
            }
        }

        seen
    }

    /// Find the first mutually dependent pair, scanning in baseline order.
    ///
    /// The pair is returned as names ordered lexicographically. A node with
    /// an edge to itself is reported paired with itself.
    pub fn find_cycle(&self, closures: &Closures<K>) -> Option<(String, String)> {
        let keys: Vec<&K> = self.nodes.keys().collect();

        for (i, &a) in keys.iter().enumerate() {
            if self.dependencies(a).any(|dep| dep == a) {
                let name = self.display_name(a);
                return Some((name.clone(), name));
            }
            for &b in &keys[i + 1..] {
                if depends_on(closures, a, b) && depends_on(closures, b, a) {
                    let mut names = [self.display_name(a), self.display_name(b)];
                    names.sort();
                    let [first, second] = names;
                    return Some((first, second));
                }
            }
        }

        None
    }

    /// Produce the resolved order: dependencies before dependents, ties
    /// broken by fewer transitive dependencies, then baseline order.
    pub fn resolve(&self) -> GraphResult<Vec<K>> {
        let closures = self.closures();

        if let Some((first, second)) = self.find_cycle(&closures) {
            return Err(GraphError::Cycle { first, second });
        }

        let mut order: Vec<K> = self.nodes.keys().cloned().collect();
        order.sort_by(|a, b| compare(&closures, a, b));
        Ok(order)
    }

    fn display_name(&self, key: &K) -> String {
        self.name(key)
            .map(str::to_string)
            .unwrap_or_else(|| key.to_string())
    }
}

impl<K: Ord + Clone + fmt::Display> Default for DependencyGraph<K> {
    fn default() -> Self {
        Self::new()
    }
}

fn depends_on<K: Ord>(closures: &Closures<K>, dependent: &K, dependency: &K) -> bool {
    closures
        .get(dependent)
        .is_some_and(|deps| deps.contains(dependency))
}

fn closure_size<K: Ord>(closures: &Closures<K>, key: &K) -> usize {
    closures.get(key).map_or(0, BTreeSet::len)
}

fn compare<K: Ord>(closures: &Closures<K>, a: &K, b: &K) -> Ordering {
    match (depends_on(closures, a, b), depends_on(closures, b, a)) {
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        _ => closure_size(closures, a)
            .cmp(&closure_size(closures, b))
            .then_with(|| a.cmp(b)),
    }
}
