//! Dependency graph of package identities

use crate::identity::PackageIdentity;
use crate::options::BuildOptions;
use crate::recipe::Recipe;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// One resolved node: a package identity plus everything the coordinator
/// needs to build it.
pub struct GraphNode {
    pub identity: PackageIdentity,
    pub recipe: Arc<dyn Recipe>,
    pub options: BuildOptions,
    /// Identities this node requires built first
    pub dependencies: Vec<PackageIdentity>,
    /// Position in resolver discovery order; breaks topological ties
    pub discovery_index: usize,
}

impl GraphNode {
    pub fn new(
        identity: PackageIdentity,
        recipe: Arc<dyn Recipe>,
        options: BuildOptions,
        dependencies: Vec<PackageIdentity>,
        discovery_index: usize,
    ) -> Self {
        Self {
            identity,
            recipe,
            options,
            dependencies,
            discovery_index,
        }
    }
}

// Trait objects have no Debug; print the node without the recipe body.
impl fmt::Debug for GraphNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphNode")
            .field("identity", &self.identity)
            .field("recipe", &self.recipe.name())
            .field("options", &self.options)
            .field("dependencies", &self.dependencies)
            .field("discovery_index", &self.discovery_index)
            .finish()
    }
}

/// Directed acyclic graph of package identities; an edge A -> B means A
/// requires B built first. Cycle-free by construction: the resolver rejects
/// cyclic requirement sets before a graph exists.
#[derive(Debug)]
pub struct DependencyGraph {
    root: PackageIdentity,
    nodes: HashMap<PackageIdentity, GraphNode>,
    /// Discovery order of the identities
    order: Vec<PackageIdentity>,
}

impl DependencyGraph {
    pub fn new(root: PackageIdentity) -> Self {
        Self {
            root,
            nodes: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn add_node(&mut self, node: GraphNode) {
        if !self.nodes.contains_key(&node.identity) {
            self.order.push(node.identity.clone());
            self.nodes.insert(node.identity.clone(), node);
        }
    }

    pub fn root(&self) -> &PackageIdentity {
        &self.root
    }

    pub fn node(&self, identity: &PackageIdentity) -> Option<&GraphNode> {
        self.nodes.get(identity)
    }

    /// Nodes in discovery order
    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Identities that directly require `identity`
    pub fn dependents_of(&self, identity: &PackageIdentity) -> Vec<&PackageIdentity> {
        self.order
            .iter()
            .filter(|candidate| {
                self.nodes
                    .get(candidate)
                    .is_some_and(|node| node.dependencies.contains(identity))
            })
            .collect()
    }

    /// A topological build order: dependencies before dependents, ties
    /// broken by discovery order (Kahn's algorithm).
    pub fn topological_order(&self) -> Vec<PackageIdentity> {
        let mut remaining: HashMap<&PackageIdentity, usize> = self
            .nodes
            .values()
            .map(|node| (&node.identity, node.dependencies.len()))
            .collect();
        let mut done: HashSet<&PackageIdentity> = HashSet::new();
        let mut order = Vec::with_capacity(self.nodes.len());

        while order.len() < self.nodes.len() {
            // Earliest-discovered node with all dependencies satisfied.
            let next = self
                .order
                .iter()
                .find(|id| !done.contains(id) && remaining.get(id) == Some(&0));

            let Some(next) = next else {
                // Unreachable for resolver-built graphs; stop rather than spin.
                debug_assert!(false, "dependency graph contains a cycle");
                break;
            };

            done.insert(next);
            order.push(next.clone());

            for dependent in self.dependents_of(next) {
                if let Some(count) = remaining.get_mut(dependent) {
                    *count = count.saturating_sub(1);
                }
            }
        }

        order
    }
}
