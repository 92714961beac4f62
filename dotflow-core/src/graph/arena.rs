//! Cell Arena
//!
//! Nodes are stored by ID and edges are expressed as ID sets on both ends,
//! so disposal never has to chase pointers and no reference cycles form
//! between cells.

use std::collections::HashMap;

use smallvec::SmallVec;

use super::node::{CellId, Node};

/// All nodes of one propagation context, indexed by ID.
#[derive(Debug, Default)]
pub struct Graph {
    nodes: HashMap<CellId, Node>,
}

impl Graph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
        }
    }

    /// Add a node to the graph.
    pub fn insert(&mut self, node: Node) -> CellId {
        let id = node.id();
        self.nodes.insert(id, node);
        id
    }

    /// Remove a node and every edge touching it.
    ///
    /// Returns the dependencies that became non-interactive, as
    /// [`Graph::detach`] does.
    pub fn remove_node(&mut self, node_id: CellId) -> Vec<CellId> {
        let orphans = self.detach(node_id);
        self.nodes.remove(&node_id);
        orphans
    }

    pub fn get(&self, node_id: CellId) -> Option<&Node> {
        self.nodes.get(&node_id)
    }

    pub fn get_mut(&mut self, node_id: CellId) -> Option<&mut Node> {
        self.nodes.get_mut(&node_id)
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Mark a node stale.
    pub fn invalidate(&mut self, node_id: CellId) {
        if let Some(node) = self.nodes.get_mut(&node_id) {
            node.invalidate();
        }
    }

    /// Snapshot of the cells that depend on `node_id`, in link order.
    pub fn dependents_of(&self, node_id: CellId) -> SmallVec<[CellId; 4]> {
        self.nodes
            .get(&node_id)
            .map(|node| node.dependents().iter().copied().collect())
            .unwrap_or_default()
    }

    /// Record that `dependent` read `dependency` during its current computation.
    pub fn link(&mut self, dependency: CellId, dependent: CellId) {
        let Some(tick) = self.nodes.get(&dependent).map(Node::tick) else {
            return;
        };

        if let Some(dep_node) = self.nodes.get_mut(&dependency) {
            if dep_node.add_dependent(dependent) {
                tracing::trace!(%dependency, %dependent, "link");
            }
        }
        if let Some(dependent_node) = self.nodes.get_mut(&dependent) {
            dependent_node.record_dependency(dependency, tick);
        }
    }

    /// Remove the edge `dependency -> dependent`.
    ///
    /// Missing edges are ignored. Returns `true` when `dependency` lost its
    /// last consumer and was demoted from the interactive state; the caller is
    /// responsible for running its teardown.
    pub fn unlink(&mut self, dependency: CellId, dependent: CellId) -> bool {
        if let Some(dependent_node) = self.nodes.get_mut(&dependent) {
            dependent_node.remove_dependency(dependency);
        }

        let Some(dep_node) = self.nodes.get_mut(&dependency) else {
            return false;
        };
        if !dep_node.remove_dependent(dependent) {
            return false;
        }
        tracing::trace!(%dependency, %dependent, "unlink");

        if !dep_node.has_consumers() && dep_node.is_interactive() {
            dep_node.set_interactive(false);
            return true;
        }
        false
    }

    /// Drop the edges `dependent` did not use during its latest computation.
    ///
    /// Returns the dependencies that became non-interactive as a result.
    pub fn prune(&mut self, dependent: CellId) -> Vec<CellId> {
        let stale = match self.nodes.get(&dependent) {
            Some(node) => node.stale_dependencies(),
            None => return Vec::new(),
        };

        stale
            .into_iter()
            .filter(|&dependency| self.unlink(dependency, dependent))
            .collect()
    }

    /// Clear every edge of `node_id` in both directions.
    ///
    /// Returns the dependencies that became non-interactive as a result.
    pub fn detach(&mut self, node_id: CellId) -> Vec<CellId> {
        let (dependencies, dependents): (Vec<CellId>, Vec<CellId>) = match self.nodes.get(&node_id)
        {
            Some(node) => (
                node.dependencies().keys().copied().collect(),
                node.dependents().iter().copied().collect(),
            ),
            None => return Vec::new(),
        };

        for dependent in dependents {
            if let Some(dependent_node) = self.nodes.get_mut(&dependent) {
                dependent_node.remove_dependency(node_id);
            }
            if let Some(node) = self.nodes.get_mut(&node_id) {
                node.remove_dependent(dependent);
            }
        }

        dependencies
            .into_iter()
            .filter(|&dependency| self.unlink(dependency, node_id))
            .collect()
    }
}
