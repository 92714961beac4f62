//! Graph Nodes
//!
//! This module defines the untyped bookkeeping each cell owns inside the
//! dependency graph. The typed value lives in the cell handle; the node only
//! knows about identity, freshness and edges.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::{IndexMap, IndexSet};

/// Unique identifier for a cell in the dependency graph.
///
/// Identifiers are handed out from a process-wide counter, so they stay unique
/// even across [`Runtime::reset`](crate::reactive::Runtime::reset).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId(u64);

impl CellId {
    /// Generate a new unique cell ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for CellId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<u64> for CellId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a cell currently evaluates to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Holds a static value.
    Constant,

    /// Holds a computation that reads other cells.
    Computed,
}

/// A node in the dependency graph.
#[derive(Debug)]
pub struct Node {
    id: CellId,
    kind: NodeKind,

    /// Propagation revision at which the cell was last recomputed.
    /// `None` means the cell was invalidated and must recompute on next read.
    revision: Option<u64>,

    /// Recomputation counter, used to detect dependencies that were not read
    /// during the latest computation.
    tick: u64,

    /// Cells that read this cell during their last computation.
    linked: IndexSet<CellId>,

    /// Cells this cell read, mapped to the tick of the computation that read them.
    depends_on: IndexMap<CellId, u64>,

    interactive: bool,
    computing: bool,
    listeners: usize,
    disposed: bool,
}

impl Node {
    /// Create a new node with the given kind.
    pub fn new(id: CellId, kind: NodeKind) -> Self {
        Self {
            id,
            kind,
            revision: None,
            tick: 0,
            linked: IndexSet::new(),
            depends_on: IndexMap::new(),
            interactive: false,
            computing: false,
            listeners: 0,
            disposed: false,
        }
    }

    pub fn id(&self) -> CellId {
        self.id
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn set_kind(&mut self, kind: NodeKind) {
        self.kind = kind;
    }

    pub fn revision(&self) -> Option<u64> {
        self.revision
    }

    /// Whether the node was already recomputed during `revision`.
    pub fn is_fresh(&self, revision: u64) -> bool {
        self.revision == Some(revision)
    }

    /// Forget the recorded revision so the next read recomputes.
    pub fn invalidate(&mut self) {
        self.revision = None;
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Start a recomputation at `revision`, returning the new tick.
    pub fn begin_compute(&mut self, revision: u64) -> u64 {
        self.tick += 1;
        self.revision = Some(revision);
        self.computing = true;
        self.tick
    }

    /// Finish a recomputation. A failed computation leaves the node stale
    /// so the next read retries it.
    pub fn end_compute(&mut self, succeeded: bool) {
        self.computing = false;
        if !succeeded {
            self.revision = None;
        }
    }

    pub fn is_computing(&self) -> bool {
        self.computing
    }

    /// Add a dependent. Returns `true` if the edge is new.
    pub fn add_dependent(&mut self, node_id: CellId) -> bool {
        self.linked.insert(node_id)
    }

    /// Remove a dependent, preserving the order of the others.
    pub fn remove_dependent(&mut self, node_id: CellId) -> bool {
        self.linked.shift_remove(&node_id)
    }

    pub fn dependents(&self) -> &IndexSet<CellId> {
        &self.linked
    }

    /// Record that this node read `node_id` during the computation at `tick`.
    pub fn record_dependency(&mut self, node_id: CellId, tick: u64) {
        self.depends_on.insert(node_id, tick);
    }

    pub fn remove_dependency(&mut self, node_id: CellId) -> bool {
        self.depends_on.shift_remove(&node_id).is_some()
    }

    pub fn dependencies(&self) -> &IndexMap<CellId, u64> {
        &self.depends_on
    }

    /// Dependencies that were not read during the latest computation.
    pub fn stale_dependencies(&self) -> Vec<CellId> {
        self.depends_on
            .iter()
            .filter(|(_, &tick)| tick != self.tick)
            .map(|(&id, _)| id)
            .collect()
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    pub fn set_interactive(&mut self, interactive: bool) {
        self.interactive = interactive;
    }

    /// Whether anything still consumes this node's value.
    pub fn has_consumers(&self) -> bool {
        !self.linked.is_empty() || self.listeners > 0
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
    }

    pub fn add_listener(&mut self) {
        self.listeners += 1;
    }

    pub fn remove_listener(&mut self) {
        self.listeners = self.listeners.saturating_sub(1);
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Mark the node inert. Edges are cleared separately by the graph.
    pub fn mark_disposed(&mut self) {
        self.disposed = true;
        self.interactive = false;
        self.listeners = 0;
        self.revision = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_ids_are_unique_and_increasing() {
        let id1 = CellId::new();
        let id2 = CellId::new();
        assert_ne!(id1, id2);
        assert!(id2 > id1);
    }

    #[test]
    fn new_node_is_stale() {
        let node = Node::new(CellId::new(), NodeKind::Computed);
        assert_eq!(node.revision(), None);
        assert!(!node.is_fresh(0));
        assert!(!node.is_interactive());
    }

    #[test]
    fn compute_cycle_updates_tick_and_revision() {
        let mut node = Node::new(CellId::new(), NodeKind::Computed);

        let tick = node.begin_compute(3);
        assert_eq!(tick, 1);
        assert!(node.is_computing());
        assert!(node.is_fresh(3));

        node.end_compute(true);
        assert!(!node.is_computing());
        assert!(node.is_fresh(3));

        node.begin_compute(4);
        node.end_compute(false);
        assert_eq!(node.revision(), None);
        assert_eq!(node.tick(), 2);
    }

    #[test]
    fn stale_dependencies_follow_tick() {
        let mut node = Node::new(CellId::new(), NodeKind::Computed);
        let dep1 = CellId::new();
        let dep2 = CellId::new();

        let tick = node.begin_compute(1);
        node.record_dependency(dep1, tick);
        node.record_dependency(dep2, tick);
        node.end_compute(true);
        assert!(node.stale_dependencies().is_empty());

        let tick = node.begin_compute(2);
        node.record_dependency(dep2, tick);
        node.end_compute(true);
        assert_eq!(node.stale_dependencies(), vec![dep1]);
    }

    #[test]
    fn consumers_include_listeners() {
        let mut node = Node::new(CellId::new(), NodeKind::Constant);
        assert!(!node.has_consumers());

        node.add_listener();
        assert!(node.has_consumers());

        node.remove_listener();
        node.remove_listener();
        assert_eq!(node.listener_count(), 0);

        node.add_dependent(CellId::new());
        assert!(node.has_consumers());
    }
}
