//! Update Scheduler
//!
//! The propagator collects invalidated cells and hands them out one at a time
//! during a propagation pass.
//!
//! # Algorithm
//!
//! 1. Every write or forced recomputation enqueues the cell.
//! 2. A pass allocates a new global revision and walks the queue front to
//!    back. The driver recomputes each cell and enqueues its dependents.
//! 3. A per-pass membership set keeps every cell in the queue at most once.
//! 4. A write that targets a cell the running pass already processed is
//!    carried into a follow-up pass with its own revision.
//!
//! The walk is breadth-first in invalidation order, not topological. A cell
//! may recompute against a dependency that is stale but not reached yet; the
//! dependency then refreshes lazily when it is read, because its revision is
//! behind the pass revision.

use std::collections::HashMap;

use indexmap::IndexSet;

use super::node::CellId;

/// Where the propagator is in its life cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassState {
    /// Nothing is scheduled.
    Idle,

    /// A deferred pass was handed to the executor and has not run yet.
    Scheduled,

    /// A pass is running.
    Busy,
}

/// What happened to a cell handed to [`Propagator::enqueue_write`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// The cell joined the current queue.
    Added,

    /// The cell was already waiting in the current queue.
    AlreadyQueued,

    /// The running pass already processed the cell; it runs in a follow-up pass.
    FollowUp,
}

/// Queue and revision bookkeeping for propagation passes.
#[derive(Debug)]
pub struct Propagator {
    state: PassState,
    revision: u64,
    queue: Vec<CellId>,
    /// Position of each queued cell in `queue`.
    queued: HashMap<CellId, usize>,
    cursor: usize,
    follow_up: IndexSet<CellId>,
}

impl Propagator {
    /// Create an idle propagator at revision zero.
    pub fn new() -> Self {
        Self {
            state: PassState::Idle,
            revision: 0,
            queue: Vec::new(),
            queued: HashMap::new(),
            cursor: 0,
            follow_up: IndexSet::new(),
        }
    }

    pub fn state(&self) -> PassState {
        self.state
    }

    pub fn set_state(&mut self, state: PassState) {
        self.state = state;
    }

    /// The revision of the current (or most recent) pass.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Whether any cell is waiting to be processed.
    pub fn has_pending(&self) -> bool {
        self.cursor < self.queue.len() || !self.follow_up.is_empty()
    }

    /// Number of cells waiting to be processed.
    #[cfg(test)]
    pub fn pending_len(&self) -> usize {
        self.queue.len() - self.cursor + self.follow_up.len()
    }

    fn push(&mut self, node_id: CellId) {
        self.queued.insert(node_id, self.queue.len());
        self.queue.push(node_id);
    }

    /// Enqueue a dependent reached through an edge.
    ///
    /// Returns `true` if the cell was added and must be invalidated.
    pub fn enqueue_dependent(&mut self, node_id: CellId) -> bool {
        if self.queued.contains_key(&node_id) {
            return false;
        }
        self.push(node_id);
        true
    }

    /// Enqueue a cell that was written to or forced.
    pub fn enqueue_write(&mut self, node_id: CellId) -> Enqueued {
        match self.queued.get(&node_id) {
            None => {
                self.push(node_id);
                Enqueued::Added
            }
            Some(&position) if self.state == PassState::Busy && position < self.cursor => {
                self.follow_up.insert(node_id);
                Enqueued::FollowUp
            }
            Some(_) => Enqueued::AlreadyQueued,
        }
    }

    /// Start a pass and allocate its revision.
    pub fn begin_pass(&mut self) -> u64 {
        self.state = PassState::Busy;
        self.revision += 1;
        self.revision
    }

    /// Hand out the next queued cell of the running pass.
    pub fn next(&mut self) -> Option<CellId> {
        let node_id = self.queue.get(self.cursor).copied()?;
        self.cursor += 1;
        Some(node_id)
    }

    /// Close the running pass.
    ///
    /// Returns `true` when follow-up work was moved into a fresh queue and
    /// another pass is needed.
    pub fn finish_pass(&mut self) -> bool {
        self.queue.clear();
        self.queued.clear();
        self.cursor = 0;

        if self.follow_up.is_empty() {
            return false;
        }
        let follow_up = std::mem::take(&mut self.follow_up);
        for node_id in follow_up {
            self.push(node_id);
        }
        true
    }

    /// Stop the running pass, keeping unprocessed cells for the next one.
    pub fn abort(&mut self) {
        let remaining: Vec<CellId> = self.queue[self.cursor..]
            .iter()
            .copied()
            .chain(self.follow_up.drain(..))
            .collect();

        self.queue.clear();
        self.queued.clear();
        self.cursor = 0;
        for node_id in remaining {
            if !self.queued.contains_key(&node_id) {
                self.push(node_id);
            }
        }
        self.state = PassState::Idle;
    }

    /// Drop all queued work and go idle.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.queued.clear();
        self.follow_up.clear();
        self.cursor = 0;
        self.state = PassState::Idle;
    }
}

impl Default for Propagator {
    fn default() -> Self {
        Self::new()
    }
}
