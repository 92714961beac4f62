//! Dependency Graph
//!
//! This module holds the untyped side of the engine: cell identity, edges
//! between cells and the propagation queue.
//!
//! # Overview
//!
//! Edges are discovered at run time. Every read performed while a cell is
//! computing links the read cell to the computing one, and edges the latest
//! computation did not use are pruned by comparing ticks. The graph is
//! therefore rebuilt incrementally on every recomputation.
//!
//! # Design Decisions
//!
//! 1. Nodes live in an arena keyed by [`CellId`]; edges are ID sets on both
//!    ends rather than pointers, which keeps disposal simple and avoids
//!    reference cycles.
//!
//! 2. Forward edges (`linked`) keep insertion order so propagation visits
//!    dependents in the order they were discovered.
//!
//! 3. Propagation is breadth-first over the invalidation queue.

mod arena;
mod node;
mod scheduler;

pub use arena::Graph;
pub use node::{CellId, Node, NodeKind};
pub use scheduler::{Enqueued, PassState, Propagator};
