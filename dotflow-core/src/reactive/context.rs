//! Reactive Context
//!
//! The reactive context tracks which cell is currently computing. This
//! enables automatic dependency tracking: when a cell is read, the engine
//! links it to the active cell.
//!
//! # Implementation
//!
//! The propagation context keeps a stack of frames. Entering a computation
//! pushes the computing cell; leaving pops it, restoring the previous active
//! cell. A frame may also be untracked, which hides any outer cell so reads
//! made inside it register no edges.

use smallvec::SmallVec;

use super::runtime::Runtime;
use crate::graph::CellId;

/// Stack of active-cell frames.
#[derive(Debug, Default)]
pub(crate) struct Tracker {
    stack: SmallVec<[Option<CellId>; 8]>,
}

impl Tracker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// The cell that reads should be linked to, if any.
    pub(crate) fn active(&self) -> Option<CellId> {
        self.stack.last().copied().flatten()
    }

    pub(crate) fn push(&mut self, frame: Option<CellId>) {
        self.stack.push(frame);
    }

    pub(crate) fn pop(&mut self) -> Option<Option<CellId>> {
        self.stack.pop()
    }

    pub(crate) fn depth(&self) -> usize {
        self.stack.len()
    }
}

/// Guard that pops its frame when dropped.
///
/// This keeps the stack balanced even when a computation returns early with
/// an error or panics.
pub struct ReactiveContext {
    frame: Option<CellId>,
}

impl ReactiveContext {
    /// Make `cell` the active cell until the guard is dropped.
    pub fn enter(cell: CellId) -> Self {
        Runtime::with(|ctx| ctx.tracker.push(Some(cell)));
        Self { frame: Some(cell) }
    }

    /// Suspend tracking until the guard is dropped.
    pub fn untracked() -> Self {
        Runtime::with(|ctx| ctx.tracker.push(None));
        Self { frame: None }
    }

    /// Check if reads are currently being tracked.
    pub fn is_active() -> bool {
        Self::current_cell().is_some()
    }

    /// Get the active cell, if any.
    pub fn current_cell() -> Option<CellId> {
        Runtime::with(|ctx| ctx.tracker.active())
    }

    /// Number of frames on the stack.
    pub fn depth() -> usize {
        Runtime::with(|ctx| ctx.tracker.depth())
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        let popped = Runtime::try_with(|ctx| ctx.tracker.pop()).flatten();

        if let Some(frame) = popped {
            debug_assert_eq!(
                frame, self.frame,
                "ReactiveContext mismatch: expected {:?}, got {:?}",
                self.frame, frame
            );
        }
    }
}

/// Run `f` without registering any dependency edges.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let _guard = ReactiveContext::untracked();
    f()
}
