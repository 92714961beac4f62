//! Reactive Primitives
//!
//! This module implements the reactive cell and everything needed to keep a
//! graph of cells consistent: dependency tracking, propagation scheduling,
//! listeners, batching and executors.
//!
//! # Concepts
//!
//! ## Cells
//!
//! A [`Cell`] holds either a constant value or a computation over other
//! cells. Reading a cell inside another cell's computation records a
//! dependency edge. When a cell is written, every cell that read it is
//! recomputed on the next propagation pass.
//!
//! ## Listeners
//!
//! Listeners are callbacks attached with [`Cell::subscribe`]. They run with
//! the new and the previous value whenever the cell's value changes.
//!
//! ## Interactivity
//!
//! A cell with at least one dependent or listener is *interactive*. Its
//! setup hook runs when it becomes interactive and its teardown hook when
//! it stops being so. Cells bound to external event sources use these hooks
//! to attach and detach their handlers.
//!
//! # Implementation Notes
//!
//! All engine state lives in a thread-local propagation context, reached
//! through the [`Runtime`] facade. Cells are `!Send`; each thread has its
//! own independent graph.

mod cell;
mod context;
mod events;
mod executor;
mod options;
mod runtime;
mod stream;
mod subscriber;

pub use cell::{Cell, Compute, WeakCell};
pub use context::{untracked, ReactiveContext};
pub use events::{EventEmitter, EventHandler, EventSource, HandlerId};
pub use executor::{Executor, ManualExecutor, Task, TokioExecutor};
pub use options::{CellOptions, Hook, Setter};
pub use runtime::Runtime;
pub use stream::Stream;
pub use subscriber::{Listener, ListenerId};
