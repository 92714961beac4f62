//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects cells. It owns the
//! per-thread [`PropagationContext`]: the dependency graph, the registry of
//! live cells, the active-cell tracker, the propagation queue and the
//! executor used for deferred passes.
//!
//! # How It Works
//!
//! 1. When a cell is created, it registers with the runtime and gets a node
//!    in the graph.
//!
//! 2. When a cell is read while another cell computes, the runtime records
//!    the edge between them.
//!
//! 3. When a cell is written, the runtime:
//!    a. Marks it stale and enqueues it
//!    b. Either runs a propagation pass inline (synchronous cells, cells with
//!       listeners, or `SchedulingMode::Sync`) or schedules one on the
//!       executor
//!    c. During the pass, recomputes every queued cell and enqueues its
//!       dependents, breadth-first
//!
//! # Thread Safety
//!
//! There is none to speak of: the context is thread-local and cells are
//! `!Send`. Every thread that uses cells gets its own independent engine.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use indexmap::IndexSet;

use super::context::{ReactiveContext, Tracker};
use super::executor::{Executor, ManualExecutor, TokioExecutor};
use crate::config::{EngineConfig, ExecutorKind, SchedulingMode};
use crate::error::{CellError, ConfigError};
use crate::graph::{CellId, Enqueued, Graph, Node, NodeKind, PassState, Propagator};

/// Type-erased view of a cell used by the propagation driver.
pub(crate) trait Reactive {
    /// Recompute the cell if it is stale, without tracking.
    fn refresh(self: Rc<Self>) -> Result<(), CellError>;

    /// Run the cell's teardown hook.
    fn run_teardown(self: Rc<Self>);

    /// Deliver the notification held back while a batch was open.
    fn deliver_batched(self: Rc<Self>);
}

/// All mutable engine state of one thread.
pub(crate) struct PropagationContext {
    pub(crate) graph: Graph,
    registry: HashMap<CellId, Weak<dyn Reactive>>,
    pub(crate) tracker: Tracker,
    pub(crate) propagator: Propagator,
    batch_depth: usize,
    batched: IndexSet<CellId>,
    executor: Rc<dyn Executor>,
    config: EngineConfig,
}

impl PropagationContext {
    fn new(config: EngineConfig) -> Self {
        Self {
            graph: Graph::new(),
            registry: HashMap::new(),
            tracker: Tracker::new(),
            propagator: Propagator::new(),
            batch_depth: 0,
            batched: IndexSet::new(),
            executor: executor_for(config.executor),
            config,
        }
    }
}

fn executor_for(kind: ExecutorKind) -> Rc<dyn Executor> {
    match kind {
        ExecutorKind::Manual => Rc::new(ManualExecutor::new()),
        ExecutorKind::Tokio => Rc::new(TokioExecutor),
    }
}

thread_local! {
    static CONTEXT: RefCell<PropagationContext> =
        RefCell::new(PropagationContext::new(EngineConfig::default()));
}

/// What a write asks the runtime to do once the context is released.
enum AfterWrite {
    Nothing,
    RunNow,
    Defer(Rc<dyn Executor>),
}

/// Keeps the batch depth balanced even if the batch body panics.
struct BatchScope;

impl BatchScope {
    fn enter() -> Self {
        Runtime::with(|ctx| ctx.batch_depth += 1);
        Self
    }

    fn is_outermost(&self) -> bool {
        Runtime::with(|ctx| ctx.batch_depth == 1)
    }
}

impl Drop for BatchScope {
    fn drop(&mut self) {
        Runtime::try_with(|ctx| ctx.batch_depth = ctx.batch_depth.saturating_sub(1));
    }
}

/// The per-thread reactive runtime.
pub struct Runtime;

impl Runtime {
    /// Run `f` with exclusive access to the context.
    ///
    /// `f` must not call back into cells.
    pub(crate) fn with<R>(f: impl FnOnce(&mut PropagationContext) -> R) -> R {
        CONTEXT.with(|ctx| f(&mut ctx.borrow_mut()))
    }

    /// Like [`Runtime::with`], but gives up instead of panicking when the
    /// context is already borrowed or torn down. Used from `Drop` impls.
    pub(crate) fn try_with<R>(f: impl FnOnce(&mut PropagationContext) -> R) -> Option<R> {
        CONTEXT
            .try_with(|ctx| ctx.try_borrow_mut().ok().map(|mut ctx| f(&mut ctx)))
            .ok()
            .flatten()
    }

    // ------------------------------------------------------------------
    // Public surface
    // ------------------------------------------------------------------

    /// Run every pending propagation pass now.
    ///
    /// Does nothing while a pass is already running on this thread.
    pub fn flush() -> Result<(), CellError> {
        let needed = Self::with(|ctx| {
            let state = ctx.propagator.state();
            state != PassState::Busy
                && (state == PassState::Scheduled || ctx.propagator.has_pending())
        });
        if needed {
            Self::run_passes()
        } else {
            Ok(())
        }
    }

    /// Group writes so each affected cell notifies at most once.
    ///
    /// Writes inside `f` only enqueue. When the outermost batch closes, one
    /// propagation runs and every cell whose value differs from its value
    /// before the batch notifies its listeners once with the final value.
    pub fn batch<R>(f: impl FnOnce() -> R) -> Result<R, CellError> {
        let scope = BatchScope::enter();
        let output = f();
        if !scope.is_outermost() {
            return Ok(output);
        }

        let flushed = Self::flush();
        drop(scope);
        Self::deliver_batched();
        flushed.map(|()| output)
    }

    /// Replace this thread's context with a fresh one.
    ///
    /// Cells created before the reset must not be used afterwards.
    pub fn reset() {
        let previous = CONTEXT.with(|ctx| {
            ctx.replace(PropagationContext::new(EngineConfig::default()))
        });
        drop(previous);
    }

    /// Apply a configuration to this thread's context.
    pub fn configure(config: EngineConfig) -> Result<(), ConfigError> {
        config.validate()?;
        let executor = executor_for(config.executor);
        let previous = Self::with(|ctx| {
            ctx.config = config;
            std::mem::replace(&mut ctx.executor, executor)
        });
        drop(previous);
        Ok(())
    }

    /// The configuration currently in effect.
    pub fn config() -> EngineConfig {
        Self::with(|ctx| ctx.config.clone())
    }

    /// Use `executor` for deferred passes and timers from now on.
    pub fn install_executor(executor: Rc<dyn Executor>) {
        let previous = Self::with(|ctx| std::mem::replace(&mut ctx.executor, executor));
        drop(previous);
    }

    /// The executor used for deferred passes and timers.
    pub fn executor() -> Rc<dyn Executor> {
        Self::with(|ctx| Rc::clone(&ctx.executor))
    }

    /// Whether invalidated cells are waiting for a propagation pass.
    pub fn is_pending() -> bool {
        Self::with(|ctx| {
            ctx.propagator.state() == PassState::Scheduled || ctx.propagator.has_pending()
        })
    }

    /// Whether a propagation pass is running.
    pub fn is_propagating() -> bool {
        Self::with(|ctx| ctx.propagator.state() == PassState::Busy)
    }

    /// Revision of the most recent propagation pass.
    pub fn revision() -> u64 {
        Self::with(|ctx| ctx.propagator.revision())
    }

    /// Number of cells alive in this thread's graph.
    pub fn cell_count() -> usize {
        Self::with(|ctx| ctx.graph.len())
    }

    // ------------------------------------------------------------------
    // Cell bookkeeping
    // ------------------------------------------------------------------

    pub(crate) fn register(id: CellId, kind: NodeKind, reactive: Weak<dyn Reactive>) {
        Self::with(|ctx| {
            ctx.graph.insert(Node::new(id, kind));
            ctx.registry.insert(id, reactive);
        });
    }

    /// Forget a dropped cell and tear down dependencies it was the last
    /// consumer of.
    pub(crate) fn release(id: CellId) {
        let orphans = Self::try_with(|ctx| {
            ctx.registry.remove(&id);
            ctx.batched.shift_remove(&id);
            ctx.graph.remove_node(id)
        });
        if let Some(orphans) = orphans {
            Self::teardown_all(orphans);
        }
    }

    fn upgrade(id: CellId) -> Option<Rc<dyn Reactive>> {
        Self::with(|ctx| ctx.registry.get(&id).and_then(Weak::upgrade))
    }

    pub(crate) fn node<R>(id: CellId, f: impl FnOnce(&Node) -> R) -> Option<R> {
        Self::with(|ctx| ctx.graph.get(id).map(f))
    }

    pub(crate) fn set_kind(id: CellId, kind: NodeKind) {
        Self::with(|ctx| {
            if let Some(node) = ctx.graph.get_mut(id) {
                node.set_kind(kind);
            }
        });
    }

    /// Link `id` to the active cell, refusing re-entrant reads.
    ///
    /// Returns `true` if the read came from another cell's computation.
    pub(crate) fn track(id: CellId) -> Result<bool, CellError> {
        Self::with(|ctx| {
            if ctx.graph.get(id).is_some_and(Node::is_computing) {
                tracing::warn!(cell = %id, "cyclic dependency");
                return Err(CellError::CyclicDependency(id));
            }
            match ctx.tracker.active() {
                Some(active) => {
                    ctx.graph.link(id, active);
                    Ok(true)
                }
                None => Ok(false),
            }
        })
    }

    /// Whether `id` must recompute before its value can be handed out.
    ///
    /// A cell in the middle of its own computation is never stale; it
    /// finishes that computation first.
    pub(crate) fn is_stale(id: CellId) -> bool {
        Self::with(|ctx| {
            let revision = ctx.propagator.revision();
            ctx.graph
                .get(id)
                .map_or(true, |node| !node.is_computing() && !node.is_fresh(revision))
        })
    }

    /// Mark `id` interactive. Returns `true` on the transition, when the
    /// caller must run the setup hook.
    pub(crate) fn activate(id: CellId) -> bool {
        Self::with(|ctx| match ctx.graph.get_mut(id) {
            Some(node) if !node.is_interactive() && !node.is_disposed() => {
                node.set_interactive(true);
                tracing::trace!(cell = %id, "setup");
                true
            }
            _ => false,
        })
    }

    pub(crate) fn begin_compute(id: CellId) {
        Self::with(|ctx| {
            let revision = ctx.propagator.revision();
            if let Some(node) = ctx.graph.get_mut(id) {
                node.begin_compute(revision);
            }
        });
    }

    pub(crate) fn end_compute(id: CellId, succeeded: bool) {
        Self::with(|ctx| {
            if let Some(node) = ctx.graph.get_mut(id) {
                node.end_compute(succeeded);
            }
        });
    }

    /// Drop edges `id` did not use and tear down dependencies left without
    /// consumers.
    pub(crate) fn prune(id: CellId) {
        let orphans = Self::with(|ctx| ctx.graph.prune(id));
        Self::teardown_all(orphans);
    }

    pub(crate) fn teardown_all(orphans: Vec<CellId>) {
        for id in orphans {
            tracing::trace!(cell = %id, "teardown");
            if let Some(target) = Self::upgrade(id) {
                target.run_teardown();
            }
        }
    }

    pub(crate) fn add_listener(id: CellId) {
        Self::with(|ctx| {
            if let Some(node) = ctx.graph.get_mut(id) {
                node.add_listener();
            }
        });
    }

    /// Returns `true` when `id` lost its last consumer and was demoted.
    pub(crate) fn remove_listener(id: CellId) -> bool {
        Self::with(|ctx| {
            if let Some(node) = ctx.graph.get_mut(id) {
                node.remove_listener();
            }
        });
        Self::deactivate_if_unused(id)
    }

    /// Demote `id` if it is interactive without any consumer. Returns `true`
    /// when the caller must run the teardown hook.
    pub(crate) fn deactivate_if_unused(id: CellId) -> bool {
        Self::with(|ctx| match ctx.graph.get_mut(id) {
            Some(node) if !node.has_consumers() && node.is_interactive() => {
                node.set_interactive(false);
                tracing::trace!(cell = %id, "teardown");
                true
            }
            _ => false,
        })
    }

    /// Clear the edges of `id` and mark it inert.
    ///
    /// Returns whether it was interactive and the dependencies it orphaned.
    pub(crate) fn dispose(id: CellId) -> (bool, Vec<CellId>) {
        Self::with(|ctx| {
            let orphans = ctx.graph.detach(id);
            ctx.batched.shift_remove(&id);
            let was_interactive = match ctx.graph.get_mut(id) {
                Some(node) => {
                    let interactive = node.is_interactive();
                    node.mark_disposed();
                    interactive
                }
                None => false,
            };
            (was_interactive, orphans)
        })
    }

    pub(crate) fn is_batching() -> bool {
        Self::with(|ctx| ctx.batch_depth > 0)
    }

    pub(crate) fn defer_notification(id: CellId) {
        Self::with(|ctx| {
            ctx.batched.insert(id);
        });
    }

    fn deliver_batched() {
        let pending: Vec<CellId> = Self::with(|ctx| ctx.batched.drain(..).collect());
        for id in pending {
            if let Some(target) = Self::upgrade(id) {
                target.deliver_batched();
            }
        }
    }

    // ------------------------------------------------------------------
    // Propagation
    // ------------------------------------------------------------------

    /// Mark `id` stale, enqueue it and propagate according to the
    /// scheduling rules.
    pub(crate) fn invalidate(id: CellId, sync: bool) -> Result<(), CellError> {
        let next = Self::with(|ctx| {
            ctx.graph.invalidate(id);
            if ctx.propagator.enqueue_write(id) == Enqueued::FollowUp {
                tracing::trace!(cell = %id, "deferred to follow-up pass");
            }

            if ctx.batch_depth > 0 {
                return AfterWrite::Nothing;
            }
            let sync = sync || ctx.config.scheduling == SchedulingMode::Sync;
            match ctx.propagator.state() {
                PassState::Busy => AfterWrite::Nothing,
                PassState::Idle | PassState::Scheduled if sync => AfterWrite::RunNow,
                PassState::Idle => {
                    ctx.propagator.set_state(PassState::Scheduled);
                    AfterWrite::Defer(Rc::clone(&ctx.executor))
                }
                PassState::Scheduled => AfterWrite::Nothing,
            }
        });

        match next {
            AfterWrite::Nothing => Ok(()),
            AfterWrite::RunNow => Self::run_passes(),
            AfterWrite::Defer(executor) => {
                executor.defer(Box::new(Self::deferred_flush));
                Ok(())
            }
        }
    }

    fn deferred_flush() {
        if let Err(error) = Self::flush() {
            tracing::warn!(%error, "deferred propagation failed");
        }
    }

    /// Hand leftover work to the executor after a failed pass.
    fn reschedule() {
        let executor = Self::with(|ctx| {
            if ctx.propagator.has_pending() && ctx.propagator.state() == PassState::Idle {
                ctx.propagator.set_state(PassState::Scheduled);
                Some(Rc::clone(&ctx.executor))
            } else {
                None
            }
        });
        if let Some(executor) = executor {
            executor.defer(Box::new(Self::deferred_flush));
        }
    }

    fn run_passes() -> Result<(), CellError> {
        let _untracked = ReactiveContext::untracked();
        let max_passes = Self::with(|ctx| ctx.config.max_passes);
        let mut passes = 0;

        loop {
            if passes == max_passes {
                Self::with(|ctx| ctx.propagator.clear());
                tracing::warn!(passes, "propagation did not settle");
                return Err(CellError::PropagationLimit { passes });
            }
            passes += 1;

            let revision = Self::with(|ctx| ctx.propagator.begin_pass());
            let _span = tracing::debug_span!("propagation_pass", revision).entered();
            let mut processed = 0usize;

            loop {
                let next = Self::with(|ctx| {
                    let id = ctx.propagator.next()?;
                    let kind = ctx.graph.get(id).map(Node::kind);
                    Some((id, kind, ctx.registry.get(&id).and_then(Weak::upgrade)))
                });
                let Some((id, kind, target)) = next else {
                    break;
                };
                processed += 1;
                tracing::trace!(cell = %id, ?kind, "refresh");

                if let Some(target) = target {
                    if let Err(error) = target.refresh() {
                        Self::with(|ctx| ctx.propagator.abort());
                        Self::reschedule();
                        return Err(error);
                    }
                }

                Self::with(|ctx| {
                    for dependent in ctx.graph.dependents_of(id) {
                        if ctx.propagator.enqueue_dependent(dependent) {
                            ctx.graph.invalidate(dependent);
                        }
                    }
                });
            }

            tracing::debug!(revision, processed, "propagation pass complete");
            if !Self::with(|ctx| ctx.propagator.finish_pass()) {
                break;
            }
        }

        Self::with(|ctx| ctx.propagator.set_state(PassState::Idle));
        Ok(())
    }
}
