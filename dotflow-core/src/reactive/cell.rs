//! Cell Implementation
//!
//! A cell is the single reactive primitive. It holds either a constant value
//! or a computation, caches the result per propagation revision, and records
//! which cells it read so it can be recomputed when they change.
//!
//! # How Cells Work
//!
//! 1. Reading a cell first flushes pending propagation, then links the cell
//!    to whichever cell is currently computing.
//!
//! 2. If the cached value is older than the current revision, the cell
//!    recomputes. Every cell it reads during that computation is linked with
//!    the cell's new tick.
//!
//! 3. Edges not refreshed with the new tick are pruned afterwards. A
//!    dependency that loses its last consumer leaves the interactive state
//!    and its teardown hook runs.
//!
//! 4. Writing a cell replaces its content and schedules propagation to its
//!    dependents.
//!
//! # Memory Layout
//!
//! `Cell<T>` is a reference-counted handle. Graph edges live in the
//! propagation context by ID, so cells never keep each other alive through
//! the graph; only computations that capture a handle do.

use std::cell::{Cell as StdCell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use super::context::{untracked, ReactiveContext};
use super::options::CellOptions;
use super::runtime::{Reactive, Runtime};
use super::subscriber::{Listener, ListenerId, ListenerList};
use crate::error::CellError;
use crate::graph::{CellId, NodeKind};

/// Boxed computation of a derived cell.
pub type Compute<T> = Rc<dyn Fn() -> Result<T, CellError>>;

enum Content<T> {
    Constant(T),
    Computed(Compute<T>),
    Inert,
}

impl<T> Content<T> {
    fn node_kind(&self) -> NodeKind {
        match self {
            Content::Computed(_) => NodeKind::Computed,
            Content::Constant(_) | Content::Inert => NodeKind::Constant,
        }
    }
}

/// What a recomputation has to do, taken out of the state borrow.
enum Step<T> {
    Value(T),
    Run(Compute<T>),
}

struct State<T> {
    content: Content<T>,
    value: Option<T>,
    /// Value before the first notification held back by an open batch.
    batched: Option<Option<T>>,
}

pub(crate) struct CellInner<T> {
    id: CellId,
    state: RefCell<State<T>>,
    listeners: RefCell<ListenerList<T>>,
    options: RefCell<CellOptions<T>>,
    disposed: StdCell<bool>,
}

impl<T> Drop for CellInner<T> {
    fn drop(&mut self) {
        Runtime::release(self.id);
    }
}

/// A reactive cell holding a value of type `T`.
///
/// # Example
///
/// ```
/// use dotflow_core::reactive::Cell;
///
/// let width = Cell::new(4);
/// let area = {
///     let width = width.clone();
///     Cell::computed(move || Ok(width.read()? * width.read()?))
/// };
/// assert_eq!(area.read().unwrap(), 16);
///
/// width.write(3).unwrap();
/// assert_eq!(area.read().unwrap(), 9);
/// ```
pub struct Cell<T> {
    inner: Rc<CellInner<T>>,
}

/// Non-owning handle to a cell.
pub struct WeakCell<T> {
    inner: Weak<CellInner<T>>,
}

impl<T: Clone + PartialEq + 'static> Cell<T> {
    /// Create a cell holding a constant value.
    pub fn new(value: T) -> Self {
        Self::with_options(value, CellOptions::default())
    }

    /// Create a constant cell with options.
    pub fn with_options(value: T, options: CellOptions<T>) -> Self {
        Self::from_content(Content::Constant(value), options)
    }

    /// Create a cell whose value is computed from other cells.
    ///
    /// The computation runs lazily on first read and again whenever a cell
    /// it read has changed.
    pub fn computed<F>(compute: F) -> Self
    where
        F: Fn() -> Result<T, CellError> + 'static,
    {
        Self::computed_with_options(compute, CellOptions::default())
    }

    /// Create a computed cell with listener and lifecycle options.
    pub fn computed_with_options<F>(compute: F, options: CellOptions<T>) -> Self
    where
        F: Fn() -> Result<T, CellError> + 'static,
    {
        Self::from_content(Content::Computed(Rc::new(compute)), options)
    }

    fn from_content(content: Content<T>, options: CellOptions<T>) -> Self {
        let id = CellId::new();
        let kind = content.node_kind();
        let inner = Rc::new(CellInner {
            id,
            state: RefCell::new(State {
                content,
                value: None,
                batched: None,
            }),
            listeners: RefCell::new(ListenerList::new()),
            options: RefCell::new(options),
            disposed: StdCell::new(false),
        });

        let reactive: Weak<dyn Reactive> = Rc::downgrade(&inner) as Weak<dyn Reactive>;
        Runtime::register(id, kind, reactive);
        Self { inner }
    }

    // ------------------------------------------------------------------
    // Reading
    // ------------------------------------------------------------------

    /// Read the current value.
    ///
    /// Pending propagation is flushed first. Inside another cell's
    /// computation the read also records a dependency edge.
    pub fn read(&self) -> Result<T, CellError> {
        self.ensure_alive()?;
        Runtime::flush()?;
        self.ensure_alive()?;
        if Runtime::track(self.id())? && Runtime::activate(self.id()) {
            self.run_setup();
            self.ensure_alive()?;
        }
        self.refresh()?;
        self.current()
    }

    /// The cached value, without flushing, tracking or recomputing.
    pub fn peek(&self) -> Option<T> {
        if self.is_disposed() {
            return None;
        }
        self.inner.state.borrow().value.clone()
    }

    fn current(&self) -> Result<T, CellError> {
        self.inner
            .state
            .borrow()
            .value
            .clone()
            .ok_or(CellError::Empty(self.id()))
    }

    fn ensure_alive(&self) -> Result<(), CellError> {
        if self.is_disposed() {
            return Err(CellError::Disposed(self.id()));
        }
        Ok(())
    }

    fn refresh(&self) -> Result<(), CellError> {
        if self.is_disposed() || !Runtime::is_stale(self.id()) {
            return Ok(());
        }
        self.recompute()
    }

    fn recompute(&self) -> Result<(), CellError> {
        let id = self.id();
        let previous = self.inner.state.borrow().value.clone();
        let step = match &self.inner.state.borrow().content {
            Content::Constant(value) => Step::Value(value.clone()),
            Content::Computed(compute) => Step::Run(Rc::clone(compute)),
            Content::Inert => return Err(CellError::Disposed(id)),
        };

        Runtime::begin_compute(id);
        let evaluated = match step {
            Step::Value(value) => Ok(value),
            Step::Run(compute) => {
                let _ctx = ReactiveContext::enter(id);
                compute()
            }
        };
        Runtime::end_compute(id, evaluated.is_ok());

        let mut current = match evaluated {
            Ok(value) => value,
            Err(error) => {
                tracing::debug!(cell = %id, %error, "computation failed");
                return Err(error);
            }
        };

        let setter = self.inner.options.borrow().setter.clone();
        if let Some(setter) = setter {
            current = setter(current, previous.as_ref());
        }

        let changed = previous.as_ref() != Some(&current);
        self.inner.state.borrow_mut().value = Some(current.clone());
        if changed {
            self.notify(&current, previous);
        }

        Runtime::prune(id);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Writing
    // ------------------------------------------------------------------

    /// Replace the content with a constant value.
    ///
    /// Dependents recompute on the next propagation pass. Listeners fire
    /// only if the value actually changes.
    pub fn write(&self, value: T) -> Result<&Self, CellError> {
        self.replace_content(Content::Constant(value), false)
    }

    /// Replace the content with a new computation.
    pub fn write_computed<F>(&self, compute: F) -> Result<&Self, CellError>
    where
        F: Fn() -> Result<T, CellError> + 'static,
    {
        self.replace_content(Content::Computed(Rc::new(compute)), false)
    }

    /// Write a value derived from the current one.
    pub fn update(&self, f: impl FnOnce(&T) -> T) -> Result<&Self, CellError> {
        let current = untracked(|| self.read())?;
        self.write(f(&current))
    }

    /// Write `value` and drop the cached value, so the next computation
    /// notifies even if the value is unchanged.
    pub(crate) fn write_forced(&self, value: T) -> Result<&Self, CellError> {
        self.replace_content(Content::Constant(value), true)
    }

    fn replace_content(&self, content: Content<T>, forced: bool) -> Result<&Self, CellError> {
        self.ensure_alive()?;
        Runtime::set_kind(self.id(), content.node_kind());

        let (previous_content, previous_value) = {
            let mut state = self.inner.state.borrow_mut();
            let previous_value = if forced { state.value.take() } else { None };
            (std::mem::replace(&mut state.content, content), previous_value)
        };
        drop(previous_content);
        drop(previous_value);

        Runtime::invalidate(self.id(), self.is_sync())?;
        Ok(self)
    }

    /// Recompute on the next pass, notifying even if the value is unchanged.
    pub fn force_recompute(&self) -> Result<(), CellError> {
        self.ensure_alive()?;
        let previous = self.inner.state.borrow_mut().value.take();
        drop(previous);
        Runtime::invalidate(self.id(), self.is_sync())
    }

    /// Recompute on the next pass, keeping the cached value for change
    /// detection.
    pub(crate) fn mark_stale(&self) -> Result<(), CellError> {
        self.ensure_alive()?;
        Runtime::invalidate(self.id(), self.is_sync())
    }

    fn is_sync(&self) -> bool {
        self.inner.options.borrow().sync || !self.inner.listeners.borrow().is_empty()
    }

    // ------------------------------------------------------------------
    // Listeners
    // ------------------------------------------------------------------

    /// Register a change listener.
    ///
    /// The cell is read (and becomes interactive) first. With `initial_call`
    /// set, and unless the cell's options disable it, the listener fires
    /// right away with the current value as both arguments.
    pub fn subscribe<F>(&self, callback: F, initial_call: bool) -> Result<ListenerId, CellError>
    where
        F: Fn(&T, Option<&T>) + 'static,
    {
        self.ensure_alive()?;
        if Runtime::activate(self.id()) {
            self.run_setup();
        }
        let value = match self.read() {
            Ok(value) => value,
            Err(error) => {
                if Runtime::deactivate_if_unused(self.id()) {
                    self.run_teardown();
                }
                return Err(error);
            }
        };

        let listener: Listener<T> = Rc::new(callback);
        let fire = initial_call && self.inner.options.borrow().initial_call;
        if fire {
            listener(&value, Some(&value));
        }

        let listener_id = self.inner.listeners.borrow_mut().push(listener);
        Runtime::add_listener(self.id());
        tracing::trace!(cell = %self.id(), listener = listener_id.raw(), "subscribe");
        Ok(listener_id)
    }

    /// Remove a listener. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, listener: ListenerId) -> bool {
        let removed = self.inner.listeners.borrow_mut().remove(listener);
        if removed && Runtime::remove_listener(self.id()) {
            self.run_teardown();
        }
        removed
    }

    fn notify(&self, current: &T, previous: Option<T>) {
        if Runtime::is_batching() {
            let first = {
                let mut state = self.inner.state.borrow_mut();
                if state.batched.is_none() {
                    state.batched = Some(previous);
                    true
                } else {
                    false
                }
            };
            if first {
                Runtime::defer_notification(self.id());
            }
            return;
        }
        self.notify_listeners(current, previous.as_ref());
    }

    fn notify_listeners(&self, current: &T, previous: Option<&T>) {
        let listeners = self.inner.listeners.borrow().snapshot();
        for listener in listeners {
            listener(current, previous);
        }
    }

    fn deliver_batched(&self) {
        let (previous, current) = {
            let mut state = self.inner.state.borrow_mut();
            let Some(previous) = state.batched.take() else {
                return;
            };
            (previous, state.value.clone())
        };
        if let Some(current) = current {
            if previous.as_ref() != Some(&current) {
                self.notify_listeners(&current, previous.as_ref());
            }
        }
    }

    // ------------------------------------------------------------------
    // Life cycle
    // ------------------------------------------------------------------

    fn run_setup(&self) {
        let setup = self.inner.options.borrow().setup.clone();
        if let Some(setup) = setup {
            setup(self);
        }
    }

    fn run_teardown(&self) {
        let teardown = self.inner.options.borrow().teardown.clone();
        if let Some(teardown) = teardown {
            teardown(self);
        }
    }

    /// Detach the cell from the graph and make it inert.
    ///
    /// Teardown runs if the cell was interactive, dependencies left without
    /// consumers are torn down, and listeners and hooks are dropped. Further
    /// reads, writes and subscriptions fail with [`CellError::Disposed`].
    pub fn dispose(&self) {
        if self.inner.disposed.replace(true) {
            return;
        }
        let id = self.id();
        let (was_interactive, orphans) = Runtime::dispose(id);
        if was_interactive {
            self.run_teardown();
        }

        let released = {
            let mut state = self.inner.state.borrow_mut();
            state.batched = None;
            (
                std::mem::replace(&mut state.content, Content::Inert),
                state.value.take(),
            )
        };
        drop(released);
        let listeners = std::mem::take(&mut *self.inner.listeners.borrow_mut());
        drop(listeners);
        let options = std::mem::take(&mut *self.inner.options.borrow_mut());
        drop(options);

        Runtime::teardown_all(orphans);
        tracing::trace!(cell = %id, "disposed");
    }
}

impl<T: 'static> Cell<T> {
    /// The cell's unique identifier.
    pub fn id(&self) -> CellId {
        self.inner.id
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    /// Whether the cell currently has a dependent or a listener.
    pub fn is_interactive(&self) -> bool {
        Runtime::node(self.id(), |node| node.is_interactive()).unwrap_or(false)
    }

    /// Number of cells that read this cell during their last computation.
    pub fn dependent_count(&self) -> usize {
        Runtime::node(self.id(), |node| node.dependents().len()).unwrap_or(0)
    }

    /// Number of cells this cell read during its last computation.
    pub fn dependency_count(&self) -> usize {
        Runtime::node(self.id(), |node| node.dependencies().len()).unwrap_or(0)
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.borrow().len()
    }

    /// How many times the cell has computed.
    pub fn tick(&self) -> u64 {
        Runtime::node(self.id(), |node| node.tick()).unwrap_or(0)
    }

    /// The revision the cached value belongs to, if it is not stale.
    pub fn revision(&self) -> Option<u64> {
        Runtime::node(self.id(), |node| node.revision()).flatten()
    }

    pub fn downgrade(&self) -> WeakCell<T> {
        WeakCell {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Whether both handles refer to the same cell.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: 'static> WeakCell<T> {
    pub fn upgrade(&self) -> Option<Cell<T>> {
        self.inner.upgrade().map(|inner| Cell { inner })
    }
}

impl<T: 'static> Clone for Cell<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: 'static> Clone for WeakCell<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug + 'static> fmt::Debug for Cell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.try_borrow();
        let mut s = f.debug_struct("Cell");
        s.field("id", &self.inner.id);
        match &state {
            Ok(state) => s.field("value", &state.value),
            Err(_) => s.field("value", &"<borrowed>"),
        };
        s.field("disposed", &self.inner.disposed.get()).finish()
    }
}

impl<T: Clone + PartialEq + 'static> Reactive for CellInner<T> {
    fn refresh(self: Rc<Self>) -> Result<(), CellError> {
        Cell { inner: self }.refresh()
    }

    fn run_teardown(self: Rc<Self>) {
        Cell { inner: self }.run_teardown()
    }

    fn deliver_batched(self: Rc<Self>) {
        Cell { inner: self }.deliver_batched()
    }
}
