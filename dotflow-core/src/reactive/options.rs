//! Per-cell options.

use std::fmt;
use std::rc::Rc;

use super::cell::Cell;

/// Transform applied to every freshly computed value, given the previous one.
pub type Setter<T> = Rc<dyn Fn(T, Option<&T>) -> T>;

/// Hook invoked when a cell enters or leaves the interactive state.
pub type Hook<T> = Rc<dyn Fn(&Cell<T>)>;

/// Behaviour switches and life-cycle hooks of one cell.
///
/// ```
/// use dotflow_core::reactive::{Cell, CellOptions};
///
/// let clamped = Cell::with_options(
///     150,
///     CellOptions::new().setter(|value: i32, _| value.min(100)),
/// );
/// assert_eq!(clamped.read().unwrap(), 100);
/// ```
pub struct CellOptions<T> {
    pub(crate) initial_call: bool,
    pub(crate) sync: bool,
    pub(crate) setter: Option<Setter<T>>,
    pub(crate) setup: Option<Hook<T>>,
    pub(crate) teardown: Option<Hook<T>>,
}

impl<T> CellOptions<T> {
    pub fn new() -> Self {
        Self {
            initial_call: true,
            sync: false,
            setter: None,
            setup: None,
            teardown: None,
        }
    }

    /// Whether `subscribe(.., true)` fires the listener immediately.
    /// Defaults to `true`.
    pub fn initial_call(mut self, initial_call: bool) -> Self {
        self.initial_call = initial_call;
        self
    }

    /// Propagate writes to this cell inline instead of deferring.
    pub fn sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    pub fn setter(mut self, setter: impl Fn(T, Option<&T>) -> T + 'static) -> Self {
        self.setter = Some(Rc::new(setter));
        self
    }

    /// Called when the cell gains its first consumer.
    pub fn setup(mut self, setup: impl Fn(&Cell<T>) + 'static) -> Self {
        self.setup = Some(Rc::new(setup));
        self
    }

    /// Called when the cell loses its last consumer or is disposed.
    pub fn teardown(mut self, teardown: impl Fn(&Cell<T>) + 'static) -> Self {
        self.teardown = Some(Rc::new(teardown));
        self
    }
}

impl<T> Default for CellOptions<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for CellOptions<T> {
    fn clone(&self) -> Self {
        Self {
            initial_call: self.initial_call,
            sync: self.sync,
            setter: self.setter.clone(),
            setup: self.setup.clone(),
            teardown: self.teardown.clone(),
        }
    }
}

impl<T> fmt::Debug for CellOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CellOptions")
            .field("initial_call", &self.initial_call)
            .field("sync", &self.sync)
            .field("setter", &self.setter.is_some())
            .field("setup", &self.setup.is_some())
            .field("teardown", &self.teardown.is_some())
            .finish()
    }
}
