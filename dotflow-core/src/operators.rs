//! Derived Operators
//!
//! Convenience constructors for cells derived from other cells. Every
//! operator is an ordinary computed cell; nothing here needs access to the
//! propagation internals beyond what [`Cell`] exposes to the crate.

use std::cell::{Cell as StdCell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use crate::error::CellError;
use crate::reactive::{Cell, CellOptions, Runtime, WeakCell};

impl<T: Clone + PartialEq + 'static> Cell<T> {
    /// A cell holding `f` applied to this cell's value.
    pub fn map<R, F>(&self, f: F) -> Cell<R>
    where
        R: Clone + PartialEq + 'static,
        F: Fn(&T) -> R + 'static,
    {
        let source = self.clone();
        Cell::computed(move || Ok(f(&source.read()?)))
    }

    /// Same as [`Cell::map`], for chaining.
    pub fn next<R, F>(&self, f: F) -> Cell<R>
    where
        R: Clone + PartialEq + 'static,
        F: Fn(&T) -> R + 'static,
    {
        self.map(f)
    }

    /// A cell holding the most recent value that satisfied `predicate`.
    ///
    /// It is `None` until some value passes. Subscribing does not fire the
    /// listener immediately.
    pub fn filter<F>(&self, predicate: F) -> Cell<Option<T>>
    where
        F: Fn(&T) -> bool + 'static,
    {
        let source = self.clone();
        let kept: Rc<RefCell<Option<T>>> = Rc::new(RefCell::new(None));
        Cell::computed_with_options(
            move || {
                let value = source.read()?;
                if predicate(&value) {
                    *kept.borrow_mut() = Some(value);
                }
                Ok(kept.borrow().clone())
            },
            CellOptions::new().initial_call(false),
        )
    }

    /// A cell that follows this one at most once per `period`.
    ///
    /// The first change after a quiet period passes through immediately and
    /// starts a timer. Changes while the timer runs are held back; when it
    /// fires, the cell catches up with the latest value.
    pub fn throttle(&self, period: Duration) -> Cell<T> {
        let source = self.clone();
        let state = Rc::new(Throttle {
            pending: StdCell::new(false),
            lock: StdCell::new(false),
            last: RefCell::new(None),
        });
        let slot: Rc<RefCell<Option<WeakCell<T>>>> = Rc::new(RefCell::new(None));

        let throttled = {
            let state = Rc::clone(&state);
            let slot = Rc::clone(&slot);
            Cell::computed(move || {
                let value = source.read()?;
                if !state.pending.get() {
                    *state.last.borrow_mut() = Some(value);
                    if !state.lock.get() {
                        state.pending.set(true);
                        let target = slot.borrow().clone();
                        Throttle::schedule(&state, target, period);
                    }
                }
                state
                    .last
                    .borrow()
                    .clone()
                    .ok_or(CellError::Empty(source.id()))
            })
        };
        *slot.borrow_mut() = Some(throttled.downgrade());
        throttled
    }
}

struct Throttle<T> {
    /// A trailing update is scheduled.
    pending: StdCell<bool>,
    /// The trailing update is running; it must not schedule another.
    lock: StdCell<bool>,
    last: RefCell<Option<T>>,
}

impl<T: Clone + PartialEq + 'static> Throttle<T> {
    fn schedule(state: &Rc<Self>, target: Option<WeakCell<T>>, period: Duration) {
        let state = Rc::clone(state);
        Runtime::executor().defer_after(
            period,
            Box::new(move || {
                state.pending.set(false);
                let Some(cell) = target.as_ref().and_then(WeakCell::upgrade) else {
                    return;
                };

                state.lock.set(true);
                let caught_up = cell.mark_stale().and_then(|()| cell.read().map(drop));
                state.lock.set(false);

                if let Err(error) = caught_up {
                    tracing::warn!(cell = %cell.id(), %error, "throttled update failed");
                }
            }),
        );
    }
}

impl Cell<bool> {
    /// A cell holding the negation of this one.
    #[allow(clippy::should_implement_trait)]
    pub fn not(&self) -> Cell<bool> {
        self.map(|value| !value)
    }
}

/// One input of [`Cell::combine`]: another cell or a plain value.
pub enum CellInput<T: 'static> {
    Cell(Cell<T>),
    Value(T),
}

impl<T: Clone + PartialEq + 'static> CellInput<T> {
    pub fn value(value: T) -> Self {
        CellInput::Value(value)
    }

    fn read(&self) -> Result<T, CellError> {
        match self {
            CellInput::Cell(cell) => cell.read(),
            CellInput::Value(value) => Ok(value.clone()),
        }
    }
}

impl<T: 'static> From<Cell<T>> for CellInput<T> {
    fn from(cell: Cell<T>) -> Self {
        CellInput::Cell(cell)
    }
}

impl<T: 'static> From<&Cell<T>> for CellInput<T> {
    fn from(cell: &Cell<T>) -> Self {
        CellInput::Cell(cell.clone())
    }
}

impl<T: Clone + PartialEq + 'static> Cell<Vec<T>> {
    /// A cell holding the values of all `inputs`, in order.
    pub fn combine(inputs: Vec<CellInput<T>>) -> Self {
        Cell::combine_with(inputs, <[T]>::to_vec)
    }
}

impl<R: Clone + PartialEq + 'static> Cell<R> {
    /// A cell holding `combinator` applied to the values of all `inputs`.
    pub fn combine_with<T, F>(inputs: Vec<CellInput<T>>, combinator: F) -> Self
    where
        T: Clone + PartialEq + 'static,
        F: Fn(&[T]) -> R + 'static,
    {
        Cell::computed(move || {
            let values = inputs
                .iter()
                .map(CellInput::read)
                .collect::<Result<Vec<T>, CellError>>()?;
            Ok(combinator(&values))
        })
    }
}

impl<E: Clone + PartialEq + 'static> Cell<Rc<Vec<E>>> {
    /// A cell holding the elements that satisfy `predicate(item, index, all)`.
    ///
    /// The result keeps its identity when it can: if the kept elements
    /// equal the previous result, the previous `Rc` is returned, and if
    /// nothing was filtered out, the source `Rc` is passed through.
    pub fn array_filter<F>(&self, predicate: F) -> Cell<Rc<Vec<E>>>
    where
        F: Fn(&E, usize, &[E]) -> bool + 'static,
    {
        let source = self.clone();
        let previous: Rc<RefCell<Option<Rc<Vec<E>>>>> = Rc::new(RefCell::new(None));

        Cell::computed(move || {
            let array = source.read()?;
            let filtered: Vec<E> = array
                .iter()
                .enumerate()
                .filter(|&(index, item)| predicate(item, index, array.as_slice()))
                .map(|(_, item)| item.clone())
                .collect();

            let mut previous = previous.borrow_mut();
            let output = match previous.as_ref() {
                Some(last) if **last == filtered => Rc::clone(last),
                _ if filtered.len() == array.len() => Rc::clone(&array),
                _ => Rc::new(filtered),
            };
            *previous = Some(Rc::clone(&output));
            Ok(output)
        })
    }
}

/// A function whose result is cached in a cell.
///
/// The result is recomputed when the arguments differ from the previous
/// call or when a cell read by the function changes.
pub struct MemoFn<A: 'static, T: 'static> {
    args: Rc<RefCell<Option<A>>>,
    cell: Cell<T>,
}

/// Memoise `f` through a cell. See [`MemoFn`].
pub fn memo_fn<A, T, F>(f: F) -> MemoFn<A, T>
where
    A: Clone + PartialEq + 'static,
    T: Clone + PartialEq + 'static,
    F: Fn(&A) -> Result<T, CellError> + 'static,
{
    let args: Rc<RefCell<Option<A>>> = Rc::new(RefCell::new(None));
    let cell = {
        let args = Rc::clone(&args);
        Cell::computed(move || {
            let current = args.borrow().clone();
            match current {
                Some(current) => f(&current),
                None => Err(CellError::computation("memoised function read before its first call")),
            }
        })
    };
    MemoFn { args, cell }
}

impl<A, T> MemoFn<A, T>
where
    A: Clone + PartialEq + 'static,
    T: Clone + PartialEq + 'static,
{
    pub fn call(&self, args: A) -> Result<T, CellError> {
        let changed = self.args.borrow().as_ref() != Some(&args);
        if changed {
            *self.args.borrow_mut() = Some(args);
            self.cell.mark_stale()?;
        }
        self.cell.read()
    }

    /// The cell holding the latest result.
    pub fn cell(&self) -> &Cell<T> {
        &self.cell
    }
}
