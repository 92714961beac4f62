//! Event streams.
//!
//! A [`Stream`] is a synchronous cell for values that are events rather than
//! state: every push notifies listeners, even when it repeats the last value.

use std::ops::Deref;

use super::cell::Cell;
use super::options::CellOptions;
use crate::error::CellError;

/// A cell whose pushes always notify.
///
/// Listeners added with `subscribe(.., true)` are not called on
/// subscription, since a stream has no meaningful "current" event.
pub struct Stream<T: 'static> {
    cell: Cell<T>,
}

impl<T: Clone + PartialEq + 'static> Stream<T> {
    pub fn new(initial: T) -> Self {
        let options = CellOptions::new().sync(true).initial_call(false);
        Self {
            cell: Cell::with_options(initial, options),
        }
    }

    /// Emit `value` to every listener. Listeners receive `None` as the
    /// previous value.
    pub fn push(&self, value: T) -> Result<&Self, CellError> {
        self.cell.write_forced(value)?;
        Ok(self)
    }

    /// The underlying cell.
    pub fn cell(&self) -> &Cell<T> {
        &self.cell
    }
}

impl<T: 'static> Deref for Stream<T> {
    type Target = Cell<T>;

    fn deref(&self) -> &Cell<T> {
        &self.cell
    }
}

impl<T: 'static> Clone for Stream<T> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
        }
    }
}
