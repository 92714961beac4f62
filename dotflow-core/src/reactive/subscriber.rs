//! Listener types for the reactive system.
//!
//! A listener is a change-notification callback attached to one cell. Listeners
//! run in subscription order with the new value and the previous one.

use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use smallvec::SmallVec;

/// Unique identifier for a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Generate a new unique listener ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

/// Callback invoked with `(current, previous)`.
///
/// `previous` is `None` when the cell had no value before, e.g. on its first
/// computation or after a forced recomputation.
pub type Listener<T> = Rc<dyn Fn(&T, Option<&T>)>;

/// Ordered listeners of one cell.
pub(crate) struct ListenerList<T> {
    entries: SmallVec<[(ListenerId, Listener<T>); 2]>,
}

impl<T> ListenerList<T> {
    pub(crate) fn new() -> Self {
        Self {
            entries: SmallVec::new(),
        }
    }

    pub(crate) fn push(&mut self, listener: Listener<T>) -> ListenerId {
        let id = ListenerId::new();
        self.entries.push((id, listener));
        id
    }

    pub(crate) fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry_id, _)| *entry_id != id);
        self.entries.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Clone the callbacks so they can run without holding a borrow.
    pub(crate) fn snapshot(&self) -> SmallVec<[Listener<T>; 2]> {
        self.entries
            .iter()
            .map(|(_, listener)| Rc::clone(listener))
            .collect()
    }
}

impl<T> Default for ListenerList<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn listener_ids_are_unique() {
        let id1 = ListenerId::new();
        let id2 = ListenerId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn snapshot_keeps_subscription_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut list: ListenerList<i32> = ListenerList::new();

        for factor in [1, 2, 3] {
            let log = log.clone();
            list.push(Rc::new(move |value: &i32, _: Option<&i32>| {
                log.borrow_mut().push(value * factor)
            }));
        }

        for listener in list.snapshot() {
            listener(&1, None);
        }
        assert_eq!(*log.borrow(), vec![1, 2, 3]);
    }

    #[test]
    fn remove_drops_only_that_listener() {
        let mut list: ListenerList<i32> = ListenerList::new();
        let first = list.push(Rc::new(|_: &i32, _: Option<&i32>| {}));
        list.push(Rc::new(|_: &i32, _: Option<&i32>| {}));

        assert!(list.remove(first));
        assert!(!list.remove(first));
        assert_eq!(list.len(), 1);
    }
}
