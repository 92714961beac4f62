//! External Event Sources
//!
//! Cells can follow the most recent event of a given type from any
//! [`EventSource`]. The handler is attached only while the cell has
//! consumers: it is added by the cell's setup hook and removed by its
//! teardown hook.

use std::cell::{Cell as StdCell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;

use super::cell::Cell;
use super::options::CellOptions;

/// Identifier of a handler attached to an event source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

impl HandlerId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for HandlerId {
    fn default() -> Self {
        Self::new()
    }
}

/// Callback receiving an emitted event.
pub type EventHandler<E> = Rc<dyn Fn(&E)>;

/// Anything that dispatches typed events to registered handlers.
pub trait EventSource<E> {
    fn add_listener(&self, event_type: &str, handler: EventHandler<E>) -> HandlerId;

    /// Detach a handler. Returns `false` if it was not attached.
    fn remove_listener(&self, event_type: &str, handler: HandlerId) -> bool;
}

/// In-process event source keyed by event type.
pub struct EventEmitter<E> {
    handlers: RefCell<IndexMap<String, Vec<(HandlerId, EventHandler<E>)>>>,
}

impl<E> EventEmitter<E> {
    pub fn new() -> Self {
        Self {
            handlers: RefCell::new(IndexMap::new()),
        }
    }

    /// Dispatch `event` to every handler of `event_type`. Returns the number
    /// of handlers that ran.
    pub fn emit(&self, event_type: &str, event: &E) -> usize {
        let handlers: Vec<EventHandler<E>> = self
            .handlers
            .borrow()
            .get(event_type)
            .map(|entries| entries.iter().map(|(_, handler)| Rc::clone(handler)).collect())
            .unwrap_or_default();

        for handler in &handlers {
            handler(event);
        }
        handlers.len()
    }

    pub fn handler_count(&self, event_type: &str) -> usize {
        self.handlers
            .borrow()
            .get(event_type)
            .map_or(0, Vec::len)
    }
}

impl<E> Default for EventEmitter<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for EventEmitter<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handlers = self.handlers.borrow();
        let mut map = f.debug_map();
        for (event_type, entries) in handlers.iter() {
            map.entry(event_type, &entries.len());
        }
        map.finish()
    }
}

impl<E> EventSource<E> for EventEmitter<E> {
    fn add_listener(&self, event_type: &str, handler: EventHandler<E>) -> HandlerId {
        let id = HandlerId::new();
        self.handlers
            .borrow_mut()
            .entry(event_type.to_string())
            .or_default()
            .push((id, handler));
        id
    }

    fn remove_listener(&self, event_type: &str, handler: HandlerId) -> bool {
        let mut handlers = self.handlers.borrow_mut();
        let Some(entries) = handlers.get_mut(event_type) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|(id, _)| *id != handler);
        let removed = entries.len() != before;
        if entries.is_empty() {
            handlers.shift_remove(event_type);
        }
        removed
    }
}

impl<T: Clone + PartialEq + 'static> Cell<T> {
    /// A cell holding the most recent `event_type` event from `source`.
    ///
    /// Starts as `initial`. The handler is attached while the cell has a
    /// dependent or listener and detached when it loses the last one.
    pub fn from_event<S>(source: Rc<S>, event_type: impl Into<String>, initial: T) -> Self
    where
        S: EventSource<T> + 'static,
    {
        let event_type: Rc<str> = Rc::from(event_type.into());
        let attached: Rc<StdCell<Option<HandlerId>>> = Rc::new(StdCell::new(None));

        let setup = {
            let source = Rc::clone(&source);
            let event_type = Rc::clone(&event_type);
            let attached = Rc::clone(&attached);
            move |cell: &Cell<T>| {
                if attached.get().is_some() {
                    return;
                }
                let target = cell.downgrade();
                let handler: EventHandler<T> = Rc::new(move |event: &T| {
                    let Some(cell) = target.upgrade() else {
                        return;
                    };
                    if let Err(error) = cell.write(event.clone()) {
                        tracing::debug!(cell = %cell.id(), %error, "event dropped");
                    }
                });
                attached.set(Some(source.add_listener(&event_type, handler)));
            }
        };

        let teardown = move |_: &Cell<T>| {
            if let Some(handler) = attached.take() {
                source.remove_listener(&event_type, handler);
            }
        };

        Cell::with_options(initial, CellOptions::new().setup(setup).teardown(teardown))
    }
}
