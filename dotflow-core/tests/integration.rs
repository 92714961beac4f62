//! Integration Tests for the Reactive Engine
//!
//! These tests verify that cells, listeners, the runtime and the derived
//! operators work together correctly.

use std::cell::{Cell as StdCell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use dotflow_core::reactive::{
    Cell, CellOptions, EventEmitter, ManualExecutor, Runtime, Stream, WeakCell,
};
use dotflow_core::{CellError, EngineConfig, ExecutorKind, SchedulingMode};

fn counter() -> (Rc<StdCell<usize>>, impl Fn() + Clone) {
    let count = Rc::new(StdCell::new(0));
    let bump = {
        let count = count.clone();
        move || count.set(count.get() + 1)
    };
    (count, bump)
}

/// d = a * b + c, recomputed after each write.
#[test]
fn derived_cell_follows_its_inputs() {
    let a = Cell::new(2);
    let b = Cell::new(3);
    let c = Cell::new(10);
    let d = {
        let (a, b, c) = (a.clone(), b.clone(), c.clone());
        Cell::computed(move || Ok(a.read()? * b.read()? + c.read()?))
    };

    assert_eq!(d.read().unwrap(), 16);

    a.write(1).unwrap();
    assert_eq!(d.read().unwrap(), 13);

    c.write(5).unwrap();
    assert_eq!(d.read().unwrap(), 8);
}

/// Constant cells return the same value on every read.
#[test]
fn constant_cell_is_stable() {
    let cell = Cell::new("fixed".to_string());
    for _ in 0..5 {
        assert_eq!(cell.read().unwrap(), "fixed");
    }
    assert_eq!(cell.tick(), 1);
}

/// Subscribing with an initial call fires once, synchronously.
#[test]
fn subscribe_fires_initial_call_synchronously() {
    let cell = Cell::new(7);
    let seen = Rc::new(RefCell::new(Vec::new()));

    let seen_clone = seen.clone();
    cell.subscribe(
        move |value: &i32, previous: Option<&i32>| {
            seen_clone.borrow_mut().push((*value, previous.copied()))
        },
        true,
    )
    .unwrap();

    assert_eq!(*seen.borrow(), vec![(7, Some(7))]);
}

/// A subscribed computed cell notifies only when its value changes.
#[test]
fn computed_cell_notifies_only_on_change() {
    let source = Cell::new(1);
    let parity = source.map(|n| n % 2);
    let (calls, bump) = counter();
    parity.subscribe(move |_, _| bump(), false).unwrap();

    for value in [3, 5, 7] {
        source.write(value).unwrap();
        Runtime::flush().unwrap();
    }
    assert_eq!(calls.get(), 0);

    source.write(8).unwrap();
    Runtime::flush().unwrap();
    assert_eq!(calls.get(), 1);
    assert_eq!(parity.peek(), Some(0));
}

/// Flipping a condition drops the branch no longer read and tears it down.
#[test]
fn conditional_dependency_is_pruned() {
    let (x_teardowns, x_bump) = counter();
    let (y_teardowns, y_bump) = counter();
    let x = Cell::with_options(1, CellOptions::new().teardown(move |_| x_bump()));
    let y = Cell::with_options(2, CellOptions::new().teardown(move |_| y_bump()));
    let cond = Cell::new(true);

    let a = {
        let (cond, x, y) = (cond.clone(), x.clone(), y.clone());
        Cell::computed(move || if cond.read()? { x.read() } else { y.read() })
    };
    a.subscribe(|_, _| {}, true).unwrap();

    assert_eq!(x.dependent_count(), 1);
    assert_eq!(y.dependent_count(), 0);
    assert!(x.is_interactive());

    cond.write(false).unwrap();
    Runtime::flush().unwrap();

    assert_eq!(a.read().unwrap(), 2);
    assert_eq!(x.dependent_count(), 0);
    assert!(!x.is_interactive());
    assert_eq!(x_teardowns.get(), 1);
    assert_eq!(y.dependent_count(), 1);
    assert_eq!(y_teardowns.get(), 0);
}

/// Setup fires once per transition into the interactive state.
#[test]
fn setup_runs_once_per_activation() {
    let (setups, bump) = counter();
    let source = Cell::with_options(1, CellOptions::new().setup(move |_| bump()));
    let first = source.map(|n| n + 1);
    let second = source.map(|n| n + 2);

    first.read().unwrap();
    second.read().unwrap();
    assert_eq!(setups.get(), 1);

    first.dispose();
    second.dispose();
    assert!(!source.is_interactive());

    let third = source.map(|n| n + 3);
    third.read().unwrap();
    assert_eq!(setups.get(), 2);
}

/// Dropping the last consumer tears its dependency down like disposing it.
#[test]
fn dropping_consumer_tears_down_dependency() {
    let (setups, setup_bump) = counter();
    let (teardowns, teardown_bump) = counter();
    let source = Cell::with_options(
        1,
        CellOptions::new()
            .setup(move |_| setup_bump())
            .teardown(move |_| teardown_bump()),
    );

    let first = source.map(|n| n + 1);
    first.read().unwrap();
    assert!(source.is_interactive());

    drop(first);
    assert!(!source.is_interactive());
    assert_eq!(source.dependent_count(), 0);
    assert_eq!((setups.get(), teardowns.get()), (1, 1));

    let second = source.map(|n| n + 2);
    assert_eq!(second.read().unwrap(), 3);
    assert_eq!((setups.get(), teardowns.get()), (2, 1));
}

/// An event cell detaches from its emitter once its only consumer is dropped.
#[test]
fn dropping_consumer_detaches_event_handler() {
    let emitter = Rc::new(EventEmitter::new());
    let key = Cell::from_event(emitter.clone(), "key", 0);
    let doubled = key.map(|n| n * 2);

    doubled.read().unwrap();
    assert_eq!(emitter.handler_count("key"), 1);

    drop(doubled);
    assert!(!key.is_interactive());
    assert_eq!(emitter.handler_count("key"), 0);
}

/// A value written by setup is the value the activating read sees.
#[test]
fn setup_write_is_returned_by_activating_read() {
    let source = Cell::with_options(
        1,
        CellOptions::new().setup(|cell: &Cell<i32>| {
            cell.write(42).unwrap();
        }),
    );
    let derived = source.map(|n| n + 1);

    assert_eq!(derived.read().unwrap(), 43);

    let (calls, bump) = counter();
    derived.subscribe(move |_, _| bump(), false).unwrap();
    Runtime::flush().unwrap();

    assert_eq!(calls.get(), 0);
    assert_eq!(derived.read().unwrap(), 43);
    assert_eq!(source.peek(), Some(42));
}

/// Both branches of a diamond settle before the join recomputes.
#[test]
fn diamond_join_notifies_once_per_pass() {
    let a = Cell::new(1);
    let b = a.map(|n| n * 2);
    let c = a.map(|n| n + 10);
    let (computations, bump) = counter();
    let d = {
        let (b, c) = (b.clone(), c.clone());
        Cell::computed(move || {
            bump();
            Ok(b.read()? + c.read()?)
        })
    };

    let seen = Rc::new(RefCell::new(Vec::new()));
    let seen_clone = seen.clone();
    d.subscribe(
        move |value: &i32, previous: Option<&i32>| {
            seen_clone.borrow_mut().push((*value, previous.copied()))
        },
        true,
    )
    .unwrap();
    assert_eq!(computations.get(), 1);

    let revision = Runtime::revision();
    a.write(2).unwrap();
    Runtime::flush().unwrap();

    assert_eq!(Runtime::revision(), revision + 1);
    assert_eq!(computations.get(), 2);
    assert_eq!(d.read().unwrap(), 16);
    assert_eq!(*seen.borrow(), vec![(13, Some(13)), (16, Some(13))]);
}

/// Many writes inside a batch notify once with the final value.
#[test]
fn batch_notifies_once_with_final_value() {
    let cell = Cell::new(0);
    let seen = Rc::new(RefCell::new(Vec::new()));
    let seen_clone = seen.clone();
    cell.subscribe(
        move |value: &i32, previous: Option<&i32>| {
            seen_clone.borrow_mut().push((*value, previous.copied()))
        },
        false,
    )
    .unwrap();

    Runtime::batch(|| {
        for value in 1..=10 {
            cell.write(value).unwrap();
        }
    })
    .unwrap();

    assert_eq!(*seen.borrow(), vec![(10, Some(0))]);
}

/// A batch that ends where it started does not notify.
#[test]
fn batch_reverting_value_is_silent() {
    let cell = Cell::new(5);
    let derived = cell.map(|n| n * 2);
    let (calls, bump) = counter();
    derived.subscribe(move |_, _| bump(), false).unwrap();

    Runtime::batch(|| {
        cell.write(6).unwrap();
        derived.read().unwrap();
        cell.write(5).unwrap();
    })
    .unwrap();

    assert_eq!(calls.get(), 0);
    assert_eq!(derived.read().unwrap(), 10);
}

/// Ten quick writes through a throttle notify at most twice.
#[test]
fn throttle_limits_notifications() {
    let executor = ManualExecutor::install();
    let source = Cell::new(0);
    let throttled = source.throttle(Duration::from_millis(50));

    let (calls, bump) = counter();
    throttled.subscribe(move |_, _| bump(), true).unwrap();

    for value in 1..=10 {
        source.write(value).unwrap();
        executor.advance(Duration::from_millis(1));
    }
    executor.advance(Duration::from_millis(50));

    assert!(calls.get() <= 2, "notified {} times", calls.get());
    assert_eq!(throttled.read().unwrap(), 10);

    // A write after the window passes through immediately.
    source.write(20).unwrap();
    executor.run_pending();
    assert_eq!(throttled.peek(), Some(20));
}

/// Array filtering keeps the output reference when the kept elements match.
#[test]
fn array_filter_preserves_identity() {
    let source = Cell::new(Rc::new(vec![1, 2, 3, 4]));
    let evens = source.array_filter(|n, _, _| n % 2 == 0);
    let (calls, bump) = counter();
    evens.subscribe(move |_, _| bump(), false).unwrap();

    let before = evens.read().unwrap();
    assert_eq!(*before, vec![2, 4]);

    source.write(Rc::new(vec![3, 2, 5, 4])).unwrap();
    Runtime::flush().unwrap();
    assert!(Rc::ptr_eq(&before, &evens.read().unwrap()));
    assert_eq!(calls.get(), 0);

    source.write(Rc::new(vec![1, 2])).unwrap();
    Runtime::flush().unwrap();
    let after = evens.read().unwrap();
    assert!(!Rc::ptr_eq(&before, &after));
    assert_eq!(*after, vec![2]);
    assert_eq!(calls.get(), 1);
}

/// Two cells reading each other are reported instead of looping.
#[test]
fn mutual_reads_are_a_cycle() {
    let slot: Rc<RefCell<Option<WeakCell<i32>>>> = Rc::new(RefCell::new(None));
    let a = {
        let slot = slot.clone();
        Cell::computed(move || {
            let b = slot.borrow().as_ref().and_then(WeakCell::upgrade);
            match b {
                Some(b) => b.read(),
                None => Ok(0),
            }
        })
    };
    let b = a.map(|n| n + 1);
    *slot.borrow_mut() = Some(b.downgrade());

    assert!(matches!(a.read(), Err(CellError::CyclicDependency(_))));
}

/// A cell disposed while queued is skipped by the pass.
#[test]
fn disposed_cell_in_queue_is_skipped() {
    let source = Cell::new(1);
    let derived = source.map(|n| n + 1);
    derived.read().unwrap();

    derived.force_recompute().unwrap();
    source.write(2).unwrap();
    derived.dispose();

    Runtime::flush().unwrap();
    assert_eq!(source.read().unwrap(), 2);
    assert_eq!(source.dependent_count(), 0);
    assert!(matches!(derived.read(), Err(CellError::Disposed(_))));
}

/// A write to a cell already handled by the running pass gets its own pass.
#[test]
fn listener_write_runs_in_follow_up_pass() {
    let cell = Cell::new(0);
    let weak = cell.downgrade();
    cell.subscribe(
        move |value: &i32, _| {
            if *value < 3 {
                if let Some(cell) = weak.upgrade() {
                    cell.write(value + 1).unwrap();
                }
            }
        },
        false,
    )
    .unwrap();

    let revision = Runtime::revision();
    cell.write(1).unwrap();

    assert_eq!(cell.read().unwrap(), 3);
    assert_eq!(Runtime::revision(), revision + 3);
}

/// Runaway follow-up passes stop at the configured limit.
#[test]
fn runaway_writes_hit_pass_limit() {
    Runtime::configure(EngineConfig {
        max_passes: 4,
        ..EngineConfig::default()
    })
    .unwrap();

    let cell = Cell::new(0);
    let weak = cell.downgrade();
    cell.subscribe(
        move |value: &i32, _| {
            if let Some(cell) = weak.upgrade() {
                cell.write(value + 1).unwrap();
            }
        },
        false,
    )
    .unwrap();

    let result = cell.write(1).map(|_| ());
    assert_eq!(result, Err(CellError::PropagationLimit { passes: 4 }));
    assert!(!Runtime::is_pending());
}

/// In sync mode every write propagates before returning.
#[test]
fn sync_mode_propagates_immediately() {
    Runtime::configure(EngineConfig::from_json(r#"{"scheduling": "sync"}"#).unwrap()).unwrap();
    assert_eq!(Runtime::config().scheduling, SchedulingMode::Sync);

    let source = Cell::new(1);
    let doubled = source.map(|n| n * 2);
    doubled.read().unwrap();

    source.write(21).unwrap();
    assert_eq!(doubled.peek(), Some(42));
}

/// An event-bound cell listens only while something depends on it.
#[test]
fn event_cell_follows_consumers() {
    let emitter = Rc::new(EventEmitter::new());
    let key = Cell::from_event(emitter.clone(), "key", String::new());
    let enabled = Cell::new(true);
    let shown = {
        let (key, enabled) = (key.clone(), enabled.clone());
        Cell::computed(move || {
            if enabled.read()? {
                key.read()
            } else {
                Ok("off".to_string())
            }
        })
    };

    let seen = Rc::new(RefCell::new(Vec::new()));
    let seen_clone = seen.clone();
    shown
        .subscribe(move |value: &String, _| seen_clone.borrow_mut().push(value.clone()), true)
        .unwrap();
    assert_eq!(emitter.handler_count("key"), 1);

    emitter.emit("key", &"a".to_string());
    Runtime::flush().unwrap();
    assert_eq!(shown.peek().as_deref(), Some("a"));

    enabled.write(false).unwrap();
    Runtime::flush().unwrap();
    assert_eq!(emitter.handler_count("key"), 0);
    assert_eq!(*seen.borrow(), vec!["", "a", "off"]);

    emitter.emit("key", &"ignored".to_string());
    assert_eq!(key.peek().as_deref(), Some("a"));
}

/// Filtering a stream forwards only accepted values.
#[test]
fn stream_filter_forwards_matching_values() {
    let stream = Stream::new(0);
    let odd = stream.filter(|n| n % 2 == 1);
    let seen = Rc::new(RefCell::new(Vec::new()));

    let seen_clone = seen.clone();
    odd.subscribe(
        move |value: &Option<i32>, _| seen_clone.borrow_mut().extend(*value),
        true,
    )
    .unwrap();

    for value in [1, 2, 3] {
        stream.push(value).unwrap();
    }
    assert_eq!(*seen.borrow(), vec![1, 3]);
}

/// Plain structs can expose named cells that derive from each other.
#[test]
fn struct_with_named_cells() {
    struct Rect {
        width: Cell<u32>,
        height: Cell<u32>,
        area: Cell<u32>,
    }

    impl Rect {
        fn new(width: u32, height: u32) -> Self {
            let width = Cell::new(width);
            let height = Cell::new(height);
            let area = {
                let (width, height) = (width.clone(), height.clone());
                Cell::computed(move || Ok(width.read()? * height.read()?))
            };
            Self {
                width,
                height,
                area,
            }
        }
    }

    let rect = Rect::new(3, 4);
    assert_eq!(rect.area.read().unwrap(), 12);

    Runtime::batch(|| {
        rect.width.write(5).unwrap();
        rect.height.write(6).unwrap();
    })
    .unwrap();
    assert_eq!(rect.area.read().unwrap(), 30);
}

/// Deferred passes run on the tokio local set.
#[tokio::test]
async fn deferred_pass_runs_on_local_set() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            Runtime::configure(EngineConfig {
                executor: ExecutorKind::Tokio,
                ..EngineConfig::default()
            })
            .unwrap();

            let source = Cell::new(1);
            let doubled = source.map(|n| n * 2);
            let seen = Rc::new(StdCell::new(0));
            let seen_clone = seen.clone();
            doubled
                .subscribe(move |value: &i32, _| seen_clone.set(*value), true)
                .unwrap();
            assert_eq!(seen.get(), 2);

            source.write(5).unwrap();
            assert_eq!(seen.get(), 2);
            assert!(Runtime::is_pending());

            tokio::task::yield_now().await;
            assert_eq!(seen.get(), 10);
            assert!(!Runtime::is_pending());
        })
        .await;
}
