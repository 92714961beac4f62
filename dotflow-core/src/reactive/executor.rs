//! Executors
//!
//! Deferred propagation passes and throttle timers are handed to an
//! [`Executor`], which plays the role of the cooperative event loop.
//!
//! - [`ManualExecutor`] keeps tasks on a virtual clock the host advances. It
//!   is the default and makes timing-dependent behaviour deterministic.
//! - [`TokioExecutor`] spawns tasks onto the current `tokio::task::LocalSet`.

use std::cell::{Cell as StdCell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use super::runtime::Runtime;

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce()>;

/// Runs deferred work on a later turn of the host's event loop.
pub trait Executor {
    /// Run `task` on the next turn.
    fn defer(&self, task: Task);

    /// Run `task` once `delay` has elapsed.
    fn defer_after(&self, delay: Duration, task: Task);
}

struct Timer {
    due: Duration,
    seq: u64,
    task: Task,
}

/// Executor driven by an explicit virtual clock.
///
/// Tasks never run on their own; call [`run_pending`](Self::run_pending) or
/// [`advance`](Self::advance).
#[derive(Default)]
pub struct ManualExecutor {
    now: StdCell<Duration>,
    seq: StdCell<u64>,
    timers: RefCell<Vec<Timer>>,
}

impl ManualExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a manual executor and install it on the current thread's runtime.
    pub fn install() -> Rc<Self> {
        let executor = Rc::new(Self::new());
        Runtime::install_executor(executor.clone());
        executor
    }

    /// Current virtual time.
    pub fn now(&self) -> Duration {
        self.now.get()
    }

    /// Number of tasks waiting, due or not.
    pub fn pending_tasks(&self) -> usize {
        self.timers.borrow().len()
    }

    /// Run every task that is due at the current virtual time.
    pub fn run_pending(&self) -> usize {
        self.advance(Duration::ZERO)
    }

    /// Move the clock forward by `by` and run every task that falls due,
    /// including tasks scheduled by tasks that ran. Returns the number of
    /// tasks that ran.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.now.get() + by;
        let mut ran = 0;

        while let Some(timer) = self.take_due(target) {
            if timer.due > self.now.get() {
                self.now.set(timer.due);
            }
            (timer.task)();
            ran += 1;
        }

        self.now.set(target);
        ran
    }

    fn take_due(&self, target: Duration) -> Option<Timer> {
        let mut timers = self.timers.borrow_mut();
        let index = timers
            .iter()
            .enumerate()
            .filter(|(_, timer)| timer.due <= target)
            .min_by_key(|(_, timer)| (timer.due, timer.seq))
            .map(|(index, _)| index)?;
        Some(timers.remove(index))
    }

    fn push(&self, due: Duration, task: Task) {
        let seq = self.seq.get();
        self.seq.set(seq + 1);
        self.timers.borrow_mut().push(Timer { due, seq, task });
    }
}

impl Executor for ManualExecutor {
    fn defer(&self, task: Task) {
        self.push(self.now.get(), task);
    }

    fn defer_after(&self, delay: Duration, task: Task) {
        self.push(self.now.get() + delay, task);
    }
}

impl std::fmt::Debug for ManualExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualExecutor")
            .field("now", &self.now.get())
            .field("pending_tasks", &self.pending_tasks())
            .finish()
    }
}

/// Executor backed by the tokio `LocalSet` of the current thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioExecutor;

impl Executor for TokioExecutor {
    fn defer(&self, task: Task) {
        tokio::task::spawn_local(async move {
            task();
        });
    }

    fn defer_after(&self, delay: Duration, task: Task) {
        tokio::task::spawn_local(async move {
            tokio::time::sleep(delay).await;
            task();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deferred_tasks_wait_for_run_pending() {
        let executor = ManualExecutor::new();
        let ran = Rc::new(StdCell::new(0));

        let ran_clone = ran.clone();
        executor.defer(Box::new(move || ran_clone.set(ran_clone.get() + 1)));
        assert_eq!(ran.get(), 0);
        assert_eq!(executor.pending_tasks(), 1);

        assert_eq!(executor.run_pending(), 1);
        assert_eq!(ran.get(), 1);
        assert_eq!(executor.pending_tasks(), 0);
    }

    #[test]
    fn timers_fire_in_due_order() {
        let executor = ManualExecutor::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        for (delay, label) in [(30, "c"), (10, "a"), (20, "b")] {
            let log = log.clone();
            executor.defer_after(
                Duration::from_millis(delay),
                Box::new(move || log.borrow_mut().push(label)),
            );
        }

        assert_eq!(executor.advance(Duration::from_millis(15)), 1);
        assert_eq!(*log.borrow(), vec!["a"]);

        assert_eq!(executor.advance(Duration::from_millis(15)), 2);
        assert_eq!(*log.borrow(), vec!["a", "b", "c"]);
        assert_eq!(executor.now(), Duration::from_millis(30));
    }

    #[test]
    fn tasks_may_schedule_more_tasks() {
        let executor = Rc::new(ManualExecutor::new());
        let ran = Rc::new(StdCell::new(false));

        let inner_executor = executor.clone();
        let ran_clone = ran.clone();
        executor.defer(Box::new(move || {
            let ran_clone = ran_clone.clone();
            inner_executor.defer(Box::new(move || ran_clone.set(true)));
        }));

        assert_eq!(executor.run_pending(), 2);
        assert!(ran.get());
    }
}
