//! A deterministic single-threaded task queue with a virtual clock.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::time::Duration;

use nm::Event;
use tracing::{debug, error, trace, warn};

mod builder;

pub use builder::*;

use crate::metrics::{TASKS_EXECUTED, TASKS_PANICKED, TIMERS_CANCELLED};
use crate::{Error, Result, Scheduler, Task};

/// Identifies a task scheduled on a [`TaskQueue`], for cancellation.
///
/// Handles order by due time and then by scheduling order, which is exactly the order in which
/// the queue runs the tasks they identify.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct TimerHandle {
    due: Duration,
    sequence: u64,
}

impl TimerHandle {
    /// The virtual time at which the task becomes due.
    #[must_use]
    pub fn due(self) -> Duration {
        self.due
    }
}

/// A single-threaded task queue that runs each task to completion before the next.
///
/// This is a reference host for the [`Scheduler`] contract. Time is virtual: when no task is due,
/// running the next turn moves the clock straight to the due time of the earliest pending task.
/// This makes every interleaving of completions reproducible, which is what tests of
/// coordination logic need.
///
/// The queue is a cheaply cloneable handle. All clones refer to the same queue.
///
/// # Example
///
/// ```rust
/// use std::cell::RefCell;
/// use std::rc::Rc;
/// use std::time::Duration;
///
/// use turns::{Scheduler, TaskQueue};
///
/// let queue = TaskQueue::new();
/// let log = Rc::new(RefCell::new(Vec::new()));
///
/// let later = Rc::clone(&log);
/// queue.schedule_after(Duration::from_millis(20), move || later.borrow_mut().push("later"));
///
/// let sooner = Rc::clone(&log);
/// queue.enqueue(move || sooner.borrow_mut().push("sooner"));
///
/// queue.run_until_idle().unwrap();
///
/// assert_eq!(*log.borrow(), ["sooner", "later"]);
/// assert_eq!(queue.now(), Duration::from_millis(20));
/// ```
///
/// # Reference cycles
///
/// Tasks often capture a clone of the queue (directly or via a coordinator). Tasks still pending
/// when the last outside handle is dropped keep the queue alive. Drain the queue with
/// [`run_until_idle()`][Self::run_until_idle] or discard the leftovers with
/// [`clear()`][Self::clear] before letting go of it.
#[derive(Clone)]
pub struct TaskQueue {
    core: Rc<QueueCore>,
}

struct QueueCore {
    now: Cell<Duration>,
    next_sequence: Cell<u64>,
    pending: RefCell<BTreeMap<TimerHandle, Task>>,
    turns: Cell<u64>,
    panics: Cell<u64>,

    // Set while a task is executing, to reject nested turns.
    running: Cell<bool>,

    turn_limit: Option<u64>,
    isolate_panics: bool,
}

impl TaskQueue {
    /// Creates a task queue with default settings.
    ///
    /// Use [`TaskQueue::builder()`] for custom configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Creates a builder for configuring the task queue.
    #[must_use]
    pub fn builder() -> TaskQueueBuilder {
        TaskQueueBuilder::new()
    }

    pub(crate) fn configured(
        turn_limit: Option<u64>,
        isolate_panics: bool,
        start_at: Duration,
    ) -> Self {
        Self {
            core: Rc::new(QueueCore {
                now: Cell::new(start_at),
                next_sequence: Cell::new(0),
                pending: RefCell::new(BTreeMap::new()),
                turns: Cell::new(0),
                panics: Cell::new(0),
                running: Cell::new(false),
                turn_limit,
                isolate_panics,
            }),
        }
    }

    /// The current reading of the virtual clock.
    #[must_use]
    pub fn now(&self) -> Duration {
        self.core.now.get()
    }

    /// The number of turns (task executions) this queue has run in total.
    #[must_use]
    pub fn turns(&self) -> u64 {
        self.core.turns.get()
    }

    /// The number of tasks that panicked and were contained at the turn boundary.
    #[must_use]
    pub fn panics(&self) -> u64 {
        self.core.panics.get()
    }

    /// The number of tasks scheduled but not yet run.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.core.pending.borrow().len()
    }

    /// Whether no tasks are waiting to run.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.core.pending.borrow().is_empty()
    }

    /// Runs the earliest pending task to completion.
    ///
    /// If that task is not yet due, the virtual clock first moves forward to its due time.
    ///
    /// Returns `false` if there was nothing to run, or if called from within a task of this
    /// queue. Running another task inside the current one would break run-to-completion, so such
    /// nested calls run nothing.
    pub fn run_next_turn(&self) -> bool {
        if self.reject_nested("run_next_turn") {
            return false;
        }

        // The borrow must end before the task runs, as the task may schedule more tasks.
        let Some((handle, task)) = self.core.pending.borrow_mut().pop_first() else {
            return false;
        };

        if handle.due > self.now() {
            self.core.now.set(handle.due);
        }

        self.execute(handle, task);
        true
    }

    /// Runs turns until no tasks are pending, including any tasks scheduled along the way.
    ///
    /// Returns the number of turns run by this call. Called from within a task of this queue, it
    /// runs nothing and returns zero.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TurnLimitExceeded`] if a turn limit is configured and tasks are still
    /// pending after that many turns.
    pub fn run_until_idle(&self) -> Result<u64> {
        self.run_while(|_| true)
    }

    /// Runs every task that becomes due within `by` of the current time, then moves the virtual
    /// clock to exactly `now + by`.
    ///
    /// This models the passage of a stretch of time in which the host would have run whatever
    /// became due. Tasks scheduled along the way are included if they fall within the window.
    ///
    /// Returns the number of turns run by this call. Called from within a task of this queue, it
    /// runs nothing, leaves the clock alone and returns zero.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TurnLimitExceeded`] if a turn limit is configured and tasks due within
    /// the window are still pending after that many turns. The clock then stays at the due time
    /// of the last task that ran instead of moving on to `now + by`.
    pub fn advance(&self, by: Duration) -> Result<u64> {
        if self.reject_nested("advance") {
            return Ok(0);
        }

        let deadline = self.now().saturating_add(by);

        let turns = self.run_while(|due| due <= deadline)?;

        if deadline > self.now() {
            self.core.now.set(deadline);
        }

        Ok(turns)
    }

    /// Discards every pending task without running it.
    ///
    /// Returns the number of tasks discarded.
    pub fn clear(&self) -> usize {
        let discarded = self.core.pending.take();
        let count = discarded.len();

        debug!(count, "discarding pending tasks");

        // Dropping the tasks may drop the last reference to something that holds this queue,
        // so this happens only after the borrow above has ended.
        drop(discarded);

        count
    }

    fn next_due(&self) -> Option<Duration> {
        self.core
            .pending
            .borrow()
            .first_key_value()
            .map(|(handle, _)| handle.due)
    }

    fn reject_nested(&self, operation: &'static str) -> bool {
        if !self.core.running.get() {
            return false;
        }

        warn!(
            operation,
            "task tried to run turns of its own queue; ignoring the nested call"
        );
        true
    }

    fn run_while(&self, mut should_run: impl FnMut(Duration) -> bool) -> Result<u64> {
        let mut turns: u64 = 0;

        if self.reject_nested("run_until_idle") {
            return Ok(turns);
        }

        while let Some(due) = self.next_due() {
            if !should_run(due) {
                break;
            }

            if let Some(limit) = self.core.turn_limit {
                if turns >= limit {
                    return Err(Error::TurnLimitExceeded { limit });
                }
            }

            self.run_next_turn();
            turns = turns.saturating_add(1);
        }

        Ok(turns)
    }

    fn execute(&self, handle: TimerHandle, task: Task) {
        let turn = self.core.turns.get().saturating_add(1);
        self.core.turns.set(turn);
        TASKS_EXECUTED.with(Event::observe_once);

        trace!(turn, now = ?self.now(), sequence = handle.sequence, "running task");

        self.core.running.set(true);

        // Reset even if the task panics with isolation disabled.
        let _running = scopeguard::guard((), |()| self.core.running.set(false));

        if !self.core.isolate_panics {
            task();
            return;
        }

        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
            self.core.panics.set(self.core.panics.get().saturating_add(1));
            TASKS_PANICKED.with(Event::observe_once);

            let message = format_panic_payload(&*payload);
            error!(
                turn,
                panic_message = %message,
                "task panicked; continuing with the next task"
            );
        }
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for TaskQueue {
    type Handle = TimerHandle;

    fn schedule_after<F>(&self, delay: Duration, task: F) -> TimerHandle
    where
        F: FnOnce() + 'static,
    {
        let sequence = self.core.next_sequence.get();
        self.core.next_sequence.set(sequence.wrapping_add(1));

        let handle = TimerHandle {
            due: self.now().saturating_add(delay),
            sequence,
        };

        self.core.pending.borrow_mut().insert(handle, Box::new(task));

        trace!(sequence, ?delay, "scheduled task");

        handle
    }

    fn cancel(&self, handle: TimerHandle) -> bool {
        let removed = self.core.pending.borrow_mut().remove(&handle);

        if removed.is_none() {
            return false;
        }

        TIMERS_CANCELLED.with(Event::observe_once);
        trace!(sequence = handle.sequence, "cancelled task");

        true
    }
}

impl fmt::Debug for TaskQueue {
    #[cfg_attr(test, mutants::skip)] // No API contract for debug output.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue")
            .field("now", &self.now())
            .field("pending", &self.pending())
            .field("turns", &self.turns())
            .field("panics", &self.panics())
            .finish_non_exhaustive()
    }
}

/// Formats a panic payload for logging.
fn format_panic_payload(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
