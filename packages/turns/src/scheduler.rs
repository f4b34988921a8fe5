//! The scheduling contract every coordinator relies on.

use std::fmt::Debug;
use std::time::Duration;

/// A unit of work queued for a single execution on the task queue.
pub type Task = Box<dyn FnOnce()>;

/// A host task queue that runs callbacks one at a time, each to completion.
///
/// This is the only capability the coordinators in this crate need from their environment.
/// Implementations must uphold the following contract:
///
/// * A scheduled task runs no earlier than `delay` after it was scheduled.
/// * Tasks run one at a time. A task that has started runs to completion before any other task
///   starts ("run-to-completion"), so state touched only from tasks needs no locking.
/// * Tasks with equal due times run in the order they were scheduled.
/// * A task is never run inside the call that scheduled it.
///
/// [`TaskQueue`][crate::TaskQueue] is a deterministic implementation with a virtual clock.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
///
/// use turns::{Scheduler, TaskQueue};
///
/// let queue = TaskQueue::new();
///
/// let handle = queue.schedule_after(Duration::from_millis(10), || println!("never printed"));
/// queue.enqueue(|| println!("runs on the next turn"));
///
/// assert!(queue.cancel(handle));
/// assert_eq!(queue.run_until_idle().unwrap(), 1);
/// ```
pub trait Scheduler {
    /// Identifies a scheduled task for the purpose of cancelling it.
    type Handle: Copy + Debug;

    /// Schedules `task` to run on a later turn, no earlier than `delay` from now.
    fn schedule_after<F>(&self, delay: Duration, task: F) -> Self::Handle
    where
        F: FnOnce() + 'static;

    /// Prevents a scheduled task from running if it has not run yet.
    ///
    /// Returns `true` if the task was removed, `false` if it already ran or was already cancelled.
    fn cancel(&self, handle: Self::Handle) -> bool;

    /// Schedules `task` to run on a later turn with no minimum delay.
    fn enqueue<F>(&self, task: F)
    where
        F: FnOnce() + 'static,
    {
        _ = self.schedule_after(Duration::ZERO, task);
    }
}
