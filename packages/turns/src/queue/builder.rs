use std::time::Duration;

use crate::TaskQueue;

/// Builder for configuring a [`TaskQueue`].
///
/// Use [`TaskQueue::builder()`] to create a new instance of this builder.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
///
/// use turns::TaskQueue;
///
/// let queue = TaskQueue::builder()
///     .turn_limit(10_000)
///     .start_at(Duration::from_secs(60))
///     .build();
///
/// assert_eq!(queue.now(), Duration::from_secs(60));
/// ```
#[derive(Debug)]
pub struct TaskQueueBuilder {
    turn_limit: Option<u64>,
    isolate_panics: bool,
    start_at: Duration,
}

impl TaskQueueBuilder {
    pub(crate) fn new() -> Self {
        Self {
            turn_limit: None,
            isolate_panics: true,
            start_at: Duration::ZERO,
        }
    }

    /// Sets the maximum number of turns a single [`TaskQueue::run_until_idle()`] or
    /// [`TaskQueue::advance()`] call may run before giving up with
    /// [`Error::TurnLimitExceeded`][crate::Error::TurnLimitExceeded].
    ///
    /// This catches tasks that keep rescheduling themselves forever.
    ///
    /// The default is no limit.
    #[must_use]
    pub fn turn_limit(mut self, limit: u64) -> Self {
        self.turn_limit = Some(limit);
        self
    }

    /// Sets whether a panic inside a task is contained at the turn boundary.
    ///
    /// When enabled, the panic is logged via `tracing::error!` and the queue moves on to the
    /// next task. When disabled, the panic propagates out of the `run_*` call that ran the task.
    ///
    /// The default is enabled.
    #[must_use]
    pub fn isolate_panics(mut self, isolate: bool) -> Self {
        self.isolate_panics = isolate;
        self
    }

    /// Sets the initial reading of the virtual clock.
    ///
    /// The default is zero.
    #[must_use]
    pub fn start_at(mut self, now: Duration) -> Self {
        self.start_at = now;
        self
    }

    /// Builds the task queue with the configured settings.
    #[must_use]
    pub fn build(self) -> TaskQueue {
        TaskQueue::configured(self.turn_limit, self.isolate_panics, self.start_at)
    }
}
