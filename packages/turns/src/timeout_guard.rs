use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use nm::Event;
use tracing::{debug, trace};

use crate::metrics::{GUARD_TIMEOUTS, record_discarded};
use crate::{Error, Result, Scheduler};

type GuardedCallback<T> = Box<dyn FnOnce(Result<T>)>;

/// Bounds how long a callback may wait for its completion.
///
/// Creating a guard schedules a timer for the given delay. Whichever comes first wins:
///
/// * If [`deliver()`][Self::deliver] is called first, the timer is cancelled and the callback
///   receives the delivered result.
/// * If the timer fires first, the callback receives [`Error::TimedOut`] and the guard becomes
///   expired. Any later delivery is silently discarded.
///
/// The callback therefore runs at most once, and exactly once as long as the host runs the timer.
///
/// The guard is a cheaply cloneable handle; all clones guard the same callback.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
///
/// use turns::{Scheduler, TaskQueue, TimeoutGuard};
///
/// let queue = TaskQueue::new();
///
/// let guard = TimeoutGuard::new(&queue, Duration::from_millis(500), |result| {
///     assert_eq!(result, Ok("data"));
/// });
///
/// // The real completion arrives after 100 ms, well within the window.
/// let completion = guard.callback();
/// queue.schedule_after(Duration::from_millis(100), move || completion(Ok("data")));
///
/// queue.run_until_idle().unwrap();
/// assert!(!guard.is_expired());
/// ```
pub struct TimeoutGuard<T, S>
where
    S: Scheduler,
{
    inner: Rc<GuardInner<T, S>>,
}

struct GuardInner<T, S>
where
    S: Scheduler,
{
    scheduler: S,
    delay: Duration,

    // Present until the guard settles one way or the other.
    callback: Cell<Option<GuardedCallback<T>>>,

    // Present until the timer fires or is cancelled.
    timer: Cell<Option<S::Handle>>,

    expired: Cell<bool>,
}

impl<T, S> TimeoutGuard<T, S>
where
    T: 'static,
    S: Scheduler + Clone + 'static,
{
    /// Guards `callback` with a timeout of `delay`, starting now.
    pub fn new<F>(scheduler: &S, delay: Duration, callback: F) -> Self
    where
        F: FnOnce(Result<T>) + 'static,
    {
        let inner = Rc::new(GuardInner {
            scheduler: scheduler.clone(),
            delay,
            callback: Cell::new(Some(Box::new(callback))),
            timer: Cell::new(None),
            expired: Cell::new(false),
        });

        // The timer holds a strong reference: if every handle to the guard is dropped because
        // the completion was lost, the callback must still hear about the timeout.
        let on_timer = Rc::clone(&inner);
        let timer = scheduler.schedule_after(delay, move || on_timer.expire());
        inner.timer.set(Some(timer));

        Self { inner }
    }

    /// Delivers the guarded completion.
    ///
    /// If the guard has neither expired nor already delivered, this cancels the timer and passes
    /// `result` to the callback. Otherwise `result` is discarded.
    pub fn deliver(&self, result: Result<T>) {
        let Some(callback) = self.inner.callback.take() else {
            trace!(
                expired = self.inner.expired.get(),
                "timeout guard already settled; discarding delivery"
            );
            record_discarded();
            return;
        };

        if let Some(timer) = self.inner.timer.take() {
            self.inner.scheduler.cancel(timer);
        }

        callback(result);
    }

    /// Returns a completion closure that delivers to this guard.
    ///
    /// This is the form to hand to a [`Requester`][crate::Requester].
    #[must_use]
    pub fn callback(&self) -> impl FnOnce(Result<T>) + 'static {
        let guard = self.clone();
        move |result| guard.deliver(result)
    }

    /// Whether the timer fired before any completion was delivered.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.inner.expired.get()
    }

    /// Whether the callback has run, either with a delivered result or with a timeout.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        // The callback is only ever taken to run it.
        let callback = self.inner.callback.take();
        let settled = callback.is_none();
        self.inner.callback.set(callback);
        settled
    }

    /// The timeout window this guard was created with.
    #[must_use]
    pub fn delay(&self) -> Duration {
        self.inner.delay
    }
}

impl<T, S> GuardInner<T, S>
where
    S: Scheduler,
{
    fn expire(&self) {
        self.timer.set(None);

        let Some(callback) = self.callback.take() else {
            // Cancellation removes the timer when a delivery wins, so this is unreachable with
            // a host that honors cancellation. Tolerate hosts that do not.
            return;
        };

        self.expired.set(true);
        GUARD_TIMEOUTS.with(Event::observe_once);
        debug!(delay = ?self.delay, "timeout guard expired before delivery");

        callback(Err(Error::TimedOut { after: self.delay }));
    }
}

impl<T, S> Clone for TimeoutGuard<T, S>
where
    S: Scheduler,
{
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T, S> fmt::Debug for TimeoutGuard<T, S>
where
    S: Scheduler,
{
    #[cfg_attr(test, mutants::skip)] // No API contract for debug output.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeoutGuard")
            .field("delay", &self.inner.delay)
            .field("expired", &self.inner.expired.get())
            .finish_non_exhaustive()
    }
}
