use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use tracing::trace;

use crate::Scheduler;
use crate::metrics::record_discarded;

type DeferredCallback<T> = Box<dyn FnMut(T)>;

/// Guarantees that a callback never runs in the same turn in which it was handed out.
///
/// Some facilities invoke their callback synchronously, before the call that issued the
/// operation has returned, and only sometimes. Code written right after issuing such an
/// operation then cannot know whether the callback has already run. Wrapping the callback in
/// `AlwaysAsync` removes that doubt: code that follows the issuing call in the same turn always
/// runs before the callback does.
///
/// Creating the wrapper enqueues a zero-delay marker task.
///
/// * If [`deliver()`][Self::deliver] is called before the marker has run, the value is captured
///   and the callback receives it when the marker runs. Only the first such value is kept; any
///   further values delivered before the marker runs are discarded.
/// * If [`deliver()`][Self::deliver] is called after the marker has run, the operation is already
///   asynchronous and the value is passed straight to the callback.
///
/// Repeated deliveries after the marker are passed through as-is. Pair the wrapper with a
/// [`Latch`][crate::Latch] if the callback must only ever observe one value.
///
/// # Example
///
/// ```rust
/// use std::cell::Cell;
/// use std::rc::Rc;
///
/// use turns::{AlwaysAsync, TaskQueue};
///
/// let queue = TaskQueue::new();
/// let a = Rc::new(Cell::new(0));
///
/// let observed = Rc::clone(&a);
/// let wrapped = AlwaysAsync::new(&queue, move |()| assert_eq!(observed.get(), 1));
///
/// // A facility that calls back synchronously.
/// wrapped.deliver(());
///
/// // Still runs before the callback.
/// a.set(a.get() + 1);
///
/// queue.run_until_idle().unwrap();
/// ```
pub struct AlwaysAsync<T> {
    inner: Rc<AlwaysAsyncInner<T>>,
}

struct AlwaysAsyncInner<T> {
    marker_ran: Cell<bool>,

    // The first value delivered before the marker ran, waiting for the marker.
    captured: RefCell<Option<T>>,

    // Mutably borrowed only while the callback is running. A panicking callback releases the
    // borrow while unwinding, so the wrapper keeps working after a contained panic.
    callback: RefCell<DeferredCallback<T>>,
}

impl<T> AlwaysAsync<T>
where
    T: 'static,
{
    /// Wraps `callback` and enqueues the marker task on `scheduler`.
    pub fn new<S, F>(scheduler: &S, callback: F) -> Self
    where
        S: Scheduler,
        F: FnMut(T) + 'static,
    {
        let inner = Rc::new(AlwaysAsyncInner {
            marker_ran: Cell::new(false),
            captured: RefCell::new(None),
            callback: RefCell::new(Box::new(callback)),
        });

        let on_marker = Rc::clone(&inner);
        scheduler.enqueue(move || on_marker.marker());

        Self { inner }
    }

    /// Delivers a value to the callback, deferring it to the marker turn if that has not run yet.
    pub fn deliver(&self, value: T) {
        if self.inner.marker_ran.get() {
            self.inner.invoke(value);
            return;
        }

        let mut captured = self.inner.captured.borrow_mut();

        if captured.is_some() {
            trace!("value already captured before the marker turn; discarding delivery");
            record_discarded();
            return;
        }

        trace!("capturing synchronous delivery until the marker turn");
        *captured = Some(value);
    }

    /// Returns a completion closure that delivers to this wrapper.
    ///
    /// This is the form to hand to a [`Requester`][crate::Requester].
    #[must_use]
    pub fn callback(&self) -> impl FnOnce(T) + 'static {
        let wrapper = self.clone();
        move |value| wrapper.deliver(value)
    }

    /// Whether the marker task has not run yet, meaning deliveries are still being deferred.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        !self.inner.marker_ran.get()
    }
}

impl<T> AlwaysAsyncInner<T> {
    fn marker(&self) {
        self.marker_ran.set(true);

        let captured = self.captured.borrow_mut().take();

        if let Some(value) = captured {
            self.invoke(value);
        }
    }

    fn invoke(&self, value: T) {
        let Ok(mut callback) = self.callback.try_borrow_mut() else {
            trace!("callback re-entered its own wrapper; discarding delivery");
            record_discarded();
            return;
        };

        (*callback)(value);
    }
}

impl<T> Clone for AlwaysAsync<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for AlwaysAsync<T> {
    #[cfg_attr(test, mutants::skip)] // No API contract for debug output.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlwaysAsync")
            .field("marker_ran", &self.inner.marker_ran.get())
            .field("captured", &self.inner.captured.borrow().is_some())
            .finish_non_exhaustive()
    }
}
