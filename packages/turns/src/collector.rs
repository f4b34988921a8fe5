use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use tracing::{debug, trace};

use crate::metrics::record_discarded;
use crate::{Error, Result};

type CompletionAction<T> = Box<dyn FnOnce(Vec<T>)>;

/// Collects the results of concurrently issued operations into slots chosen at issue time.
///
/// The caller assigns each operation a slot index when issuing it. Results land in their slot
/// no matter which operation physically completes first, so the collected sequence always
/// reflects the logical order in which the operations were issued.
///
/// Writing the same slot twice overwrites the earlier value. The collector does not count
/// writes; issuing two operations for one slot is a caller error that goes undetected.
///
/// The collector is a cheaply cloneable handle; all clones refer to the same slots.
///
/// # Example
///
/// ```rust
/// use turns::Collector;
///
/// let collector = Collector::new(2);
///
/// collector.set(1, "b").unwrap();
/// assert!(!collector.is_complete());
///
/// collector.set(0, "a").unwrap();
/// assert!(collector.is_complete());
///
/// assert_eq!(collector.take(), Some(vec!["a", "b"]));
/// ```
pub struct Collector<T> {
    inner: Rc<CollectorInner<T>>,
}

struct CollectorInner<T> {
    len: usize,

    // Emptied once the values have been drained.
    slots: RefCell<Vec<Option<T>>>,
    filled: Cell<usize>,

    // Set once the values have left the collector, via `take()` or the completion action.
    drained: Cell<bool>,

    on_complete: Cell<Option<CompletionAction<T>>>,
}

impl<T> Collector<T>
where
    T: 'static,
{
    /// Creates a collector with `len` empty slots.
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self::with_action(len, None)
    }

    /// Creates a collector with `len` empty slots that hands the collected values to `action`
    /// as soon as every slot has been written.
    ///
    /// The values move into the action; writes that arrive afterwards are discarded.
    /// A collector with zero slots is complete from the start and invokes the action immediately.
    pub fn with_completion<F>(len: usize, action: F) -> Self
    where
        F: FnOnce(Vec<T>) + 'static,
    {
        let collector = Self::with_action(len, Some(Box::new(action)));

        if len == 0 {
            collector.complete();
        }

        collector
    }

    fn with_action(len: usize, on_complete: Option<CompletionAction<T>>) -> Self {
        Self {
            inner: Rc::new(CollectorInner {
                len,
                slots: RefCell::new((0..len).map(|_| None).collect()),
                filled: Cell::new(0),
                drained: Cell::new(false),
                on_complete: Cell::new(on_complete),
            }),
        }
    }

    /// Writes `value` into slot `index`, overwriting any earlier value in that slot.
    ///
    /// Writes that arrive after the values have been drained are discarded.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SlotOutOfRange`] if `index` is not below [`len()`][Self::len].
    pub fn set(&self, index: usize, value: T) -> Result<()> {
        let len = self.len();

        if index >= len {
            return Err(Error::SlotOutOfRange { index, len });
        }

        if self.inner.drained.get() {
            trace!(index, "collector already drained; discarding value");
            record_discarded();
            return Ok(());
        }

        let became_complete = {
            let mut slots = self.inner.slots.borrow_mut();

            let Some(slot) = slots.get_mut(index) else {
                return Err(Error::SlotOutOfRange { index, len });
            };

            if slot.replace(value).is_some() {
                trace!(index, "overwrote collector slot");
                false
            } else {
                let filled = self.inner.filled.get().saturating_add(1);
                self.inner.filled.set(filled);
                filled == len
            }
        };

        if became_complete {
            debug!(len, "every collector slot has been written");
            self.complete();
        }

        Ok(())
    }

    /// Returns a completion closure that writes its value into slot `index`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SlotOutOfRange`] if `index` is not below [`len()`][Self::len].
    pub fn slot(&self, index: usize) -> Result<impl FnOnce(T) + 'static> {
        let len = self.len();

        if index >= len {
            return Err(Error::SlotOutOfRange { index, len });
        }

        let collector = self.clone();

        Ok(move |value| {
            // The index was checked when the slot closure was created.
            _ = collector.set(index, value);
        })
    }

    /// Whether every slot has been written at least once.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.inner.drained.get() || self.inner.filled.get() == self.len()
    }

    /// The number of slots that have been written at least once.
    #[must_use]
    pub fn filled(&self) -> usize {
        self.inner.filled.get()
    }

    /// The number of slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len
    }

    /// Whether the collector has no slots at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The current value of slot `index`, if it has been written and not drained.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<T>
    where
        T: Clone,
    {
        self.inner.slots.borrow().get(index).cloned().flatten()
    }

    /// Moves the collected values out in slot order, if every slot has been written.
    ///
    /// Returns `None` if the collector is not complete or has already been drained.
    #[must_use]
    pub fn take(&self) -> Option<Vec<T>> {
        if self.inner.drained.get() || !self.is_complete() {
            return None;
        }

        self.drain()
    }

    fn complete(&self) {
        let Some(action) = self.inner.on_complete.take() else {
            return;
        };

        if let Some(values) = self.drain() {
            action(values);
        }
    }

    fn drain(&self) -> Option<Vec<T>> {
        self.inner.drained.set(true);

        let slots = self.inner.slots.take();

        // Only called once every slot is filled, so nothing is lost here.
        slots.into_iter().collect()
    }
}

impl<T> Clone for Collector<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Collector<T> {
    #[cfg_attr(test, mutants::skip)] // No API contract for debug output.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collector")
            .field("filled", &self.inner.filled.get())
            .field("drained", &self.inner.drained.get())
            .finish_non_exhaustive()
    }
}
