use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use tracing::{debug, trace};

use crate::metrics::record_discarded;

type JointAction<V> = Box<dyn FnOnce(&V)>;

/// The lifecycle of a [`Latch`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum LatchState {
    /// No contender has written a value yet.
    Open,

    /// A contender has written the value and the joint action has been invoked.
    /// This is a terminal state.
    Closed,
}

/// Admits the first of several competing values and discards the rest.
///
/// Each contender typically corresponds to one outstanding operation. Whichever completion is
/// delivered first writes the value and triggers the joint action; every later attempt is a
/// silent no-op. Which contender wins is decided only by the order in which the task queue
/// delivers the completions.
///
/// The latch is a cheaply cloneable handle; all clones refer to the same latch.
///
/// # Example
///
/// ```rust
/// use turns::{Latch, LatchState};
///
/// let latch = Latch::new(|value: &i32| assert_eq!(*value, 40));
///
/// assert!(latch.attempt(20 * 2));
/// assert!(!latch.attempt(41 / 2));
///
/// assert_eq!(latch.state(), LatchState::Closed);
/// assert_eq!(latch.value(), Some(40));
/// ```
pub struct Latch<V> {
    inner: Rc<LatchInner<V>>,
}

struct LatchInner<V> {
    slot: RefCell<Option<V>>,

    // Present until the latch closes.
    action: Cell<Option<JointAction<V>>>,
}

impl<V> Latch<V>
where
    V: 'static,
{
    /// Creates an open latch that invokes `joint_action` with the first value it admits.
    pub fn new<F>(joint_action: F) -> Self
    where
        F: FnOnce(&V) + 'static,
    {
        Self {
            inner: Rc::new(LatchInner {
                slot: RefCell::new(None),
                action: Cell::new(Some(Box::new(joint_action))),
            }),
        }
    }

    /// Offers `value` to the latch.
    ///
    /// If the latch is open, the value is recorded, the latch closes and the joint action is
    /// invoked with the value. If the latch is already closed, the value is discarded.
    ///
    /// Returns whether this attempt won.
    pub fn attempt(&self, value: V) -> bool {
        if self.state() == LatchState::Closed {
            trace!("latch already closed; discarding value");
            record_discarded();
            return false;
        }

        *self.inner.slot.borrow_mut() = Some(value);

        debug!("latch admitted a value; invoking joint action");

        if let Some(action) = self.inner.action.take() {
            let slot = self.inner.slot.borrow();

            if let Some(value) = slot.as_ref() {
                action(value);
            }
        }

        true
    }

    /// Returns a completion closure that offers its value to this latch.
    #[must_use]
    pub fn contender(&self) -> impl FnOnce(V) + 'static {
        let latch = self.clone();
        move |value| {
            latch.attempt(value);
        }
    }

    /// The current state of the latch.
    #[must_use]
    pub fn state(&self) -> LatchState {
        // The slot is only ever borrowed mutably while it is still empty, so a failed borrow
        // cannot hide a closed latch.
        match self.inner.slot.try_borrow() {
            Ok(slot) if slot.is_none() => LatchState::Open,
            _ => LatchState::Closed,
        }
    }

    /// The admitted value, if the latch has closed.
    #[must_use]
    pub fn value(&self) -> Option<V>
    where
        V: Clone,
    {
        self.inner.slot.borrow().clone()
    }
}

impl<V> Clone for Latch<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<V> fmt::Debug for Latch<V> {
    #[cfg_attr(test, mutants::skip)] // No API contract for debug output.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let closed = self
            .inner
            .slot
            .try_borrow()
            .map_or(true, |slot| slot.is_some());

        f.debug_struct("Latch")
            .field("closed", &closed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::time::Duration;

    use static_assertions::assert_not_impl_any;

    use super::*;
    use crate::test_utils::Journal;
    use crate::{Scheduler, TaskQueue};

    assert_not_impl_any!(Latch<i32>: Send, Sync);

    fn journaling_latch(journal: &Journal) -> Latch<i32> {
        let journal = journal.clone();
        Latch::new(move |value: &i32| journal.record(format!("won with {value}")))
    }

    #[test]
    fn first_attempt_wins_in_either_order() {
        for (first, second) in [(20, 41), (41, 20)] {
            let journal = Journal::new();
            let latch = journaling_latch(&journal);

            assert!(latch.attempt(first));
            assert!(!latch.attempt(second));

            assert_eq!(journal.entries(), [format!("won with {first}")]);
            assert_eq!(latch.value(), Some(first));
        }
    }

    #[test]
    fn starts_open_and_closes_on_first_attempt() {
        let journal = Journal::new();
        let latch = journaling_latch(&journal);

        assert_eq!(latch.state(), LatchState::Open);
        assert_eq!(latch.value(), None);

        latch.attempt(1);

        assert_eq!(latch.state(), LatchState::Closed);
    }

    #[test]
    fn winner_is_decided_by_delivery_order() {
        let queue = TaskQueue::new();
        let journal = Journal::new();
        let latch = journaling_latch(&journal);

        let doubled = latch.contender();
        queue.schedule_after(Duration::from_millis(30), move || doubled(20 * 2));

        let halved = latch.contender();
        queue.schedule_after(Duration::from_millis(10), move || halved(41 / 2));

        queue.run_until_idle().unwrap();

        assert_eq!(journal.entries(), ["won with 20"]);
    }

    #[test]
    fn reentrant_attempt_from_joint_action_is_discarded() {
        let journal = Journal::new();
        let slot: Rc<RefCell<Option<Latch<i32>>>> = Rc::new(RefCell::new(None));

        let inner_slot = Rc::clone(&slot);
        let inner_journal = journal.clone();
        let latch = Latch::new(move |value: &i32| {
            inner_journal.record(format!("won with {value}"));

            if let Some(latch) = inner_slot.borrow().as_ref() {
                assert!(!latch.attempt(value.saturating_add(1)));
                assert_eq!(latch.state(), LatchState::Closed);
            }
        });
        *slot.borrow_mut() = Some(latch.clone());

        assert!(latch.attempt(5));
        assert_eq!(journal.entries(), ["won with 5"]);

        slot.borrow_mut().take();
    }
}
