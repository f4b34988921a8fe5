use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::fmt::{self, Debug};
use std::hash::Hash;
use std::rc::Rc;

use tracing::{debug, trace};

use crate::metrics::record_discarded;
use crate::{Error, Result};

type JointAction<K, V> = Box<dyn FnOnce(&HashMap<K, V>)>;

/// The lifecycle of a [`Gate`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum GateState {
    /// At least one participant has not set a value yet.
    Waiting,

    /// Every participant has set a value but the joint action has not been invoked yet.
    ///
    /// This state is only observable from within the call that completed the set of values.
    Ready,

    /// The joint action has been invoked. This is a terminal state.
    Fired,
}

/// Invokes a joint action exactly once, as soon as every named participant has set a value.
///
/// Each participant typically corresponds to one outstanding operation whose completion order is
/// unknown. The order in which participants set their values only affects when the gate fires,
/// never what the joint action receives.
///
/// Once fired, the gate stays fired. Participants may still overwrite their values afterwards,
/// but the joint action never runs again.
///
/// The gate is a cheaply cloneable handle; all clones refer to the same gate.
///
/// # Example
///
/// ```rust
/// use std::collections::HashMap;
///
/// use turns::{Gate, GateState};
///
/// let gate = Gate::new(["foo", "bar"], |values: &HashMap<&str, i32>| {
///     assert_eq!(values["foo"] + values["bar"], 52);
/// });
///
/// assert_eq!(gate.set("bar", 10).unwrap(), GateState::Waiting);
/// assert_eq!(gate.set("foo", 42).unwrap(), GateState::Fired);
/// ```
pub struct Gate<K, V> {
    inner: Rc<GateInner<K, V>>,
}

struct GateInner<K, V> {
    participants: HashSet<K>,
    values: RefCell<HashMap<K, V>>,
    state: Cell<GateState>,

    // Present until the gate fires.
    action: Cell<Option<JointAction<K, V>>>,
}

impl<K, V> Gate<K, V>
where
    K: Eq + Hash + Debug + 'static,
    V: 'static,
{
    /// Creates a gate over the given participant names.
    ///
    /// Duplicate names count once. A gate without participants has nothing to wait for and
    /// fires immediately.
    pub fn new<I, F>(participants: I, joint_action: F) -> Self
    where
        I: IntoIterator<Item = K>,
        F: FnOnce(&HashMap<K, V>) + 'static,
    {
        let participants: HashSet<K> = participants.into_iter().collect();
        let capacity = participants.len();

        let gate = Self {
            inner: Rc::new(GateInner {
                participants,
                values: RefCell::new(HashMap::with_capacity(capacity)),
                state: Cell::new(GateState::Waiting),
                action: Cell::new(Some(Box::new(joint_action))),
            }),
        };

        if capacity == 0 {
            gate.inner.fire();
        }

        gate
    }

    /// Records the value of participant `name`, firing the joint action if this was the last
    /// missing value.
    ///
    /// Returns the state of the gate after the value has been recorded.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownParticipant`] if `name` is not one of the participants the gate
    /// was created with. The value is dropped.
    pub fn set(&self, name: K, value: V) -> Result<GateState> {
        if !self.inner.participants.contains(&name) {
            return Err(Error::UnknownParticipant {
                name: format!("{name:?}"),
            });
        }

        {
            // The joint action holds a shared borrow of the values while it runs.
            let Ok(mut values) = self.inner.values.try_borrow_mut() else {
                trace!(?name, "gate is running its joint action; discarding value");
                record_discarded();
                return Ok(self.state());
            };

            values.insert(name, value);

            if self.inner.state.get() != GateState::Waiting
                || values.len() < self.inner.participants.len()
            {
                return Ok(self.inner.state.get());
            }

            self.inner.state.set(GateState::Ready);
        }

        self.inner.fire();

        Ok(self.state())
    }

    /// Returns a completion closure that sets the value of participant `name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownParticipant`] if `name` is not one of the participants the gate
    /// was created with.
    pub fn setter(&self, name: K) -> Result<impl FnOnce(V) + 'static> {
        if !self.inner.participants.contains(&name) {
            return Err(Error::UnknownParticipant {
                name: format!("{name:?}"),
            });
        }

        let gate = self.clone();

        Ok(move |value| {
            // Membership was checked when the setter was created.
            _ = gate.set(name, value);
        })
    }

    /// The current state of the gate.
    #[must_use]
    pub fn state(&self) -> GateState {
        self.inner.state.get()
    }

    /// The number of participants that have not set a value yet.
    #[must_use]
    pub fn waiting_on(&self) -> usize {
        let recorded = self
            .inner
            .values
            .try_borrow()
            .map_or(self.inner.participants.len(), |values| values.len());

        self.inner.participants.len().saturating_sub(recorded)
    }

    /// The value most recently set by participant `name`, if any.
    #[must_use]
    pub fn value(&self, name: &K) -> Option<V>
    where
        V: Clone,
    {
        self.inner.values.borrow().get(name).cloned()
    }
}

impl<K, V> GateInner<K, V> {
    fn fire(&self) {
        let Some(action) = self.action.take() else {
            return;
        };

        self.state.set(GateState::Fired);
        debug!(
            participants = self.participants.len(),
            "gate received every value; firing joint action"
        );

        let values = self.values.borrow();
        action(&values);
    }
}

impl<K, V> Clone for Gate<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<K, V> fmt::Debug for Gate<K, V>
where
    K: Debug,
{
    #[cfg_attr(test, mutants::skip)] // No API contract for debug output.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gate")
            .field("participants", &self.inner.participants)
            .field("state", &self.inner.state.get())
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

    assert_not_impl_any!(Gate<String, i32>: Send, Sync);

    fn journaling_gate(journal: &Journal) -> Gate<&'static str, i32> {
        let journal = journal.clone();

        Gate::new(["foo", "bar"], move |values: &HashMap<&str, i32>| {
            let foo = values.get("foo").copied().unwrap_or_default();
            let bar = values.get("bar").copied().unwrap_or_default();
            journal.record(format!("foo={foo} bar={bar}"));
        })
    }

    #[test]
    fn fires_once_with_all_values_in_either_order() {
        for order in [["foo", "bar"], ["bar", "foo"]] {
            let journal = Journal::new();
            let gate = journaling_gate(&journal);

            for name in order {
                let value = if name == "foo" { 42 } else { 10 };
                gate.set(name, value).unwrap();
            }

            assert_eq!(journal.entries(), ["foo=42 bar=10"]);
            assert_eq!(gate.state(), GateState::Fired);
        }
    }

    #[test]
    fn waits_until_every_participant_is_present() {
        let journal = Journal::new();
        let gate = journaling_gate(&journal);

        assert_eq!(gate.waiting_on(), 2);
        assert_eq!(gate.set("foo", 42).unwrap(), GateState::Waiting);
        assert_eq!(gate.set("foo", 43).unwrap(), GateState::Waiting);
        assert_eq!(gate.waiting_on(), 1);
        assert_eq!(journal.len(), 0);

        assert_eq!(gate.set("bar", 10).unwrap(), GateState::Fired);
        assert_eq!(gate.waiting_on(), 0);
        assert_eq!(journal.entries(), ["foo=43 bar=10"]);
    }

    #[test]
    fn sets_after_firing_overwrite_but_never_refire() {
        let journal = Journal::new();
        let gate = journaling_gate(&journal);

        gate.set("foo", 42).unwrap();
        gate.set("bar", 10).unwrap();

        assert_eq!(gate.set("foo", 1).unwrap(), GateState::Fired);
        assert_eq!(gate.set("bar", 2).unwrap(), GateState::Fired);

        assert_eq!(journal.len(), 1);
        assert_eq!(gate.value(&"foo"), Some(1));
    }

    #[test]
    fn unknown_participant_is_rejected() {
        let journal = Journal::new();
        let gate = journaling_gate(&journal);

        assert_eq!(
            gate.set("baz", 1),
            Err(Error::UnknownParticipant {
                name: "\"baz\"".to_string()
            })
        );
        assert!(gate.setter("baz").is_err());
        assert_eq!(gate.waiting_on(), 2);
    }

    #[test]
    fn duplicate_participants_count_once() {
        let journal = Journal::new();
        let inner = journal.clone();
        let gate = Gate::new(["a", "a", "b"], move |values: &HashMap<&str, u8>| {
            inner.record(format!("{} values", values.len()));
        });

        gate.set("a", 1).unwrap();
        gate.set("b", 2).unwrap();

        assert_eq!(journal.entries(), ["2 values"]);
    }

    #[test]
    fn gate_without_participants_fires_immediately() {
        let journal = Journal::new();
        let inner = journal.clone();
        let gate = Gate::<&str, u8>::new([], move |_| inner.record("fired"));

        assert_eq!(gate.state(), GateState::Fired);
        assert_eq!(journal.entries(), ["fired"]);
    }

    #[test]
    fn reentrant_set_from_joint_action_is_discarded() {
        let journal = Journal::new();
        let slot: Rc<RefCell<Option<Gate<&str, i32>>>> = Rc::new(RefCell::new(None));

        let inner_slot = Rc::clone(&slot);
        let inner_journal = journal.clone();
        let gate = Gate::new(["only"], move |values: &HashMap<&str, i32>| {
            inner_journal.record(format!("fired with {}", values["only"]));

            if let Some(gate) = inner_slot.borrow().as_ref() {
                assert_eq!(gate.set("only", 99).unwrap(), GateState::Fired);
            }
        });
        *slot.borrow_mut() = Some(gate.clone());

        gate.set("only", 1).unwrap();

        assert_eq!(journal.entries(), ["fired with 1"]);
        assert_eq!(gate.value(&"only"), Some(1));

        slot.borrow_mut().take();
    }

    #[test]
    fn setters_wire_completions_arriving_on_different_turns() {
        let queue = TaskQueue::new();
        let journal = Journal::new();
        let gate = journaling_gate(&journal);

        let foo = gate.setter("foo").unwrap();
        let bar = gate.setter("bar").unwrap();

        queue.schedule_after(Duration::from_millis(20), move || foo(42));
        queue.schedule_after(Duration::from_millis(10), move || bar(10));

        assert!(queue.run_next_turn());
        assert_eq!(gate.state(), GateState::Waiting);

        queue.run_until_idle().unwrap();
        assert_eq!(journal.entries(), ["foo=42 bar=10"]);
    }
}
