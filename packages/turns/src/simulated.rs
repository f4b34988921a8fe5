//! A scripted request facility for exercising coordinators against reproducible completion orders.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use tracing::trace;

use crate::{Error, Requester, Result, Scheduler, TaskQueue};

/// How the simulated facility answers requests for one target.
#[derive(Clone, Debug)]
enum Script<T> {
    RespondAfter(Duration, T),
    FailAfter(Duration, String),
    RespondImmediately(T),
    NeverRespond,
}

/// A [`Requester`] that answers each target the way a test scripted it, on a [`TaskQueue`].
///
/// Every target is scripted independently and the script applies to every request for that
/// target until it is replaced. Requests for targets without a script fail with
/// [`Error::RequestFailed`] on the next turn.
///
/// Besides well-behaved responses, the facility can deliberately break the [`Requester`]
/// contract, which is what the hardening wrappers exist for:
///
/// * [`respond_immediately()`][Self::respond_immediately] invokes the completion before
///   `request()` returns.
/// * [`never_respond()`][Self::never_respond] drops the completion without ever invoking it.
///
/// The facility is a cheaply cloneable handle; all clones share the same scripts.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
///
/// use turns::{Requester, SimulatedRequests, TaskQueue};
///
/// let queue = TaskQueue::new();
/// let requests = SimulatedRequests::new(&queue);
///
/// requests.respond_after("http://some.url.1", Duration::from_millis(30), "hello");
///
/// requests.request("http://some.url.1", |result| {
///     assert_eq!(result, Ok("hello"));
/// });
///
/// queue.run_until_idle().unwrap();
/// assert_eq!(requests.requests_issued(), 1);
/// ```
pub struct SimulatedRequests<T> {
    inner: Rc<SimulatedInner<T>>,
}

struct SimulatedInner<T> {
    queue: TaskQueue,
    scripts: RefCell<HashMap<String, Script<T>>>,
    issued: Cell<u64>,
}

impl<T> SimulatedRequests<T>
where
    T: Clone + 'static,
{
    /// Creates a facility with no scripted targets that delivers its completions on `queue`.
    #[must_use]
    pub fn new(queue: &TaskQueue) -> Self {
        Self {
            inner: Rc::new(SimulatedInner {
                queue: queue.clone(),
                scripts: RefCell::new(HashMap::new()),
                issued: Cell::new(0),
            }),
        }
    }

    /// Answers requests for `target` with `value`, `delay` after each request is issued.
    pub fn respond_after(&self, target: impl Into<String>, delay: Duration, value: T) {
        self.script(target, Script::RespondAfter(delay, value));
    }

    /// Fails requests for `target` with `reason`, `delay` after each request is issued.
    pub fn fail_after(
        &self,
        target: impl Into<String>,
        delay: Duration,
        reason: impl Into<String>,
    ) {
        self.script(target, Script::FailAfter(delay, reason.into()));
    }

    /// Answers requests for `target` with `value` synchronously, from within `request()`.
    pub fn respond_immediately(&self, target: impl Into<String>, value: T) {
        self.script(target, Script::RespondImmediately(value));
    }

    /// Never answers requests for `target`. Completions are dropped without being invoked.
    pub fn never_respond(&self, target: impl Into<String>) {
        self.script(target, Script::NeverRespond);
    }

    /// The number of requests issued so far, for any target.
    #[must_use]
    pub fn requests_issued(&self) -> u64 {
        self.inner.issued.get()
    }

    fn script(&self, target: impl Into<String>, script: Script<T>) {
        self.inner.scripts.borrow_mut().insert(target.into(), script);
    }
}

impl<T> Requester for SimulatedRequests<T>
where
    T: Clone + 'static,
{
    type Output = T;

    fn request<C>(&self, target: &str, completion: C)
    where
        C: FnOnce(Result<T>) + 'static,
    {
        self.inner
            .issued
            .set(self.inner.issued.get().saturating_add(1));

        // The borrow must end before the completion runs, as it may issue further requests.
        let script = self.inner.scripts.borrow().get(target).cloned();

        trace!(
            request_target = target,
            scripted = script.is_some(),
            "simulated request issued"
        );

        match script {
            Some(Script::RespondAfter(delay, value)) => {
                self.inner
                    .queue
                    .schedule_after(delay, move || completion(Ok(value)));
            }
            Some(Script::FailAfter(delay, reason)) => {
                let target = target.to_string();
                self.inner.queue.schedule_after(delay, move || {
                    completion(Err(Error::RequestFailed { target, reason }));
                });
            }
            Some(Script::RespondImmediately(value)) => completion(Ok(value)),
            Some(Script::NeverRespond) => drop(completion),
            None => {
                let target = target.to_string();
                self.inner.queue.enqueue(move || {
                    completion(Err(Error::RequestFailed {
                        target,
                        reason: "no response scripted for this target".to_string(),
                    }));
                });
            }
        }
    }
}

impl<T> Clone for SimulatedRequests<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for SimulatedRequests<T> {
    #[cfg_attr(test, mutants::skip)] // No API contract for debug output.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulatedRequests")
            .field("scripted_targets", &self.inner.scripts.borrow().len())
            .field("issued", &self.inner.issued.get())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use static_assertions::assert_not_impl_any;

    use super::*;
    use crate::test_utils::Journal;

    assert_not_impl_any!(SimulatedRequests<i32>: Send, Sync);

    fn journaling_completion(
        queue: &TaskQueue,
        journal: &Journal,
    ) -> impl FnOnce(Result<&'static str>) + 'static {
        let journal = journal.clone();
        let clock = queue.clone();
        move |result| journal.record(format!("{result:?}@{:?}", clock.now()))
    }

    #[test]
    fn scripted_response_arrives_after_its_delay() {
        let queue = TaskQueue::new();
        let journal = Journal::new();
        let requests = SimulatedRequests::new(&queue);

        requests.respond_after("a", Duration::from_millis(40), "slow");
        requests.respond_after("b", Duration::from_millis(10), "fast");

        requests.request("a", journaling_completion(&queue, &journal));
        requests.request("b", journaling_completion(&queue, &journal));

        assert_eq!(journal.len(), 0);

        queue.run_until_idle().unwrap();

        assert_eq!(
            journal.entries(),
            ["Ok(\"fast\")@10ms", "Ok(\"slow\")@40ms"]
        );
        assert_eq!(requests.requests_issued(), 2);
    }

    #[test]
    fn scripted_failure_names_the_target() {
        let queue = TaskQueue::new();
        let journal = Journal::new();
        let requests = SimulatedRequests::<&str>::new(&queue);

        requests.fail_after("a", Duration::from_millis(5), "refused");
        requests.request("a", journaling_completion(&queue, &journal));

        queue.run_until_idle().unwrap();

        assert_eq!(
            journal.entries(),
            ["Err(RequestFailed { target: \"a\", reason: \"refused\" })@5ms"]
        );
    }

    #[test]
    fn immediate_response_runs_inside_request() {
        let queue = TaskQueue::new();
        let journal = Journal::new();
        let requests = SimulatedRequests::new(&queue);

        requests.respond_immediately("a", "now");
        requests.request("a", journaling_completion(&queue, &journal));

        assert_eq!(journal.entries(), ["Ok(\"now\")@0ns"]);
        assert!(queue.is_idle());
    }

    #[test]
    fn never_respond_drops_the_completion() {
        let queue = TaskQueue::new();
        let journal = Journal::new();
        let requests = SimulatedRequests::new(&queue);

        requests.never_respond("a");
        requests.request("a", journaling_completion(&queue, &journal));

        queue.run_until_idle().unwrap();

        assert_eq!(journal.len(), 0);
        assert_eq!(requests.requests_issued(), 1);
    }

    #[test]
    fn unscripted_target_fails_on_the_next_turn() {
        let queue = TaskQueue::new();
        let journal = Journal::new();
        let requests = SimulatedRequests::<&str>::new(&queue);

        requests.request("nowhere", journaling_completion(&queue, &journal));
        assert_eq!(journal.len(), 0);

        assert!(queue.run_next_turn());

        let entries = journal.entries();
        assert_eq!(entries.len(), 1);
        assert!(entries.first().unwrap().contains("nowhere"));
    }

    #[test]
    fn replacing_a_script_affects_later_requests_only() {
        let queue = TaskQueue::new();
        let journal = Journal::new();
        let requests = SimulatedRequests::new(&queue);

        requests.respond_after("a", Duration::from_millis(10), "old");
        requests.request("a", journaling_completion(&queue, &journal));

        requests.respond_immediately("a", "new");
        requests.request("a", journaling_completion(&queue, &journal));

        queue.run_until_idle().unwrap();

        assert_eq!(journal.entries(), ["Ok(\"new\")@0ns", "Ok(\"old\")@10ms"]);
    }
}
