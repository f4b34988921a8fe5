//! Integration test for the metrics recorded by the task queue and the coordinators.
//!
//! This test is in a separate integration test binary to avoid polluting the global
//! report with observations made by other tests.

use std::cell::RefCell;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::rc::Rc;
use std::time::Duration;

use nm::{Magnitude, Report};
use turns::{Gate, Latch, Scheduler, TaskQueue, TimeoutGuard, process_in_chunks};

/// Returns the count and sum of the named event, or zeroes if it has not been observed yet.
fn observed(name: &str) -> (u64, Magnitude) {
    Report::collect()
        .events()
        .find(|e| e.name() == name)
        .map_or((0, 0), |e| (e.count(), e.sum()))
}

/// Returns how many more times the named event was observed than in `before`.
fn count_since(name: &str, before: (u64, Magnitude)) -> u64 {
    observed(name).0.saturating_sub(before.0)
}

#[test]
fn coordinators_record_their_events() {
    // Task execution and panics.
    let executed = observed("turns_tasks_executed");
    let panicked = observed("turns_tasks_panicked");

    let queue = TaskQueue::new();
    queue.enqueue(|| {});
    queue.enqueue(|| panic!("contained"));
    queue.enqueue(|| {});
    queue.run_until_idle().unwrap();

    assert_eq!(count_since("turns_tasks_executed", executed), 3);
    assert_eq!(count_since("turns_tasks_panicked", panicked), 1);

    // A delivered guard cancels its timer.
    let cancelled = observed("turns_timers_cancelled");

    let delivered = TimeoutGuard::new(&queue, Duration::from_millis(500), |_: turns::Result<()>| {});
    delivered.deliver(Ok(()));
    queue.run_until_idle().unwrap();

    assert_eq!(count_since("turns_timers_cancelled", cancelled), 1);

    // An expired guard counts a timeout and discards the late delivery.
    let timeouts = observed("turns_guard_timeouts");
    let discarded = observed("turns_late_deliveries_discarded");

    let expired = TimeoutGuard::new(&queue, Duration::from_millis(500), |_: turns::Result<()>| {});
    queue.run_until_idle().unwrap();
    expired.deliver(Ok(()));

    assert_eq!(count_since("turns_guard_timeouts", timeouts), 1);
    assert_eq!(count_since("turns_late_deliveries_discarded", discarded), 1);

    // A closed latch discards later attempts.
    let discarded = observed("turns_late_deliveries_discarded");

    let latch = Latch::new(|_: &u8| {});
    latch.attempt(1);
    latch.attempt(2);
    latch.attempt(3);

    assert_eq!(count_since("turns_late_deliveries_discarded", discarded), 2);

    // A gate discards a value set from within its own joint action.
    let discarded = observed("turns_late_deliveries_discarded");

    let slot: Rc<RefCell<Option<Gate<&str, u8>>>> = Rc::new(RefCell::new(None));
    let inner_slot = Rc::clone(&slot);
    let gate = Gate::new(["only"], move |_: &HashMap<&str, u8>| {
        if let Some(gate) = inner_slot.borrow().as_ref() {
            gate.set("only", 2).unwrap();
        }
    });
    *slot.borrow_mut() = Some(gate.clone());
    gate.set("only", 1).unwrap();
    slot.borrow_mut().take();

    assert_eq!(count_since("turns_late_deliveries_discarded", discarded), 1);

    // A chunked job records one observation per step, with the items processed as magnitude.
    let steps = observed("turns_chunk_steps");

    process_in_chunks(
        &queue,
        0..2500_u32,
        NonZeroUsize::new(1000).unwrap(),
        |n| n,
        |_| {},
    );
    queue.run_until_idle().unwrap();

    let (count, sum) = observed("turns_chunk_steps");
    assert_eq!(count.saturating_sub(steps.0), 3);
    assert_eq!(sum.saturating_sub(steps.1), 2500);

    assert!(
        Report::collect()
            .events()
            .find(|e| e.name() == "turns_chunk_steps")
            .is_some_and(|e| e.histogram().is_some())
    );
}
