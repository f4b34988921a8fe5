//! Metrics for the task queue and the coordinators that run on it.
//!
//! Every event is thread-local, matching the single-threaded nature of the coordinators.

use nm::{Event, Magnitude};

/// Histogram buckets for the number of items processed by one chunk step.
///
/// Chunk sizes are chosen by callers, typically somewhere between tens and a few thousand items.
const CHUNK_STEP_ITEMS_BUCKETS: &[Magnitude] = &[0, 1, 10, 100, 500, 1000, 5000, 10000];

thread_local! {
    /// A task was dequeued and run to completion.
    pub(crate) static TASKS_EXECUTED: Event = Event::builder()
        .name("turns_tasks_executed")
        .build();

    /// A task panicked and the panic was contained at the turn boundary.
    pub(crate) static TASKS_PANICKED: Event = Event::builder()
        .name("turns_tasks_panicked")
        .build();

    /// A scheduled task was cancelled before it ran.
    pub(crate) static TIMERS_CANCELLED: Event = Event::builder()
        .name("turns_timers_cancelled")
        .build();

    /// A timeout guard expired before its guarded completion arrived.
    pub(crate) static GUARD_TIMEOUTS: Event = Event::builder()
        .name("turns_guard_timeouts")
        .build();

    /// A completion arrived after its coordinator had already reached a terminal state
    /// and was discarded.
    pub(crate) static LATE_DELIVERIES_DISCARDED: Event = Event::builder()
        .name("turns_late_deliveries_discarded")
        .build();

    /// One step of a chunked job was processed.
    ///
    /// The magnitude is the number of items processed in the step.
    pub(crate) static CHUNK_STEPS: Event = Event::builder()
        .name("turns_chunk_steps")
        .histogram(CHUNK_STEP_ITEMS_BUCKETS)
        .build();
}

/// Records that a completion was discarded because its coordinator is in a terminal state.
pub(crate) fn record_discarded() {
    LATE_DELIVERIES_DISCARDED.with(Event::observe_once);
}
