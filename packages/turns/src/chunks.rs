//! Cooperative processing of large inputs, one bounded chunk per task-queue turn.

use std::num::NonZeroUsize;
use std::vec;

use tracing::{debug, trace};

use crate::Scheduler;
use crate::metrics::CHUNK_STEPS;

/// Transforms every item of `input` with `transform`, yielding the task queue between chunks of
/// at most `chunk_size` items, and passes the outputs to `on_done` in input order.
///
/// A turn that processes an unbounded amount of data keeps every other pending task waiting.
/// This function instead processes one chunk, then schedules the rest of the job as a new task
/// and returns, so unrelated tasks that became ready in the meantime get to run in between.
///
/// The first chunk is processed within the calling turn. Each further chunk runs on its own turn,
/// so a job of `n` items takes `ceil(n / chunk_size)` steps in total. An empty input still takes
/// one step, which invokes `on_done` with an empty vector before this function returns.
///
/// Several jobs may be in progress at the same time. Their chunks interleave on the queue but
/// each job sees its own items strictly in order.
///
/// # Example
///
/// ```rust
/// use std::cell::RefCell;
/// use std::num::NonZeroUsize;
/// use std::rc::Rc;
///
/// use turns::{TaskQueue, process_in_chunks};
///
/// let queue = TaskQueue::new();
/// let result = Rc::new(RefCell::new(None));
///
/// let sink = Rc::clone(&result);
/// process_in_chunks(
///     &queue,
///     1..=2500_u32,
///     NonZeroUsize::new(1000).unwrap(),
///     |n| n * 2,
///     move |doubled| *sink.borrow_mut() = Some(doubled),
/// );
///
/// // The first chunk ran in this call, the other two need one turn each.
/// assert_eq!(queue.run_until_idle().unwrap(), 2);
///
/// let doubled = result.borrow_mut().take().unwrap();
/// assert_eq!(doubled.len(), 2500);
/// assert_eq!(doubled.last(), Some(&5000));
/// ```
pub fn process_in_chunks<S, I, O, F, D>(
    scheduler: &S,
    input: I,
    chunk_size: NonZeroUsize,
    transform: F,
    on_done: D,
) where
    S: Scheduler + Clone + 'static,
    I: IntoIterator,
    I::Item: 'static,
    O: 'static,
    F: FnMut(I::Item) -> O + 'static,
    D: FnOnce(Vec<O>) + 'static,
{
    let remaining: Vec<I::Item> = input.into_iter().collect();

    debug!(
        items = remaining.len(),
        chunk_size = chunk_size.get(),
        "starting chunked job"
    );

    let job = ChunkJob {
        scheduler: scheduler.clone(),
        output: Vec::with_capacity(remaining.len()),
        remaining: remaining.into_iter(),
        chunk_size,
        transform,
        on_done,
    };

    job.step();
}

struct ChunkJob<S, T, O, F, D> {
    scheduler: S,
    remaining: vec::IntoIter<T>,
    output: Vec<O>,
    chunk_size: NonZeroUsize,
    transform: F,
    on_done: D,
}

impl<S, T, O, F, D> ChunkJob<S, T, O, F, D>
where
    S: Scheduler + Clone + 'static,
    T: 'static,
    O: 'static,
    F: FnMut(T) -> O + 'static,
    D: FnOnce(Vec<O>) + 'static,
{
    fn step(mut self) {
        let before = self.output.len();

        self.output.extend(
            self.remaining
                .by_ref()
                .take(self.chunk_size.get())
                .map(&mut self.transform),
        );

        let processed = self.output.len().saturating_sub(before);
        CHUNK_STEPS.with(|event| event.observe(processed));

        if self.remaining.as_slice().is_empty() {
            debug!(items = self.output.len(), "chunked job complete");
            (self.on_done)(self.output);
            return;
        }

        trace!(
            processed,
            remaining = self.remaining.len(),
            "yielding between chunks"
        );

        // Continue on a fresh turn so that other ready tasks can run in between.
        let scheduler = self.scheduler.clone();
        scheduler.enqueue(move || self.step());
    }
}
