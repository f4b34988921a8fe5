//! Example showing how a large workload is split into chunks so other tasks keep running.
//!
//! Two large responses arrive at the same time. Each is processed 1000 items per turn, so the two
//! jobs take turns instead of one running to completion before the other starts. Results are
//! collected in request order.

use std::num::NonZeroUsize;
use std::time::Duration;

use turns::{Collector, Requester, SimulatedRequests, TaskQueue, process_in_chunks, success_only};

const CHUNK_SIZE: NonZeroUsize = NonZeroUsize::new(1000).expect("1000 is not zero");

fn main() {
    let queue = TaskQueue::new();
    let requests = SimulatedRequests::new(&queue);

    let data: Vec<u64> = (1..=2500).collect();
    requests.respond_after("http://some.url.1", Duration::from_millis(10), data.clone());
    requests.respond_after("http://some.url.2", Duration::from_millis(10), data);

    let collector = Collector::with_completion(2, |results: Vec<Vec<u64>>| {
        for (index, doubled) in results.iter().enumerate() {
            println!(
                "response {index}: {} items, sum of doubled values {}",
                doubled.len(),
                doubled.iter().sum::<u64>()
            );
        }
    });

    for (index, url) in ["http://some.url.1", "http://some.url.2"]
        .into_iter()
        .enumerate()
    {
        let job_queue = queue.clone();
        let slot = collector.slot(index).expect("index is within the collector");

        requests.request(
            url,
            success_only(move |data: Vec<u64>| {
                println!("{url}: received {} items", data.len());

                process_in_chunks(
                    &job_queue,
                    data,
                    CHUNK_SIZE,
                    |n| n.saturating_mul(2),
                    slot,
                );
            }),
        );
    }

    let turns = queue.run_until_idle().expect("no turn limit is configured");
    println!("queue idle after {turns} turns");
}
