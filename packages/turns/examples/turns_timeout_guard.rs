//! Example showing how callbacks are hardened against facilities that misbehave.
//!
//! A `TimeoutGuard` turns a slow or missing response into a timeout error. An `AlwaysAsync`
//! wrapper makes a response that arrives synchronously behave like an asynchronous one.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use nm::Report;
use turns::{AlwaysAsync, Requester, Result, SimulatedRequests, TaskQueue, TimeoutGuard};

const TIMEOUT: Duration = Duration::from_millis(500);

fn main() {
    let queue = TaskQueue::new();
    let requests = SimulatedRequests::new(&queue);

    requests.respond_after("http://fast.url", Duration::from_millis(100), "fast data");
    requests.respond_after("http://slow.url", Duration::from_millis(800), "slow data");
    requests.never_respond("http://silent.url");
    requests.respond_immediately("http://cached.url", "cached data");

    for url in ["http://fast.url", "http://slow.url", "http://silent.url"] {
        let clock = queue.clone();
        let guard = TimeoutGuard::new(&queue, TIMEOUT, move |result: Result<&str>| {
            println!("{url} at {:?}: {result:?}", clock.now());
        });

        requests.request(url, guard.callback());
    }

    let counter = Rc::new(Cell::new(0_u32));

    let observed = Rc::clone(&counter);
    let wrapper = AlwaysAsync::new(&queue, move |result: Result<&str>| {
        println!(
            "http://cached.url: {result:?}, counter was already {}",
            observed.get()
        );
    });

    requests.request("http://cached.url", wrapper.callback());

    // Runs before the callback even though the response was delivered synchronously.
    counter.set(counter.get().saturating_add(1));

    queue.run_until_idle().expect("no turn limit is configured");

    let report = Report::collect();
    println!("{report}");
}
