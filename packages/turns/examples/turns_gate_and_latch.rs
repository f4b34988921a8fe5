//! Example showing how a gate and a latch make the outcome of two racing requests deterministic.
//!
//! Two requests are issued and their responses arrive in either order. Without coordination the
//! result depends on which arrives first. The gate waits for both, the latch takes whichever
//! arrives first and ignores the other.

use std::collections::HashMap;
use std::time::Duration;

use turns::{Gate, Latch, Requester, SimulatedRequests, TaskQueue, success_only};

fn main() {
    for (delay_1, delay_2) in [(10, 20), (20, 10)] {
        println!("url.1 responds after {delay_1} ms, url.2 after {delay_2} ms");

        let queue = TaskQueue::new();
        let requests = SimulatedRequests::new(&queue);

        requests.respond_after("http://some.url.1", Duration::from_millis(delay_1), 42);
        requests.respond_after("http://some.url.2", Duration::from_millis(delay_2), 10);

        let gate = Gate::new(["foo", "bar"], |values: &HashMap<&str, i32>| {
            let foo = values.get("foo").copied().unwrap_or_default();
            let bar = values.get("bar").copied().unwrap_or_default();
            println!("  gate fired: foo + bar = {}", foo.saturating_add(bar));
        });

        let latch = Latch::new(|value: &i32| println!("  latch admitted {value}"));

        for (url, name) in [("http://some.url.1", "foo"), ("http://some.url.2", "bar")] {
            let setter = gate.setter(name).expect("participant was declared above");
            let contender = latch.contender();

            requests.request(
                url,
                success_only(move |value: i32| {
                    setter(value);
                    contender(value);
                }),
            );
        }

        let turns = queue.run_until_idle().expect("no turn limit is configured");
        println!("  queue idle after {turns} turns");
    }
}
