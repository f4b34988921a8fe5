#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Coordination primitives for callbacks that interleave on a single-threaded task queue.
//!
//! In a task-queue-driven program, independently issued operations never run in parallel, yet
//! their completions arrive in an order nobody controls. Each completion runs to completion as one
//! turn of the queue, so there are no data races, but there are plenty of ordering races. This
//! crate provides the small set of coordinators that turn those races into deterministic outcomes:
//!
//! - [`Gate`] invokes a joint action once every named participant has reported a value.
//! - [`Latch`] admits the first of several competing values and ignores the rest.
//! - [`Collector`] places results into slots chosen at issue time, so the collected order is the
//!   logical order rather than the completion order.
//! - [`process_in_chunks()`] splits large workloads into bounded chunks, one per turn, so a single
//!   job cannot starve every other pending task.
//!
//! Two wrappers harden callbacks handed to facilities that do not keep their promises:
//!
//! - [`TimeoutGuard`] delivers [`Error::TimedOut`] if the real completion does not arrive in time,
//!   and discards it if it arrives afterwards.
//! - [`AlwaysAsync`] defers a completion that was delivered synchronously to a later turn, so the
//!   code right after the issuing call always runs first.
//!
//! # Hosts
//!
//! The coordinators only need the [`Scheduler`] capability from their environment. The crate
//! ships [`TaskQueue`], a deterministic implementation with a virtual clock, and
//! [`SimulatedRequests`], a scripted [`Requester`]. Together they make any interleaving of
//! completions reproducible.
//!
//! # Example
//!
//! ```rust
//! use std::collections::HashMap;
//! use std::time::Duration;
//!
//! use turns::{Gate, Requester, SimulatedRequests, TaskQueue, success_only};
//!
//! let queue = TaskQueue::new();
//! let requests = SimulatedRequests::new(&queue);
//!
//! requests.respond_after("http://some.url.1", Duration::from_millis(30), 42);
//! requests.respond_after("http://some.url.2", Duration::from_millis(10), 10);
//!
//! let gate = Gate::new(["foo", "bar"], |values: &HashMap<&str, i32>| {
//!     println!("foo + bar = {}", values["foo"] + values["bar"]);
//! });
//!
//! let foo = gate.setter("foo").unwrap();
//! requests.request("http://some.url.1", success_only(foo));
//!
//! let bar = gate.setter("bar").unwrap();
//! requests.request("http://some.url.2", success_only(bar));
//!
//! queue.run_until_idle().unwrap();
//! ```
//!
//! # Thread safety
//!
//! Every type in this crate is single-threaded (`!Send` and `!Sync`). Coordinator state lives
//! behind `Rc` and is mutated through `Cell` and `RefCell` from within turns, which the
//! run-to-completion guarantee of the [`Scheduler`] makes sufficient.
//!
//! # Observability
//!
//! Coordinators log through `tracing` and record `nm` events such as `turns_tasks_executed`,
//! `turns_guard_timeouts` and `turns_late_deliveries_discarded`. Collect them with
//! `nm::Report::collect()`.

mod always_async;
mod chunks;
mod collector;
mod error;
mod gate;
mod latch;
mod metrics;
mod queue;
mod request;
mod scheduler;
mod simulated;
mod timeout_guard;

#[cfg(test)]
mod test_utils;

pub use always_async::*;
pub use chunks::*;
pub use collector::*;
pub use error::*;
pub use gate::*;
pub use latch::*;
pub use queue::*;
pub use request::*;
pub use scheduler::*;
pub use simulated::*;
pub use timeout_guard::*;
