//! The interface of an external facility that issues requests and later reports their outcome.

use tracing::warn;

use crate::{Error, Result};

/// An external facility that issues an operation against a target and reports the outcome on a
/// later task-queue turn.
///
/// The completion receives `Ok` with the operation output or `Err` with the failure, covering both
/// the success and failure callbacks of a split-callback API. Use [`split()`] or
/// [`success_only()`] to build a completion from separate callbacks.
///
/// Implementations are expected to invoke the completion at most once and never before `request`
/// returns. A facility that cannot promise this can be hardened by routing its completions
/// through [`AlwaysAsync`][crate::AlwaysAsync], [`TimeoutGuard`][crate::TimeoutGuard] or
/// [`Latch`][crate::Latch].
pub trait Requester {
    /// The value produced by a successful operation.
    type Output;

    /// Issues an operation against `target`, to be reported to `completion`.
    fn request<C>(&self, target: &str, completion: C)
    where
        C: FnOnce(Result<Self::Output>) + 'static;
}

/// Builds a completion that routes success to `on_success` and failure to `on_failure`.
///
/// # Example
///
/// ```rust
/// use turns::{Error, split};
///
/// let completion = split(
///     |data: String| println!("received {data}"),
///     |error: Error| eprintln!("failed: {error}"),
/// );
///
/// completion(Ok("hello".to_string()));
/// ```
#[must_use]
pub fn split<T, S, F>(on_success: S, on_failure: F) -> impl FnOnce(Result<T>) + 'static
where
    T: 'static,
    S: FnOnce(T) + 'static,
    F: FnOnce(Error) + 'static,
{
    move |result| match result {
        Ok(value) => on_success(value),
        Err(error) => on_failure(error),
    }
}

/// Builds a completion that routes success to `on_success` and logs failures.
///
/// Failures are reported via `tracing::warn!` and otherwise dropped.
#[must_use]
pub fn success_only<T, S>(on_success: S) -> impl FnOnce(Result<T>) + 'static
where
    T: 'static,
    S: FnOnce(T) + 'static,
{
    split(on_success, |error| {
        warn!(%error, "request failed and no failure callback was provided");
    })
}
