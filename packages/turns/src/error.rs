use std::time::Duration;

use thiserror::Error;

/// Failures that the coordination primitives deliver to callers.
///
/// Nothing in this crate unwinds across a task-queue turn to report a failure. Every failure
/// travels through the normal callback channel as a value of this type, which is why it is
/// cheaply cloneable and comparable.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum Error {
    /// An expected completion did not arrive within the window allotted by a
    /// [`TimeoutGuard`][crate::TimeoutGuard].
    #[error("no completion arrived within {after:?}")]
    TimedOut {
        /// The window that elapsed without a completion.
        after: Duration,
    },

    /// A request facility reported that the operation failed.
    #[error("request to '{target}' failed: {reason}")]
    RequestFailed {
        /// The target the request was issued to.
        target: String,

        /// A human-readable description of the problem.
        reason: String,
    },

    /// A value was set on a [`Gate`][crate::Gate] for a name that was never declared as one of
    /// its participants.
    #[error("'{name}' is not a participant of this gate")]
    UnknownParticipant {
        /// Debug rendering of the offending name.
        name: String,
    },

    /// A [`Collector`][crate::Collector] slot index was outside `[0, len)`.
    #[error("slot {index} is out of range for a collector of {len} slots")]
    SlotOutOfRange {
        /// The index that was requested.
        index: usize,

        /// The number of slots in the collector.
        len: usize,
    },

    /// A [`TaskQueue`][crate::TaskQueue] did not become idle within its configured turn limit.
    #[error("task queue did not become idle within {limit} turns")]
    TurnLimitExceeded {
        /// The configured limit.
        limit: u64,
    },
}

/// A specialized `Result` type for coordination operations, returning the crate's
/// [`Error`] type as the error value by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Error: Send, Sync, Debug, Clone);

    #[test]
    fn timed_out_mentions_window() {
        let error = Error::TimedOut {
            after: Duration::from_millis(500),
        };

        assert!(error.to_string().contains("500ms"));
    }

    #[test]
    fn request_failed_mentions_target_and_reason() {
        let error = Error::RequestFailed {
            target: "http://some.url.1".to_string(),
            reason: "connection reset".to_string(),
        };

        let message = error.to_string();
        assert!(message.contains("http://some.url.1"));
        assert!(message.contains("connection reset"));
    }

    #[test]
    fn errors_compare_by_value() {
        let a = Error::SlotOutOfRange { index: 3, len: 2 };
        let b = a.clone();

        assert_eq!(a, b);
        assert_ne!(a, Error::SlotOutOfRange { index: 2, len: 2 });
    }
}
