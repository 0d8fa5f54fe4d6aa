//! Error types and failure classification.

use thiserror::Error;

use crate::{JobId, JobStatus};

/// Substrings that mark a generation failure as a connectivity problem.
const CONNECTIVITY_MARKERS: [&str; 6] = [
    "connection",
    "network",
    "unavailable",
    "timeout",
    "refused",
    "reset",
];

/// How a generation failure should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient transport failure: pause the queue and put the job back.
    Connectivity,
    /// Server-side failure: the job fails and waits for a manual retry.
    Generation,
}

/// Classify a failure by its message.
pub fn classify_error(message: &str) -> ErrorClass {
    if is_connectivity_error(message) {
        ErrorClass::Connectivity
    } else {
        ErrorClass::Generation
    }
}

/// Whether a failure message looks network related.
pub fn is_connectivity_error(message: &str) -> bool {
    let message = message.to_lowercase();
    CONNECTIVITY_MARKERS
        .iter()
        .any(|marker| message.contains(marker))
}

/// A rejected job state transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("cannot {action} job {job_id} while it is {from}")]
    InvalidState {
        job_id: JobId,
        from: JobStatus,
        action: &'static str,
    },

    #[error("job {job_id} has already been retried {max} times")]
    RetryLimitReached { job_id: JobId, max: u32 },
}
