//! Core domain types for the generation queue.
//!
//! This crate contains the types shared by the queue actors and the CLI:
//! - Job, JobStatus and the job state machine
//! - GenerationConfig, the opaque parameter blob (seed handling only)
//! - Queue read models (snapshot, stats, status classes)
//! - Events for change notification
//! - Error classification for generation failures

mod config;
mod error;
mod events;
mod job;
mod queue;

pub use config::GenerationConfig;
pub use error::{ErrorClass, TransitionError, classify_error, is_connectivity_error};
pub use events::QueueEvent;
pub use job::{
    EMPTY_RESULT_MESSAGE, Hint, Job, JobId, JobProgress, JobStatus, MAX_RETRIES, ProgressUpdate,
};
pub use queue::{QueueSnapshot, QueueStats, StatusClass};
