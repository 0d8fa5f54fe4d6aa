//! Message types for actor communication.

use gen_core::{
    Job, JobId, JobStatus, ProgressUpdate, QueueSnapshot, QueueStats, StatusClass, TransitionError,
};
use ractor::RpcReplyPort;
use tokio_util::sync::CancellationToken;

/// Reply port for queue operations that can be rejected.
pub type QueueReply<T> = RpcReplyPort<Result<T, QueueError>>;

/// Messages for the QueueActor.
#[derive(Debug)]
pub enum QueueMessage {
    /// Append a new pending job. Negative or missing seeds are replaced.
    Enqueue {
        job: Box<Job>,
        reply: QueueReply<Job>,
    },

    /// Mark a pending job as the current job. `cancel` fires when the job
    /// is cancelled while running.
    Start {
        job_id: JobId,
        cancel: CancellationToken,
        reply: QueueReply<Job>,
    },

    /// Replace the progress of the current job. A preview tensor is decoded
    /// to PNG before it is stored.
    UpdateProgress {
        job_id: JobId,
        update: ProgressUpdate,
        reply: QueueReply<()>,
    },

    /// Finish the current job with result images (PNG).
    Complete {
        job_id: JobId,
        results: Vec<Vec<u8>>,
        reply: QueueReply<JobStatus>,
    },

    /// Fail the current job.
    Fail {
        job_id: JobId,
        message: String,
        reply: QueueReply<()>,
    },

    /// Put the current job back to pending after a connectivity failure.
    ResetToPending {
        job_id: JobId,
        reply: QueueReply<()>,
    },

    /// Retry a failed job.
    Retry {
        job_id: JobId,
        reply: QueueReply<Job>,
    },

    /// Cancel a pending or processing job.
    Cancel {
        job_id: JobId,
        reply: QueueReply<()>,
    },

    /// Remove a job that is not being processed.
    Remove {
        job_id: JobId,
        reply: QueueReply<Job>,
    },

    /// Move a job to a new position, clamped to the queue length.
    Move {
        job_id: JobId,
        index: usize,
        reply: QueueReply<()>,
    },

    /// Remove every job of a status class, except the current job.
    Clear {
        class: StatusClass,
        reply: RpcReplyPort<Vec<JobId>>,
    },

    /// Pause the queue. A reason is recorded as the last error.
    Pause { reason: Option<String> },

    /// Resume the queue and clear the last error.
    Resume,

    /// Get a job by ID.
    GetJob {
        job_id: JobId,
        reply: RpcReplyPort<Option<Job>>,
    },

    /// List jobs in queue order.
    ListJobs {
        status_filter: Option<JobStatus>,
        reply: RpcReplyPort<Vec<Job>>,
    },

    /// Job counts per status.
    GetStats { reply: RpcReplyPort<QueueStats> },

    /// First pending job in queue order.
    NextPending { reply: RpcReplyPort<Option<JobId>> },

    /// Whether the queue is paused.
    IsPaused { reply: RpcReplyPort<bool> },

    /// Copy of the whole queue.
    Snapshot { reply: RpcReplyPort<QueueSnapshot> },

    /// Shutdown the queue gracefully.
    Shutdown,
}

/// Messages for the ProcessorActor.
#[derive(Debug)]
pub enum ProcessorMessage {
    /// Poll the queue. Stale polls from an earlier run carry an old epoch
    /// and are ignored.
    Poll { epoch: u64 },

    /// Start polling. Forgets which jobs were already attempted.
    Start,

    /// Stop polling after the job in flight.
    Stop,

    /// Whether the processor is polling.
    IsRunning { reply: RpcReplyPort<bool> },

    /// Shutdown the processor.
    Shutdown,
}

/// Error type for queue operations.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Job already queued: {0}")]
    DuplicateJob(JobId),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("Job {0} is being processed")]
    JobIsCurrent(JobId),

    #[error("Job {0} is not the current job")]
    NotCurrent(JobId),

    #[error("Job {current} is already processing")]
    AnotherJobProcessing { current: JobId },

    #[error("Actor error: {0}")]
    Actor(String),
}
