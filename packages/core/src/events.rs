//! Event types for change notification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Job, JobId, JobProgress, StatusClass};

/// Events emitted by the queue after every state change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QueueEvent {
    // Queue events
    /// The queue was paused, by the user or after a connectivity failure.
    QueuePaused {
        reason: Option<String>,
        timestamp: DateTime<Utc>,
    },
    /// The queue was resumed.
    QueueResumed { timestamp: DateTime<Utc> },
    /// Jobs were restored from persistence at startup.
    QueueRestored {
        job_count: usize,
        reset_jobs: Vec<JobId>,
        timestamp: DateTime<Utc>,
    },
    /// Jobs were removed in bulk.
    JobsCleared {
        class: StatusClass,
        job_ids: Vec<JobId>,
        timestamp: DateTime<Utc>,
    },

    // Job events
    /// A new job was enqueued.
    JobEnqueued { job: Box<Job>, timestamp: DateTime<Utc> },
    /// The processor started a job.
    JobStarted {
        job_id: JobId,
        timestamp: DateTime<Utc>,
    },
    /// The current job reported progress.
    JobProgress {
        job_id: JobId,
        progress: JobProgress,
        timestamp: DateTime<Utc>,
    },
    /// A job completed with images.
    JobCompleted {
        job_id: JobId,
        image_count: usize,
        duration_ms: Option<i64>,
        timestamp: DateTime<Utc>,
    },
    /// A job failed.
    JobFailed {
        job_id: JobId,
        error: String,
        retry_count: u32,
        timestamp: DateTime<Utc>,
    },
    /// A job went back to pending after a connectivity failure.
    JobReset {
        job_id: JobId,
        timestamp: DateTime<Utc>,
    },
    /// A failed job was retried by the user.
    JobRetrying {
        job_id: JobId,
        attempt: u32,
        timestamp: DateTime<Utc>,
    },
    /// A job was cancelled.
    JobCancelled {
        job_id: JobId,
        was_running: bool,
        timestamp: DateTime<Utc>,
    },
    /// A job was removed from the queue.
    JobRemoved {
        job_id: JobId,
        timestamp: DateTime<Utc>,
    },
    /// A job moved to a new position.
    JobMoved {
        job_id: JobId,
        index: usize,
        timestamp: DateTime<Utc>,
    },
}

impl QueueEvent {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            QueueEvent::QueuePaused { timestamp, .. } => *timestamp,
            QueueEvent::QueueResumed { timestamp } => *timestamp,
            QueueEvent::QueueRestored { timestamp, .. } => *timestamp,
            QueueEvent::JobsCleared { timestamp, .. } => *timestamp,
            QueueEvent::JobEnqueued { timestamp, .. } => *timestamp,
            QueueEvent::JobStarted { timestamp, .. } => *timestamp,
            QueueEvent::JobProgress { timestamp, .. } => *timestamp,
            QueueEvent::JobCompleted { timestamp, .. } => *timestamp,
            QueueEvent::JobFailed { timestamp, .. } => *timestamp,
            QueueEvent::JobReset { timestamp, .. } => *timestamp,
            QueueEvent::JobRetrying { timestamp, .. } => *timestamp,
            QueueEvent::JobCancelled { timestamp, .. } => *timestamp,
            QueueEvent::JobRemoved { timestamp, .. } => *timestamp,
            QueueEvent::JobMoved { timestamp, .. } => *timestamp,
        }
    }

    /// Get the job ID associated with this event, if any.
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            QueueEvent::JobEnqueued { job, .. } => Some(job.id),
            QueueEvent::JobStarted { job_id, .. } => Some(*job_id),
            QueueEvent::JobProgress { job_id, .. } => Some(*job_id),
            QueueEvent::JobCompleted { job_id, .. } => Some(*job_id),
            QueueEvent::JobFailed { job_id, .. } => Some(*job_id),
            QueueEvent::JobReset { job_id, .. } => Some(*job_id),
            QueueEvent::JobRetrying { job_id, .. } => Some(*job_id),
            QueueEvent::JobCancelled { job_id, .. } => Some(*job_id),
            QueueEvent::JobRemoved { job_id, .. } => Some(*job_id),
            QueueEvent::JobMoved { job_id, .. } => Some(*job_id),
            _ => None,
        }
    }

    /// Get a short description of this event for logging.
    pub fn description(&self) -> String {
        match self {
            QueueEvent::QueuePaused { reason, .. } => match reason {
                Some(reason) => format!("Queue paused: {}", reason),
                None => "Queue paused".to_string(),
            },
            QueueEvent::QueueResumed { .. } => "Queue resumed".to_string(),
            QueueEvent::QueueRestored {
                job_count,
                reset_jobs,
                ..
            } => format!(
                "Queue restored with {} jobs ({} reset)",
                job_count,
                reset_jobs.len()
            ),
            QueueEvent::JobsCleared { class, job_ids, .. } => {
                format!("Cleared {} {:?} jobs", job_ids.len(), class)
            }
            QueueEvent::JobEnqueued { job, .. } => format!("Job {} enqueued", job.id),
            QueueEvent::JobStarted { job_id, .. } => format!("Job {} started", job_id),
            QueueEvent::JobProgress {
                job_id, progress, ..
            } => format!(
                "Job {} step {}/{}",
                job_id, progress.current_step, progress.total_steps
            ),
            QueueEvent::JobCompleted {
                job_id,
                image_count,
                ..
            } => format!("Job {} completed with {} images", job_id, image_count),
            QueueEvent::JobFailed { job_id, error, .. } => {
                format!("Job {} failed: {}", job_id, error)
            }
            QueueEvent::JobReset { job_id, .. } => format!("Job {} reset to pending", job_id),
            QueueEvent::JobRetrying {
                job_id, attempt, ..
            } => format!("Job {} retrying (attempt {})", job_id, attempt),
            QueueEvent::JobCancelled { job_id, .. } => format!("Job {} cancelled", job_id),
            QueueEvent::JobRemoved { job_id, .. } => format!("Job {} removed", job_id),
            QueueEvent::JobMoved { job_id, index, .. } => {
                format!("Job {} moved to position {}", job_id, index)
            }
        }
    }
}
