//! Queue read models.

use serde::{Deserialize, Serialize};

use crate::{Job, JobId, JobStatus};

/// Point-in-time copy of the queue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    /// Jobs in queue order.
    pub jobs: Vec<Job>,
    pub paused: bool,
    /// Reason for the last connectivity pause.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// The job the processor is working on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_job: Option<JobId>,
}

impl QueueSnapshot {
    pub fn get(&self, job_id: JobId) -> Option<&Job> {
        self.jobs.iter().find(|j| j.id == job_id)
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats::from_jobs(&self.jobs)
    }
}

/// Job counts per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueStats {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
}

impl QueueStats {
    pub fn from_jobs<'a>(jobs: impl IntoIterator<Item = &'a Job>) -> Self {
        let mut stats = Self::default();
        for job in jobs {
            match job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Processing => stats.processing += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    /// Jobs still waiting or running.
    pub fn active(&self) -> u64 {
        self.pending + self.processing
    }

    /// Jobs that reached a terminal state.
    pub fn finished(&self) -> u64 {
        self.completed + self.failed + self.cancelled
    }
}

/// Status class for bulk clearing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusClass {
    Pending,
    Completed,
    Failed,
    Cancelled,
    /// Completed, failed and cancelled.
    Finished,
}

impl StatusClass {
    pub fn matches(self, status: JobStatus) -> bool {
        match self {
            StatusClass::Pending => status == JobStatus::Pending,
            StatusClass::Completed => status == JobStatus::Completed,
            StatusClass::Failed => status == JobStatus::Failed,
            StatusClass::Cancelled => status == JobStatus::Cancelled,
            StatusClass::Finished => status.is_terminal(),
        }
    }
}
