//! Job domain types and the job state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::config::GenerationConfig;
use crate::error::TransitionError;

/// Number of manual retries a failed job gets.
pub const MAX_RETRIES: u32 = 3;

/// Failure message for a generation that finished without images.
pub const EMPTY_RESULT_MESSAGE: &str = "No images returned from generation";

/// Unique identifier for a job, using ULID for chronological sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Ulid);

impl JobId {
    /// Create a new unique job ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse a job ID from a string.
    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for the processor.
    #[default]
    Pending,
    /// Currently being generated.
    Processing,
    /// Finished with at least one image.
    Completed,
    /// Finished with an error.
    Failed,
    /// Cancelled by the user.
    Cancelled,
}

impl JobStatus {
    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(format!("unknown job status '{other}'")),
        }
    }
}

/// An auxiliary guidance image (depth map, pose, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hint {
    /// Hint type, e.g. `"depth"` or `"pose"`.
    pub hint_type: String,
    /// Encoded image bytes.
    pub image: Vec<u8>,
    pub weight: f32,
}

impl Hint {
    pub fn new(hint_type: impl Into<String>, image: Vec<u8>, weight: f32) -> Self {
        Self {
            hint_type: hint_type.into(),
            image,
            weight,
        }
    }
}

/// Progress of the job being generated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    pub current_step: u32,
    pub total_steps: u32,
    /// Server-reported stage, e.g. `"sampling"`.
    pub stage: String,
    /// PNG of the latest decoded preview.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<Vec<u8>>,
}

impl JobProgress {
    /// Completion ratio in `[0, 1]`.
    pub fn fraction(&self) -> f32 {
        if self.total_steps == 0 {
            0.0
        } else {
            (self.current_step as f32 / self.total_steps as f32).min(1.0)
        }
    }
}

/// A progress report from the processor, before preview decoding.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressUpdate {
    pub current_step: u32,
    pub total_steps: u32,
    pub stage: String,
    /// Raw preview tensor as received from the server.
    pub preview_tensor: Option<Vec<u8>>,
}

/// One image-generation request and its lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier for this job.
    pub id: JobId,
    pub prompt: String,
    #[serde(default)]
    pub negative_prompt: String,
    /// Opaque generation parameters.
    pub configuration: GenerationConfig,
    /// Encoded source image for img2img / inpainting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canvas: Option<Vec<u8>>,
    /// Encoded inpainting mask.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hints: Vec<Hint>,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<JobProgress>,
    /// PNG-encoded result images, in the order the server produced them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<Vec<u8>>,
    /// Last failure reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Number of manual retries so far.
    #[serde(default)]
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a new pending job.
    pub fn new(prompt: impl Into<String>, configuration: GenerationConfig) -> Self {
        Self {
            id: JobId::new(),
            prompt: prompt.into(),
            negative_prompt: String::new(),
            configuration,
            canvas: None,
            mask: None,
            hints: Vec::new(),
            status: JobStatus::Pending,
            progress: None,
            results: Vec::new(),
            error_message: None,
            retry_count: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_negative_prompt(mut self, negative_prompt: impl Into<String>) -> Self {
        self.negative_prompt = negative_prompt.into();
        self
    }

    pub fn with_canvas(mut self, canvas: Vec<u8>) -> Self {
        self.canvas = Some(canvas);
        self
    }

    pub fn with_mask(mut self, mask: Vec<u8>) -> Self {
        self.mask = Some(mask);
        self
    }

    pub fn with_hint(mut self, hint: Hint) -> Self {
        self.hints.push(hint);
        self
    }

    /// Whether a manual retry is currently allowed.
    pub fn can_retry(&self) -> bool {
        self.status == JobStatus::Failed && self.retry_count < MAX_RETRIES
    }

    /// Wall-clock generation time, once the job has finished.
    pub fn duration_ms(&self) -> Option<i64> {
        Some((self.completed_at? - self.started_at?).num_milliseconds())
    }

    fn expect_status(
        &self,
        allowed: &[JobStatus],
        action: &'static str,
    ) -> Result<(), TransitionError> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(TransitionError::InvalidState {
                job_id: self.id,
                from: self.status,
                action,
            })
        }
    }

    fn finish(&mut self, status: JobStatus) {
        self.status = status;
        self.progress = None;
        self.completed_at = Some(Utc::now());
    }

    /// `pending -> processing`.
    pub fn start(&mut self) -> Result<(), TransitionError> {
        self.expect_status(&[JobStatus::Pending], "start")?;
        self.status = JobStatus::Processing;
        self.progress = None;
        self.started_at = Some(Utc::now());
        self.completed_at = None;
        Ok(())
    }

    /// Replace the progress of a processing job.
    pub fn set_progress(&mut self, progress: JobProgress) -> Result<(), TransitionError> {
        self.expect_status(&[JobStatus::Processing], "update progress of")?;
        self.progress = Some(progress);
        Ok(())
    }

    /// `processing -> completed`, or `processing -> failed` when `results` is empty.
    ///
    /// Returns the status the job ended in.
    pub fn complete(&mut self, results: Vec<Vec<u8>>) -> Result<JobStatus, TransitionError> {
        self.expect_status(&[JobStatus::Processing], "complete")?;
        if results.is_empty() {
            self.error_message = Some(EMPTY_RESULT_MESSAGE.to_string());
            self.finish(JobStatus::Failed);
        } else {
            self.results = results;
            self.error_message = None;
            self.finish(JobStatus::Completed);
        }
        Ok(self.status)
    }

    /// `processing -> failed`.
    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), TransitionError> {
        self.expect_status(&[JobStatus::Processing], "fail")?;
        self.error_message = Some(message.into());
        self.finish(JobStatus::Failed);
        Ok(())
    }

    /// `processing -> pending` after a connectivity failure. Does not count as a retry.
    pub fn reset_to_pending(&mut self) -> Result<(), TransitionError> {
        self.expect_status(&[JobStatus::Processing], "reset")?;
        self.status = JobStatus::Pending;
        self.progress = None;
        self.started_at = None;
        self.completed_at = None;
        Ok(())
    }

    /// `failed -> pending`, at most [`MAX_RETRIES`] times.
    pub fn retry(&mut self) -> Result<(), TransitionError> {
        self.expect_status(&[JobStatus::Failed], "retry")?;
        if self.retry_count >= MAX_RETRIES {
            return Err(TransitionError::RetryLimitReached {
                job_id: self.id,
                max: MAX_RETRIES,
            });
        }
        self.retry_count += 1;
        self.status = JobStatus::Pending;
        self.error_message = None;
        self.progress = None;
        self.started_at = None;
        self.completed_at = None;
        Ok(())
    }

    /// `pending | processing -> cancelled`.
    pub fn cancel(&mut self) -> Result<(), TransitionError> {
        self.expect_status(&[JobStatus::Pending, JobStatus::Processing], "cancel")?;
        self.finish(JobStatus::Cancelled);
        Ok(())
    }
}
