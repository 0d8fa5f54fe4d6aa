//! Queue actor owning the job list.

use std::sync::Arc;

use chrono::Utc;
use gen_core::{
    Job, JobId, JobProgress, JobStatus, ProgressUpdate, QueueEvent, QueueSnapshot, QueueStats,
    StatusClass,
};
use ractor::{Actor, ActorProcessingErr, ActorRef};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::messages::{QueueError, QueueMessage};
use crate::persistence::JobStore;

/// The job the processor is working on.
struct CurrentJob {
    id: JobId,
    cancel: CancellationToken,
}

/// State for the queue actor.
pub struct QueueActorState {
    /// Jobs in queue order.
    jobs: Vec<Job>,
    paused: bool,
    /// Reason for the last connectivity pause.
    last_error: Option<String>,
    current: Option<CurrentJob>,
    /// Event broadcaster.
    event_tx: broadcast::Sender<QueueEvent>,
    store: Option<Arc<dyn JobStore>>,
}

impl QueueActorState {
    /// Create a new, empty queue state.
    pub fn new(event_tx: broadcast::Sender<QueueEvent>) -> Self {
        Self {
            jobs: Vec::new(),
            paused: false,
            last_error: None,
            current: None,
            event_tx,
            store: None,
        }
    }

    /// Load from and save to `store`.
    pub fn with_store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Broadcast an event.
    fn broadcast(&self, event: QueueEvent) {
        tracing::trace!("{}", event.description());
        let _ = self.event_tx.send(event);
    }

    /// Save the job list. Failures are logged, the in-memory queue stays
    /// authoritative.
    async fn persist(&self) {
        if let Some(store) = &self.store
            && let Err(e) = store.save(self.jobs.clone()).await
        {
            tracing::warn!("Failed to persist queue: {}", e);
        }
    }

    /// Load persisted jobs. Jobs that were processing when the last session
    /// ended go back to pending.
    async fn restore(&mut self) {
        let Some(store) = self.store.clone() else {
            return;
        };

        let mut jobs = match store.load().await {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::warn!("Failed to load persisted queue, starting empty: {}", e);
                return;
            }
        };

        let mut reset_jobs = Vec::new();
        for job in jobs.iter_mut().filter(|j| j.status == JobStatus::Processing) {
            if job.reset_to_pending().is_ok() {
                reset_jobs.push(job.id);
            }
        }

        tracing::info!(
            "Restored {} jobs ({} interrupted)",
            jobs.len(),
            reset_jobs.len()
        );
        self.jobs = jobs;

        if !reset_jobs.is_empty() {
            self.persist().await;
        }

        self.broadcast(QueueEvent::QueueRestored {
            job_count: self.jobs.len(),
            reset_jobs,
            timestamp: Utc::now(),
        });
    }

    fn current_id(&self) -> Option<JobId> {
        self.current.as_ref().map(|c| c.id)
    }

    fn position(&self, job_id: JobId) -> Result<usize, QueueError> {
        self.jobs
            .iter()
            .position(|j| j.id == job_id)
            .ok_or(QueueError::JobNotFound(job_id))
    }

    fn job_mut(&mut self, job_id: JobId) -> Result<&mut Job, QueueError> {
        self.jobs
            .iter_mut()
            .find(|j| j.id == job_id)
            .ok_or(QueueError::JobNotFound(job_id))
    }

    /// Forget the current job if it is `job_id`. Returns the cancellation
    /// token it ran with.
    fn release(&mut self, job_id: JobId) -> Option<CancellationToken> {
        self.current
            .take_if(|c| c.id == job_id)
            .map(|current| current.cancel)
    }

    fn enqueue(&mut self, mut job: Job) -> Result<Job, QueueError> {
        if self.jobs.iter().any(|j| j.id == job.id) {
            return Err(QueueError::DuplicateJob(job.id));
        }

        job.status = JobStatus::Pending;
        job.progress = None;
        job.results.clear();
        job.error_message = None;
        job.retry_count = 0;
        job.started_at = None;
        job.completed_at = None;
        if let Some(seed) = job.configuration.normalize_seed() {
            tracing::debug!("Assigned seed {} to job {}", seed, job.id);
        }

        self.jobs.push(job.clone());
        self.broadcast(QueueEvent::JobEnqueued {
            job: Box::new(job.clone()),
            timestamp: Utc::now(),
        });
        Ok(job)
    }

    fn start(&mut self, job_id: JobId, cancel: CancellationToken) -> Result<Job, QueueError> {
        if let Some(current) = self.current_id() {
            return Err(QueueError::AnotherJobProcessing { current });
        }

        let job = self.job_mut(job_id)?;
        job.start()?;
        let job = job.clone();

        self.current = Some(CurrentJob { id: job_id, cancel });
        self.broadcast(QueueEvent::JobStarted {
            job_id,
            timestamp: Utc::now(),
        });
        Ok(job)
    }

    fn update_progress(&mut self, job_id: JobId, update: ProgressUpdate) -> Result<(), QueueError> {
        if self.current_id() != Some(job_id) {
            return Err(QueueError::NotCurrent(job_id));
        }

        let job = self.job_mut(job_id)?;
        let previous = job.progress.as_ref().and_then(|p| p.preview.clone());
        let preview = match update.preview_tensor {
            Some(tensor) => {
                match tensor_codec::decode_to_png(&tensor, job.configuration.model_family()) {
                    Ok(png) => Some(png),
                    Err(e) => {
                        tracing::warn!("Dropping preview for job {}: {}", job_id, e);
                        previous
                    }
                }
            }
            None => previous,
        };

        let progress = JobProgress {
            current_step: update.current_step,
            total_steps: update.total_steps,
            stage: update.stage,
            preview,
        };
        job.set_progress(progress.clone())?;

        self.broadcast(QueueEvent::JobProgress {
            job_id,
            progress,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    fn complete(&mut self, job_id: JobId, results: Vec<Vec<u8>>) -> Result<JobStatus, QueueError> {
        let job = self.job_mut(job_id)?;
        let status = job.complete(results)?;
        let event = match status {
            JobStatus::Completed => QueueEvent::JobCompleted {
                job_id,
                image_count: job.results.len(),
                duration_ms: job.duration_ms(),
                timestamp: Utc::now(),
            },
            _ => QueueEvent::JobFailed {
                job_id,
                error: job.error_message.clone().unwrap_or_default(),
                retry_count: job.retry_count,
                timestamp: Utc::now(),
            },
        };

        self.release(job_id);
        self.broadcast(event);
        Ok(status)
    }

    fn fail(&mut self, job_id: JobId, message: String) -> Result<(), QueueError> {
        let job = self.job_mut(job_id)?;
        job.fail(message.clone())?;
        let retry_count = job.retry_count;

        self.release(job_id);
        self.broadcast(QueueEvent::JobFailed {
            job_id,
            error: message,
            retry_count,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    fn reset_to_pending(&mut self, job_id: JobId) -> Result<(), QueueError> {
        self.job_mut(job_id)?.reset_to_pending()?;

        self.release(job_id);
        self.broadcast(QueueEvent::JobReset {
            job_id,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    fn retry(&mut self, job_id: JobId) -> Result<Job, QueueError> {
        let job = self.job_mut(job_id)?;
        job.retry()?;
        let job = job.clone();

        self.broadcast(QueueEvent::JobRetrying {
            job_id,
            attempt: job.retry_count,
            timestamp: Utc::now(),
        });
        Ok(job)
    }

    fn cancel(&mut self, job_id: JobId) -> Result<(), QueueError> {
        self.job_mut(job_id)?.cancel()?;

        let was_running = match self.release(job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        };

        self.broadcast(QueueEvent::JobCancelled {
            job_id,
            was_running,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    fn remove(&mut self, job_id: JobId) -> Result<Job, QueueError> {
        let index = self.position(job_id)?;
        if self.current_id() == Some(job_id) || self.jobs[index].status == JobStatus::Processing {
            return Err(QueueError::JobIsCurrent(job_id));
        }

        let job = self.jobs.remove(index);
        self.broadcast(QueueEvent::JobRemoved {
            job_id,
            timestamp: Utc::now(),
        });
        Ok(job)
    }

    fn move_job(&mut self, job_id: JobId, index: usize) -> Result<(), QueueError> {
        let from = self.position(job_id)?;
        let job = self.jobs.remove(from);
        let index = index.min(self.jobs.len());
        self.jobs.insert(index, job);

        self.broadcast(QueueEvent::JobMoved {
            job_id,
            index,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    fn clear(&mut self, class: StatusClass) -> Vec<JobId> {
        let current = self.current_id();
        let mut cleared = Vec::new();
        self.jobs.retain(|job| {
            let remove = class.matches(job.status) && Some(job.id) != current;
            if remove {
                cleared.push(job.id);
            }
            !remove
        });

        if !cleared.is_empty() {
            self.broadcast(QueueEvent::JobsCleared {
                class,
                job_ids: cleared.clone(),
                timestamp: Utc::now(),
            });
        }
        cleared
    }

    fn pause(&mut self, reason: Option<String>) {
        self.paused = true;
        if reason.is_some() {
            self.last_error = reason.clone();
        }
        self.broadcast(QueueEvent::QueuePaused {
            reason,
            timestamp: Utc::now(),
        });
    }

    fn resume(&mut self) {
        self.paused = false;
        self.last_error = None;
        self.broadcast(QueueEvent::QueueResumed {
            timestamp: Utc::now(),
        });
    }

    fn next_pending(&self) -> Option<JobId> {
        self.jobs
            .iter()
            .find(|j| j.status == JobStatus::Pending)
            .map(|j| j.id)
    }

    fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            jobs: self.jobs.clone(),
            paused: self.paused,
            last_error: self.last_error.clone(),
            current_job: self.current_id(),
        }
    }
}

/// Queue actor, the single writer of the job list.
pub struct QueueActor;

impl Actor for QueueActor {
    type Msg = QueueMessage;
    type State = QueueActorState;
    type Arguments = QueueActorState;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        mut args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting queue actor");
        args.restore().await;
        Ok(args)
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            QueueMessage::Enqueue { job, reply } => {
                let result = state.enqueue(*job);
                if result.is_ok() {
                    state.persist().await;
                }
                let _ = reply.send(result);
            }

            QueueMessage::Start {
                job_id,
                cancel,
                reply,
            } => {
                let result = state.start(job_id, cancel);
                if result.is_ok() {
                    state.persist().await;
                }
                let _ = reply.send(result);
            }

            // Progress is transient and dropped on restore, so it is not persisted.
            QueueMessage::UpdateProgress {
                job_id,
                update,
                reply,
            } => {
                let _ = reply.send(state.update_progress(job_id, update));
            }

            QueueMessage::Complete {
                job_id,
                results,
                reply,
            } => {
                let result = state.complete(job_id, results);
                if result.is_ok() {
                    state.persist().await;
                }
                let _ = reply.send(result);
            }

            QueueMessage::Fail {
                job_id,
                message,
                reply,
            } => {
                let result = state.fail(job_id, message);
                if result.is_ok() {
                    state.persist().await;
                }
                let _ = reply.send(result);
            }

            QueueMessage::ResetToPending { job_id, reply } => {
                let result = state.reset_to_pending(job_id);
                if result.is_ok() {
                    state.persist().await;
                }
                let _ = reply.send(result);
            }

            QueueMessage::Retry { job_id, reply } => {
                let result = state.retry(job_id);
                if result.is_ok() {
                    state.persist().await;
                }
                let _ = reply.send(result);
            }

            QueueMessage::Cancel { job_id, reply } => {
                let result = state.cancel(job_id);
                if result.is_ok() {
                    state.persist().await;
                }
                let _ = reply.send(result);
            }

            QueueMessage::Remove { job_id, reply } => {
                let result = state.remove(job_id);
                if result.is_ok() {
                    state.persist().await;
                }
                let _ = reply.send(result);
            }

            QueueMessage::Move {
                job_id,
                index,
                reply,
            } => {
                let result = state.move_job(job_id, index);
                if result.is_ok() {
                    state.persist().await;
                }
                let _ = reply.send(result);
            }

            QueueMessage::Clear { class, reply } => {
                let cleared = state.clear(class);
                if !cleared.is_empty() {
                    state.persist().await;
                }
                let _ = reply.send(cleared);
            }

            QueueMessage::Pause { reason } => {
                if let Some(reason) = &reason {
                    tracing::warn!("Queue paused: {}", reason);
                } else {
                    tracing::info!("Queue paused");
                }
                state.pause(reason);
            }

            QueueMessage::Resume => {
                tracing::info!("Queue resumed");
                state.resume();
            }

            QueueMessage::GetJob { job_id, reply } => {
                let _ = reply.send(state.jobs.iter().find(|j| j.id == job_id).cloned());
            }

            QueueMessage::ListJobs {
                status_filter,
                reply,
            } => {
                let jobs: Vec<Job> = state
                    .jobs
                    .iter()
                    .filter(|j| status_filter.is_none_or(|s| j.status == s))
                    .cloned()
                    .collect();
                let _ = reply.send(jobs);
            }

            QueueMessage::GetStats { reply } => {
                let _ = reply.send(QueueStats::from_jobs(&state.jobs));
            }

            QueueMessage::NextPending { reply } => {
                let _ = reply.send(state.next_pending());
            }

            QueueMessage::IsPaused { reply } => {
                let _ = reply.send(state.paused);
            }

            QueueMessage::Snapshot { reply } => {
                let _ = reply.send(state.snapshot());
            }

            QueueMessage::Shutdown => {
                tracing::info!("Shutting down queue");
                if let Some(current) = state.current.take() {
                    current.cancel.cancel();
                }
                state.persist().await;
                myself.stop(None);
            }
        }

        Ok(())
    }
}
