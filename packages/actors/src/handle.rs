//! Typed client for the queue actor.

use gen_core::{
    Job, JobId, JobStatus, ProgressUpdate, QueueEvent, QueueSnapshot, QueueStats, StatusClass,
};
use ractor::{ActorRef, RpcReplyPort, concurrency};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::messages::{QueueError, QueueMessage};

/// Cloneable handle to a running queue actor.
///
/// Every call is a request/reply round trip through the actor mailbox, so
/// calls from one task observe each other in order.
#[derive(Clone)]
pub struct QueueHandle {
    actor: ActorRef<QueueMessage>,
    events: broadcast::Sender<QueueEvent>,
}

impl QueueHandle {
    pub fn new(actor: ActorRef<QueueMessage>, events: broadcast::Sender<QueueEvent>) -> Self {
        Self { actor, events }
    }

    /// Receive every event emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    async fn call<T, F>(&self, build: F) -> Result<T, QueueError>
    where
        T: Send + 'static,
        F: FnOnce(RpcReplyPort<T>) -> QueueMessage + Send,
    {
        let (tx, rx) = concurrency::oneshot();
        self.actor
            .send_message(build(tx.into()))
            .map_err(|e| QueueError::Actor(e.to_string()))?;
        rx.await
            .map_err(|_| QueueError::Actor("queue actor dropped the reply".into()))
    }

    fn cast(&self, message: QueueMessage) -> Result<(), QueueError> {
        self.actor
            .send_message(message)
            .map_err(|e| QueueError::Actor(e.to_string()))
    }

    pub async fn enqueue(&self, job: Job) -> Result<Job, QueueError> {
        self.call(move |reply| QueueMessage::Enqueue {
            job: Box::new(job),
            reply,
        })
        .await?
    }

    pub async fn start(&self, job_id: JobId, cancel: CancellationToken) -> Result<Job, QueueError> {
        self.call(move |reply| QueueMessage::Start {
            job_id,
            cancel,
            reply,
        })
        .await?
    }

    pub async fn update_progress(
        &self,
        job_id: JobId,
        update: ProgressUpdate,
    ) -> Result<(), QueueError> {
        self.call(move |reply| QueueMessage::UpdateProgress {
            job_id,
            update,
            reply,
        })
        .await?
    }

    /// Finish a job. Returns `Failed` when `results` is empty.
    pub async fn complete(
        &self,
        job_id: JobId,
        results: Vec<Vec<u8>>,
    ) -> Result<JobStatus, QueueError> {
        self.call(move |reply| QueueMessage::Complete {
            job_id,
            results,
            reply,
        })
        .await?
    }

    pub async fn fail(&self, job_id: JobId, message: impl Into<String>) -> Result<(), QueueError> {
        let message = message.into();
        self.call(move |reply| QueueMessage::Fail {
            job_id,
            message,
            reply,
        })
        .await?
    }

    pub async fn reset_to_pending(&self, job_id: JobId) -> Result<(), QueueError> {
        self.call(move |reply| QueueMessage::ResetToPending { job_id, reply })
            .await?
    }

    pub async fn retry(&self, job_id: JobId) -> Result<Job, QueueError> {
        self.call(move |reply| QueueMessage::Retry { job_id, reply })
            .await?
    }

    pub async fn cancel(&self, job_id: JobId) -> Result<(), QueueError> {
        self.call(move |reply| QueueMessage::Cancel { job_id, reply })
            .await?
    }

    pub async fn remove(&self, job_id: JobId) -> Result<Job, QueueError> {
        self.call(move |reply| QueueMessage::Remove { job_id, reply })
            .await?
    }

    pub async fn move_job(&self, job_id: JobId, index: usize) -> Result<(), QueueError> {
        self.call(move |reply| QueueMessage::Move {
            job_id,
            index,
            reply,
        })
        .await?
    }

    /// Remove every job in `class` except the current one.
    pub async fn clear(&self, class: StatusClass) -> Result<Vec<JobId>, QueueError> {
        self.call(move |reply| QueueMessage::Clear { class, reply })
            .await
    }

    pub fn pause(&self, reason: Option<String>) -> Result<(), QueueError> {
        self.cast(QueueMessage::Pause { reason })
    }

    pub fn resume(&self) -> Result<(), QueueError> {
        self.cast(QueueMessage::Resume)
    }

    pub async fn get(&self, job_id: JobId) -> Result<Option<Job>, QueueError> {
        self.call(move |reply| QueueMessage::GetJob { job_id, reply })
            .await
    }

    /// Jobs in queue order, optionally only those with `status`.
    pub async fn list(&self, status: Option<JobStatus>) -> Result<Vec<Job>, QueueError> {
        self.call(move |reply| QueueMessage::ListJobs {
            status_filter: status,
            reply,
        })
        .await
    }

    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        self.call(|reply| QueueMessage::GetStats { reply }).await
    }

    pub async fn next_pending(&self) -> Result<Option<JobId>, QueueError> {
        self.call(|reply| QueueMessage::NextPending { reply }).await
    }

    pub async fn is_paused(&self) -> Result<bool, QueueError> {
        self.call(|reply| QueueMessage::IsPaused { reply }).await
    }

    pub async fn snapshot(&self) -> Result<QueueSnapshot, QueueError> {
        self.call(|reply| QueueMessage::Snapshot { reply }).await
    }

    pub fn shutdown(&self) -> Result<(), QueueError> {
        self.cast(QueueMessage::Shutdown)
    }
}
