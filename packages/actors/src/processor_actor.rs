//! Processor actor running generation jobs one at a time.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::StreamExt;
use gen_core::{ErrorClass, Job, JobId, JobStatus, ProgressUpdate, QueueEvent, classify_error};
use ractor::{Actor, ActorProcessingErr, ActorRef};
use tensor_codec::ModelFamily;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio_util::sync::CancellationToken;

use crate::config::ProcessorConfig;
use crate::handle::QueueHandle;
use crate::messages::ProcessorMessage;
use crate::service::{GenerationEvent, GenerationRequest, GenerationService, HintTensor};

/// Reported when a generation runs past the configured timeout.
const TIMEOUT_MESSAGE: &str = "generation timeout";

/// Reported when the event stream ends without a terminal event.
const STREAM_CLOSED_MESSAGE: &str = "connection closed before generation completed";

/// Decoded result images tagged with their arrival index.
type ResultBuffer = Arc<Mutex<Vec<(usize, Vec<u8>)>>>;

/// How one generation ended.
#[derive(Debug)]
enum Outcome {
    Finished(Vec<Vec<u8>>),
    Failed(String),
    Cancelled,
}

/// State for the processor actor.
pub struct ProcessorActorState {
    queue: QueueHandle,
    service: Arc<dyn GenerationService>,
    config: ProcessorConfig,
    /// Queue events, watched for user retries.
    events: broadcast::Receiver<QueueEvent>,
    /// Jobs attempted since the last start.
    processed: HashSet<JobId>,
    running: bool,
    /// Bumped on every start and stop so stale polls are dropped.
    epoch: u64,
}

/// Processor actor arguments.
pub struct ProcessorArgs {
    pub queue: QueueHandle,
    pub service: Arc<dyn GenerationService>,
    pub config: ProcessorConfig,
    pub autostart: bool,
}

impl ProcessorActorState {
    fn new(args: ProcessorArgs) -> Self {
        Self {
            events: args.queue.subscribe(),
            queue: args.queue,
            service: args.service,
            config: args.config,
            processed: HashSet::new(),
            running: false,
            epoch: 0,
        }
    }

    /// Forget processed ids of jobs that were retried or enqueued again.
    fn drain_events(&mut self) {
        loop {
            match self.events.try_recv() {
                Ok(QueueEvent::JobRetrying { job_id, .. }) => {
                    self.processed.remove(&job_id);
                }
                Ok(QueueEvent::JobEnqueued { job, .. }) => {
                    self.processed.remove(&job.id);
                }
                Ok(_) => {}
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::debug!("Processor missed {} queue events", skipped);
                    self.processed.clear();
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
    }

    /// One pass of the work loop. Returns how long to wait before the next.
    async fn poll_once(&mut self) -> Duration {
        self.drain_events();

        match self.queue.is_paused().await {
            Ok(false) => {}
            Ok(true) => return self.config.pause_poll_interval,
            Err(e) => {
                tracing::warn!("Queue unavailable: {}", e);
                return self.config.idle_poll_interval;
            }
        }

        if !self.service.is_connected() {
            return self.config.reconnect_poll_interval;
        }

        let job_id = match self.queue.next_pending().await {
            Ok(Some(job_id)) => job_id,
            Ok(None) => return self.config.idle_poll_interval,
            Err(e) => {
                tracing::warn!("Queue unavailable: {}", e);
                return self.config.idle_poll_interval;
            }
        };

        if !self.processed.insert(job_id) {
            tracing::trace!(job_id = %job_id, "Job already attempted, waiting");
            return self.config.dedupe_poll_interval;
        }

        self.process(job_id).await;
        Duration::ZERO
    }

    async fn process(&mut self, job_id: JobId) {
        let cancel = CancellationToken::new();
        let job = match self.queue.start(job_id, cancel.clone()).await {
            Ok(job) => job,
            Err(e) => {
                tracing::warn!(job_id = %job_id, "Could not start job: {}", e);
                return;
            }
        };

        tracing::info!(job_id = %job_id, "Processing job");
        let family = job.configuration.model_family();
        let request = match build_request(job) {
            Ok(request) => request,
            Err(message) => {
                tracing::warn!(job_id = %job_id, "{}", message);
                if let Err(e) = self.queue.fail(job_id, message).await {
                    tracing::warn!(job_id = %job_id, "Could not fail job: {}", e);
                }
                return;
            }
        };

        let outcome = match self.config.job_timeout {
            Some(limit) => {
                match tokio::time::timeout(limit, self.generate(job_id, request, family, &cancel))
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        cancel.cancel();
                        Outcome::Failed(TIMEOUT_MESSAGE.to_string())
                    }
                }
            }
            None => self.generate(job_id, request, family, &cancel).await,
        };

        self.finish(job_id, outcome).await;
    }

    /// Drive the service stream until a terminal event or cancellation.
    async fn generate(
        &self,
        job_id: JobId,
        request: GenerationRequest,
        family: Option<ModelFamily>,
        cancel: &CancellationToken,
    ) -> Outcome {
        let mut stream = self.service.generate(request, cancel.clone());
        let results: ResultBuffer = Arc::default();
        let mut decoders = Vec::new();
        let mut last = ProgressUpdate::default();

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Outcome::Cancelled,
                event = stream.next() => event,
            };

            match event {
                Some(GenerationEvent::Progress { step, total, stage }) => {
                    last = ProgressUpdate {
                        current_step: step,
                        total_steps: total,
                        stage,
                        preview_tensor: None,
                    };
                    self.report(job_id, last.clone()).await;
                }
                Some(GenerationEvent::Preview { tensor }) => {
                    let update = ProgressUpdate {
                        preview_tensor: Some(tensor),
                        ..last.clone()
                    };
                    self.report(job_id, update).await;
                }
                Some(GenerationEvent::Image { tensor }) => {
                    let index = decoders.len();
                    let results = Arc::clone(&results);
                    decoders.push(tokio::task::spawn_blocking(move || {
                        match tensor_codec::decode_to_png(&tensor, family) {
                            Ok(png) => lock(&results).push((index, png)),
                            Err(e) => tracing::warn!(
                                job_id = %job_id,
                                index,
                                "Dropping undecodable result image: {}",
                                e
                            ),
                        }
                    }));
                }
                Some(GenerationEvent::Completed) => break,
                Some(GenerationEvent::Error { message }) => return Outcome::Failed(message),
                None => return Outcome::Failed(STREAM_CLOSED_MESSAGE.to_string()),
            }
        }

        for decoder in decoders {
            if let Err(e) = decoder.await {
                tracing::warn!(job_id = %job_id, "Result decoder failed: {}", e);
            }
        }

        let mut images = std::mem::take(&mut *lock(&results));
        images.sort_by_key(|(index, _)| *index);
        Outcome::Finished(images.into_iter().map(|(_, png)| png).collect())
    }

    async fn report(&self, job_id: JobId, update: ProgressUpdate) {
        if let Err(e) = self.queue.update_progress(job_id, update).await {
            tracing::debug!(job_id = %job_id, "Progress dropped: {}", e);
        }
    }

    async fn finish(&mut self, job_id: JobId, outcome: Outcome) {
        match outcome {
            Outcome::Finished(images) => match self.queue.complete(job_id, images).await {
                Ok(JobStatus::Completed) => tracing::info!(job_id = %job_id, "Job completed"),
                Ok(status) => tracing::warn!(job_id = %job_id, "Job ended {}", status),
                Err(e) => tracing::debug!(job_id = %job_id, "Result discarded: {}", e),
            },

            Outcome::Failed(message) => match classify_error(&message) {
                ErrorClass::Connectivity => {
                    tracing::warn!(job_id = %job_id, "Connection lost, pausing queue: {}", message);
                    if let Err(e) = self.queue.pause(Some(message)) {
                        tracing::warn!("Could not pause queue: {}", e);
                    }
                    self.processed.remove(&job_id);
                    if let Err(e) = self.queue.reset_to_pending(job_id).await {
                        tracing::debug!(job_id = %job_id, "Reset skipped: {}", e);
                    }
                }
                ErrorClass::Generation => {
                    tracing::warn!(job_id = %job_id, "Job failed: {}", message);
                    if let Err(e) = self.queue.fail(job_id, message).await {
                        tracing::debug!(job_id = %job_id, "Failure discarded: {}", e);
                    }
                }
            },

            Outcome::Cancelled => tracing::info!(job_id = %job_id, "Job cancelled while running"),
        }
    }
}

/// Turn a started job into a server request.
///
/// Canvas and hints become wire tensors and the mask becomes PNG. A hint that
/// cannot be converted is skipped; a bad canvas or mask fails the job.
fn build_request(job: Job) -> Result<GenerationRequest, String> {
    let canvas = job
        .canvas
        .as_deref()
        .map(|bytes| tensor_codec::encode(bytes, true))
        .transpose()
        .map_err(|e| format!("Canvas could not be encoded: {e}"))?;

    let mask = job
        .mask
        .as_deref()
        .map(tensor_codec::reencode_png)
        .transpose()
        .map_err(|e| format!("Mask could not be encoded: {e}"))?;

    let configuration = job
        .configuration
        .to_bytes()
        .map_err(|e| format!("Configuration could not be serialized: {e}"))?;

    let mut hints: BTreeMap<String, Vec<HintTensor>> = BTreeMap::new();
    for hint in job.hints {
        match tensor_codec::encode(&hint.image, true) {
            Ok(tensor) => hints.entry(hint.hint_type).or_default().push(HintTensor {
                tensor,
                weight: hint.weight,
            }),
            Err(e) => tracing::warn!(
                job_id = %job.id,
                hint_type = %hint.hint_type,
                "Skipping hint: {}",
                e
            ),
        }
    }

    Ok(GenerationRequest {
        prompt: job.prompt,
        negative_prompt: job.negative_prompt,
        configuration,
        canvas,
        mask,
        hints,
    })
}

fn lock(results: &Mutex<Vec<(usize, Vec<u8>)>>) -> MutexGuard<'_, Vec<(usize, Vec<u8>)>> {
    results.lock().unwrap_or_else(PoisonError::into_inner)
}

fn schedule_poll(myself: &ActorRef<ProcessorMessage>, epoch: u64, delay: Duration) {
    if delay.is_zero() {
        let _ = myself.send_message(ProcessorMessage::Poll { epoch });
        return;
    }

    let myself = myself.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let _ = myself.send_message(ProcessorMessage::Poll { epoch });
    });
}

/// Processor actor, the single consumer of the queue.
pub struct ProcessorActor;

impl Actor for ProcessorActor {
    type Msg = ProcessorMessage;
    type State = ProcessorActorState;
    type Arguments = ProcessorArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting processor");
        let autostart = args.autostart;
        let state = ProcessorActorState::new(args);

        if autostart {
            myself.send_message(ProcessorMessage::Start)?;
        }

        Ok(state)
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            ProcessorMessage::Poll { epoch } => {
                if !state.running || epoch != state.epoch {
                    return Ok(());
                }
                let delay = state.poll_once().await;
                if state.running && epoch == state.epoch {
                    schedule_poll(&myself, epoch, delay);
                }
            }

            ProcessorMessage::Start => {
                if state.running {
                    return Ok(());
                }
                tracing::info!("Processor started");
                state.running = true;
                state.epoch += 1;
                state.processed.clear();
                schedule_poll(&myself, state.epoch, Duration::ZERO);
            }

            ProcessorMessage::Stop => {
                if state.running {
                    tracing::info!("Processor stopped");
                }
                state.running = false;
                state.epoch += 1;
            }

            ProcessorMessage::IsRunning { reply } => {
                let _ = reply.send(state.running);
            }

            ProcessorMessage::Shutdown => {
                tracing::info!("Shutting down processor");
                state.running = false;
                myself.stop(None);
            }
        }

        Ok(())
    }
}
