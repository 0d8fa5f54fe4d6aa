//! Wiring of the queue and processor actors.

use std::sync::Arc;

use ractor::{Actor, ActorRef, concurrency};
use tokio::sync::broadcast;

use crate::config::SystemConfig;
use crate::handle::QueueHandle;
use crate::messages::{ProcessorMessage, QueueError};
use crate::persistence::{JobStore, StatePersistence};
use crate::processor_actor::{ProcessorActor, ProcessorArgs};
use crate::queue_actor::{QueueActor, QueueActorState};
use crate::service::GenerationService;

/// A running queue with its processor.
pub struct GenerationSystem {
    pub queue: QueueHandle,
    pub processor: ActorRef<ProcessorMessage>,
    queue_task: tokio::task::JoinHandle<()>,
    processor_task: tokio::task::JoinHandle<()>,
}

impl GenerationSystem {
    pub fn start_processor(&self) -> Result<(), QueueError> {
        self.processor
            .send_message(ProcessorMessage::Start)
            .map_err(|e| QueueError::Actor(e.to_string()))
    }

    /// Stop picking up jobs. The job in flight runs to its end.
    pub fn stop_processor(&self) -> Result<(), QueueError> {
        self.processor
            .send_message(ProcessorMessage::Stop)
            .map_err(|e| QueueError::Actor(e.to_string()))
    }

    pub async fn is_processing(&self) -> Result<bool, QueueError> {
        let (tx, rx) = concurrency::oneshot();
        self.processor
            .send_message(ProcessorMessage::IsRunning { reply: tx.into() })
            .map_err(|e| QueueError::Actor(e.to_string()))?;
        rx.await
            .map_err(|_| QueueError::Actor("processor dropped the reply".into()))
    }

    /// Stop both actors and wait for them to exit.
    pub async fn shutdown(self) {
        let _ = self.processor.send_message(ProcessorMessage::Shutdown);
        let _ = self.queue.shutdown();

        if let Err(e) = self.processor_task.await {
            tracing::warn!("Processor exited abnormally: {}", e);
        }
        if let Err(e) = self.queue_task.await {
            tracing::warn!("Queue exited abnormally: {}", e);
        }
    }
}

/// Start the queue and processor. With a state directory the queue is
/// restored from and saved to `jobs.json` there.
pub async fn start_system(
    config: SystemConfig,
    service: Arc<dyn GenerationService>,
) -> Result<GenerationSystem, ractor::SpawnErr> {
    let store = config
        .state_dir
        .as_ref()
        .map(|dir| Arc::new(StatePersistence::new(dir)) as Arc<dyn JobStore>);
    start_system_with_store(config, service, store).await
}

/// Start the queue and processor on an explicit store.
pub async fn start_system_with_store(
    config: SystemConfig,
    service: Arc<dyn GenerationService>,
    store: Option<Arc<dyn JobStore>>,
) -> Result<GenerationSystem, ractor::SpawnErr> {
    let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));

    let mut queue_state = QueueActorState::new(event_tx.clone());
    if let Some(store) = store {
        queue_state = queue_state.with_store(store);
    }

    let (queue_actor, queue_task) = Actor::spawn(None, QueueActor, queue_state).await?;
    let queue = QueueHandle::new(queue_actor, event_tx);

    let args = ProcessorArgs {
        queue: queue.clone(),
        service,
        config: config.processor,
        autostart: config.autostart,
    };
    let (processor, processor_task) = Actor::spawn(None, ProcessorActor, args).await?;

    Ok(GenerationSystem {
        queue,
        processor,
        queue_task,
        processor_task,
    })
}
