//! Actor system for the generation queue.
//!
//! This crate provides the Ractor-based actors that own the job list and
//! run jobs against a generation server.
//!
//! # Architecture
//!
//! - `QueueActor` - Single writer of the job list, persistence and events
//! - `ProcessorActor` - Polls the queue and runs one job at a time
//! - `GenerationService` - Seam to the image-generation server
//!
//! # Usage
//!
//! ```ignore
//! use actors::{SystemConfig, start_system};
//!
//! let system = start_system(SystemConfig::from_env(), service).await?;
//! let job = system.queue.enqueue(Job::new("a cat", config)).await?;
//! ```

mod config;
mod handle;
mod messages;
mod persistence;
mod processor_actor;
mod queue_actor;
mod service;
mod system;

pub use config::{ProcessorConfig, SystemConfig};
pub use handle::QueueHandle;
pub use messages::{ProcessorMessage, QueueError, QueueMessage, QueueReply};
pub use persistence::{JobStore, MemoryStore, PersistenceError, StatePersistence, StoreFuture};
pub use processor_actor::{ProcessorActor, ProcessorArgs};
pub use queue_actor::{QueueActor, QueueActorState};
pub use service::{
    FnService, GenerationEvent, GenerationRequest, GenerationService, GenerationStream,
    HintTensor,
};
pub use system::{GenerationSystem, start_system, start_system_with_store};

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef, RpcReplyPort, concurrency};
