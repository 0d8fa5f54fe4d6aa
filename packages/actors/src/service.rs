//! Generation service trait.
//!
//! The processor talks to the image-generation server through this trait.
//! A service streams events for one request until it yields
//! [`GenerationEvent::Completed`] or [`GenerationEvent::Error`].

use std::collections::BTreeMap;
use std::pin::Pin;

use futures_util::Stream;
use tokio_util::sync::CancellationToken;

/// Stream of events for one generation request.
pub type GenerationStream = Pin<Box<dyn Stream<Item = GenerationEvent> + Send>>;

/// One encoded hint image and its weight.
#[derive(Debug, Clone, PartialEq)]
pub struct HintTensor {
    pub tensor: Vec<u8>,
    pub weight: f32,
}

/// A request ready to send to the server. Images are wire tensors, except
/// the mask which is PNG.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub negative_prompt: String,
    /// Serialized generation parameters.
    pub configuration: Vec<u8>,
    pub canvas: Option<Vec<u8>>,
    pub mask: Option<Vec<u8>>,
    /// Hint tensors grouped by hint type.
    pub hints: BTreeMap<String, Vec<HintTensor>>,
}

/// Events streamed back by the server.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationEvent {
    Progress {
        step: u32,
        total: u32,
        stage: String,
    },
    /// Intermediate preview tensor, usually a latent.
    Preview { tensor: Vec<u8> },
    /// A final image tensor.
    Image { tensor: Vec<u8> },
    /// The server finished the request.
    Completed,
    /// The server or transport failed.
    Error { message: String },
}

/// Trait for generation backends.
///
/// Implementations must stop producing events soon after `cancel` fires.
pub trait GenerationService: Send + Sync + 'static {
    /// Whether the server is currently reachable.
    fn is_connected(&self) -> bool;

    /// Start generating and stream the server's events.
    fn generate(&self, request: GenerationRequest, cancel: CancellationToken) -> GenerationStream;
}

/// A simple function-based service.
pub struct FnService<F>
where
    F: Fn(GenerationRequest, CancellationToken) -> GenerationStream + Send + Sync + 'static,
{
    generate: F,
}

impl<F> FnService<F>
where
    F: Fn(GenerationRequest, CancellationToken) -> GenerationStream + Send + Sync + 'static,
{
    /// Create an always-connected service from a closure.
    pub fn new(generate: F) -> Self {
        Self { generate }
    }
}

impl<F> GenerationService for FnService<F>
where
    F: Fn(GenerationRequest, CancellationToken) -> GenerationStream + Send + Sync + 'static,
{
    fn is_connected(&self) -> bool {
        true
    }

    fn generate(&self, request: GenerationRequest, cancel: CancellationToken) -> GenerationStream {
        (self.generate)(request, cancel)
    }
}
