#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use actors::{
    GenerationEvent, GenerationRequest, GenerationService, GenerationStream, GenerationSystem,
    JobStore, ProcessorConfig, QueueHandle, SystemConfig, start_system_with_store,
};
use futures_util::{StreamExt, stream};
use gen_core::{Job, JobId, JobStatus, QueueSnapshot};
use image::{DynamicImage, Rgb, RgbImage};
use tokio_util::sync::CancellationToken;

/// What the stub server does for one request.
#[derive(Debug, Clone)]
pub enum Script {
    /// Emit these events, then end the stream.
    Events(Vec<GenerationEvent>),
    /// Emit these events, then wait until cancelled.
    Hang(Vec<GenerationEvent>),
}

/// Scripted generation server.
///
/// Scripts are queued per prompt and consumed one per request. Prompts
/// without a queued script get one image and completion.
#[derive(Default)]
pub struct StubService {
    disconnected: AtomicBool,
    scripts: Mutex<HashMap<String, VecDeque<Script>>>,
    calls: AtomicUsize,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl StubService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, prompt: &str, script: Script) {
        self.scripts
            .lock()
            .unwrap()
            .entry(prompt.to_string())
            .or_default()
            .push_back(script);
    }

    pub fn set_connected(&self, connected: bool) {
        self.disconnected.store(!connected, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl GenerationService for StubService {
    fn is_connected(&self) -> bool {
        !self.disconnected.load(Ordering::SeqCst)
    }

    fn generate(&self, request: GenerationRequest, cancel: CancellationToken) -> GenerationStream {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&request.prompt)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| {
                Script::Events(vec![
                    GenerationEvent::Progress {
                        step: 1,
                        total: 1,
                        stage: "sampling".into(),
                    },
                    GenerationEvent::Image {
                        tensor: rgb_tensor(4, 4),
                    },
                    GenerationEvent::Completed,
                ])
            });
        self.requests.lock().unwrap().push(request);

        match script {
            Script::Events(events) => Box::pin(stream::iter(events)),
            Script::Hang(events) => Box::pin(stream::iter(events).chain(
                stream::once(async move {
                    cancel.cancelled().await;
                    GenerationEvent::Error {
                        message: "cancelled".into(),
                    }
                }),
            )),
        }
    }
}

/// Final-image tensor of the given size.
pub fn rgb_tensor(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, Rgb([200, 100, 50]));
    tensor_codec::encode_image(&DynamicImage::ImageRgb8(image), true)
}

/// 4 channel latent preview of zeros.
pub fn latent_tensor(width: u32, height: u32) -> Vec<u8> {
    let mut bytes = tensor_codec::TensorHeader::new(height, width, 4)
        .to_bytes()
        .to_vec();
    bytes.resize(bytes.len() + (width * height * 4 * 2) as usize, 0);
    bytes
}

pub fn png(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, Rgb([1, 2, 3]));
    tensor_codec::encode_png(&DynamicImage::ImageRgb8(image)).unwrap()
}

pub fn fast_config() -> SystemConfig {
    SystemConfig::default()
        .with_processor(ProcessorConfig::default().with_poll_interval(Duration::from_millis(10)))
}

pub async fn start(
    config: SystemConfig,
    service: Arc<StubService>,
    store: Option<Arc<dyn JobStore>>,
) -> GenerationSystem {
    start_system_with_store(config, service, store)
        .await
        .expect("system starts")
}

/// Poll the queue until `check` holds, or panic after a few seconds.
pub async fn wait_for(
    queue: &QueueHandle,
    what: &str,
    check: impl Fn(&QueueSnapshot) -> bool,
) -> QueueSnapshot {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let snapshot = queue.snapshot().await.expect("snapshot");
        assert!(snapshot.stats().processing <= 1, "more than one job processing");
        if check(&snapshot) {
            return snapshot;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}: {snapshot:?}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub async fn wait_for_status(queue: &QueueHandle, job_id: JobId, status: JobStatus) -> Job {
    let snapshot = wait_for(queue, status.as_str(), |s| {
        s.get(job_id).is_some_and(|j| j.status == status)
    })
    .await;
    snapshot.get(job_id).cloned().expect("job present")
}
