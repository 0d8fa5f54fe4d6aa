mod common;

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use actors::{GenerationEvent, JobStore, MemoryStore, ProcessorConfig, QueueError, StatePersistence};
use gen_core::{
    EMPTY_RESULT_MESSAGE, GenerationConfig, Hint, Job, JobStatus, MAX_RETRIES, QueueEvent,
    StatusClass, TransitionError,
};
use serde_json::json;

use common::{Script, StubService, fast_config, start, wait_for, wait_for_status};

fn job(prompt: &str) -> Job {
    Job::new(prompt, GenerationConfig::with_seed(42))
}

#[tokio::test]
async fn test_happy_path_completes_with_one_image() -> Result<(), Box<dyn Error>> {
    let service = StubService::new();
    let system = start(fast_config(), service.clone(), None).await;

    let job = system.queue.enqueue(job("a cat")).await?;
    let done = wait_for_status(&system.queue, job.id, JobStatus::Completed).await;

    assert_eq!(done.results.len(), 1);
    assert!(done.results[0].starts_with(b"\x89PNG"));
    assert!(done.progress.is_none());
    assert!(done.started_at.is_some() && done.completed_at.is_some());
    assert!(done.error_message.is_none());
    assert_eq!(service.calls(), 1);

    let snapshot = system.queue.snapshot().await?;
    assert!(snapshot.current_job.is_none());

    system.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_reenqueued_job_runs_again_and_unblocks_queue() -> Result<(), Box<dyn Error>> {
    let service = StubService::new();
    let system = start(fast_config(), service.clone(), None).await;

    let first = system.queue.enqueue(job("a cat")).await?;
    wait_for_status(&system.queue, first.id, JobStatus::Completed).await;

    let err = system.queue.enqueue(first.clone()).await.unwrap_err();
    assert!(matches!(err, QueueError::DuplicateJob(id) if id == first.id));

    let removed = system.queue.remove(first.id).await?;
    let again = system.queue.enqueue(removed).await?;
    assert_eq!(again.id, first.id);
    assert_eq!(again.status, JobStatus::Pending);
    assert!(again.results.is_empty());

    let second = system.queue.enqueue(job("a dog")).await?;
    let rerun = wait_for_status(&system.queue, first.id, JobStatus::Completed).await;
    let done = wait_for_status(&system.queue, second.id, JobStatus::Completed).await;

    assert_eq!(rerun.results.len(), 1);
    assert_eq!(done.results.len(), 1);
    assert_eq!(service.calls(), 3);

    system.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_empty_result_fails_job() -> Result<(), Box<dyn Error>> {
    let service = StubService::new();
    service.script("nothing", Script::Events(vec![GenerationEvent::Completed]));
    let system = start(fast_config(), service, None).await;

    let job = system.queue.enqueue(job("nothing")).await?;
    let failed = wait_for_status(&system.queue, job.id, JobStatus::Failed).await;

    assert_eq!(failed.error_message.as_deref(), Some(EMPTY_RESULT_MESSAGE));
    assert!(failed.results.is_empty());

    system.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_connectivity_error_pauses_and_resets() -> Result<(), Box<dyn Error>> {
    let service = StubService::new();
    service.script(
        "a dog",
        Script::Events(vec![GenerationEvent::Error {
            message: "request timeout".into(),
        }]),
    );
    let system = start(fast_config(), service.clone(), None).await;

    let job = system.queue.enqueue(job("a dog")).await?;
    let snapshot = wait_for(&system.queue, "pause and reset", |s| {
        s.paused && s.get(job.id).is_some_and(|j| j.status == JobStatus::Pending)
    })
    .await;

    let reset = snapshot.get(job.id).unwrap();
    assert_eq!(reset.status, JobStatus::Pending);
    assert_eq!(reset.retry_count, 0);
    assert!(reset.started_at.is_none());
    assert_eq!(snapshot.last_error.as_deref(), Some("request timeout"));

    // Paused queues are not processed.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(service.calls(), 1);

    system.queue.resume()?;
    let done = wait_for_status(&system.queue, job.id, JobStatus::Completed).await;
    assert_eq!(done.retry_count, 0);
    assert!(system.queue.snapshot().await?.last_error.is_none());
    assert_eq!(service.calls(), 2);

    system.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_generation_error_fails_and_retry_reruns() -> Result<(), Box<dyn Error>> {
    let service = StubService::new();
    service.script(
        "broken",
        Script::Events(vec![GenerationEvent::Error {
            message: "model file missing".into(),
        }]),
    );
    let system = start(fast_config(), service.clone(), None).await;

    let job = system.queue.enqueue(job("broken")).await?;
    let failed = wait_for_status(&system.queue, job.id, JobStatus::Failed).await;
    assert_eq!(failed.error_message.as_deref(), Some("model file missing"));
    assert!(!system.queue.is_paused().await?);

    let retried = system.queue.retry(job.id).await?;
    assert_eq!(retried.retry_count, 1);
    assert_eq!(retried.status, JobStatus::Pending);

    let done = wait_for_status(&system.queue, job.id, JobStatus::Completed).await;
    assert_eq!(done.retry_count, 1);
    assert_eq!(service.calls(), 2);

    system.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_retry_rejected_after_limit() -> Result<(), Box<dyn Error>> {
    let service = StubService::new();
    for _ in 0..=MAX_RETRIES {
        service.script(
            "flaky",
            Script::Events(vec![GenerationEvent::Error {
                message: "out of memory".into(),
            }]),
        );
    }
    let system = start(fast_config(), service, None).await;

    let job = system.queue.enqueue(job("flaky")).await?;
    for attempt in 1..=MAX_RETRIES {
        wait_for_status(&system.queue, job.id, JobStatus::Failed).await;
        assert_eq!(system.queue.retry(job.id).await?.retry_count, attempt);
    }
    wait_for_status(&system.queue, job.id, JobStatus::Failed).await;

    let err = system.queue.retry(job.id).await.unwrap_err();
    assert!(matches!(
        err,
        QueueError::Transition(TransitionError::RetryLimitReached { .. })
    ));
    let job = system.queue.get(job.id).await?.unwrap();
    assert_eq!(job.retry_count, MAX_RETRIES);
    assert_eq!(job.status, JobStatus::Failed);

    system.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_cancel_running_job_stops_generation() -> Result<(), Box<dyn Error>> {
    let service = StubService::new();
    service.script(
        "slow",
        Script::Hang(vec![
            GenerationEvent::Progress {
                step: 1,
                total: 20,
                stage: "sampling".into(),
            },
            GenerationEvent::Preview {
                tensor: common::latent_tensor(2, 2),
            },
        ]),
    );
    let system = start(fast_config(), service, None).await;

    let slow = system.queue.enqueue(job("slow")).await?;
    let next = system.queue.enqueue(job("next")).await?;

    let snapshot = wait_for(&system.queue, "preview", |s| {
        s.get(slow.id)
            .and_then(|j| j.progress.as_ref())
            .is_some_and(|p| p.preview.is_some())
    })
    .await;
    assert_eq!(snapshot.current_job, Some(slow.id));
    let progress = snapshot.get(slow.id).unwrap().progress.clone().unwrap();
    assert_eq!((progress.current_step, progress.total_steps), (1, 20));
    assert!(progress.preview.unwrap().starts_with(b"\x89PNG"));

    let err = system.queue.remove(slow.id).await.unwrap_err();
    assert!(matches!(err, QueueError::JobIsCurrent(_)));

    system.queue.cancel(slow.id).await?;
    let cancelled = system.queue.get(slow.id).await?.unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    assert!(cancelled.progress.is_none());

    wait_for_status(&system.queue, next.id, JobStatus::Completed).await;
    let cancelled = system.queue.get(slow.id).await?.unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);

    system.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_pending_job_cancel_and_bulk_clear() -> Result<(), Box<dyn Error>> {
    let system = start(fast_config().with_autostart(false), StubService::new(), None).await;

    let a = system.queue.enqueue(job("a")).await?;
    let b = system.queue.enqueue(job("b")).await?;
    let c = system.queue.enqueue(job("c")).await?;

    system.queue.cancel(b.id).await?;
    assert_eq!(
        system.queue.get(b.id).await?.unwrap().status,
        JobStatus::Cancelled
    );
    let err = system.queue.cancel(b.id).await.unwrap_err();
    assert!(matches!(
        err,
        QueueError::Transition(TransitionError::InvalidState { .. })
    ));

    system.queue.move_job(c.id, 0).await?;
    assert_eq!(system.queue.next_pending().await?, Some(c.id));

    let pending = system.queue.list(Some(JobStatus::Pending)).await?;
    let order: Vec<_> = pending.iter().map(|j| j.id).collect();
    assert_eq!(order, vec![c.id, a.id]);
    assert_eq!(system.queue.stats().await?.cancelled, 1);

    let cleared = system.queue.clear(StatusClass::Cancelled).await?;
    assert_eq!(cleared, vec![b.id]);

    let removed = system.queue.remove(a.id).await?;
    assert_eq!(removed.id, a.id);

    let snapshot = system.queue.snapshot().await?;
    assert_eq!(snapshot.jobs.len(), 1);
    assert_eq!(snapshot.jobs[0].id, c.id);

    let err = system.queue.remove(a.id).await.unwrap_err();
    assert!(matches!(err, QueueError::JobNotFound(_)));

    system.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_enqueue_normalizes_seed() -> Result<(), Box<dyn Error>> {
    let system = start(fast_config().with_autostart(false), StubService::new(), None).await;

    let negative = system
        .queue
        .enqueue(Job::new("x", GenerationConfig::with_seed(-1)))
        .await?;
    let missing = system
        .queue
        .enqueue(Job::new("y", GenerationConfig::new(json!({ "steps": 20 }))))
        .await?;
    let fixed = system.queue.enqueue(job("z")).await?;

    assert!(negative.configuration.seed().is_some_and(|s| s >= 0));
    assert!(missing.configuration.seed().is_some_and(|s| s >= 0));
    assert_eq!(missing.configuration.0["steps"], 20);
    assert_eq!(fixed.configuration.seed(), Some(42));

    let stored = system.queue.get(negative.id).await?.unwrap();
    assert_eq!(stored.configuration, negative.configuration);

    system.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_processor_waits_for_connection_and_start() -> Result<(), Box<dyn Error>> {
    let service = StubService::new();
    service.set_connected(false);
    let system = start(fast_config().with_autostart(false), service.clone(), None).await;
    assert!(!system.is_processing().await?);

    let job = system.queue.enqueue(job("later")).await?;
    system.start_processor()?;
    assert!(system.is_processing().await?);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(service.calls(), 0);
    assert_eq!(
        system.queue.get(job.id).await?.unwrap().status,
        JobStatus::Pending
    );

    service.set_connected(true);
    wait_for_status(&system.queue, job.id, JobStatus::Completed).await;

    system.stop_processor()?;
    assert!(!system.is_processing().await?);
    let idle = system.queue.enqueue(self::job("idle")).await?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        system.queue.get(idle.id).await?.unwrap().status,
        JobStatus::Pending
    );

    system.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_job_timeout_is_treated_as_connectivity() -> Result<(), Box<dyn Error>> {
    let service = StubService::new();
    service.script("stuck", Script::Hang(Vec::new()));
    let config = fast_config().with_processor(
        ProcessorConfig::default()
            .with_poll_interval(Duration::from_millis(10))
            .with_job_timeout(Duration::from_millis(50)),
    );
    let system = start(config, service, None).await;

    let job = system.queue.enqueue(job("stuck")).await?;
    let snapshot = wait_for(&system.queue, "pause and reset", |s| {
        s.paused && s.get(job.id).is_some_and(|j| j.status == JobStatus::Pending)
    })
    .await;

    assert_eq!(snapshot.last_error.as_deref(), Some("generation timeout"));
    assert_eq!(snapshot.get(job.id).unwrap().status, JobStatus::Pending);

    system.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_results_keep_arrival_order() -> Result<(), Box<dyn Error>> {
    let service = StubService::new();
    service.script(
        "batch",
        Script::Events(vec![
            GenerationEvent::Image {
                tensor: common::rgb_tensor(8, 8),
            },
            GenerationEvent::Image {
                tensor: vec![1, 2, 3],
            },
            GenerationEvent::Image {
                tensor: common::rgb_tensor(1, 1),
            },
            GenerationEvent::Image {
                tensor: common::rgb_tensor(3, 2),
            },
            GenerationEvent::Completed,
        ]),
    );
    let system = start(fast_config(), service, None).await;

    let job = system.queue.enqueue(job("batch")).await?;
    let done = wait_for_status(&system.queue, job.id, JobStatus::Completed).await;

    let sizes: Vec<(u32, u32)> = done
        .results
        .iter()
        .map(|png| image::load_from_memory(png).unwrap())
        .map(|img| (img.width(), img.height()))
        .collect();
    assert_eq!(sizes, vec![(8, 8), (1, 1), (3, 2)]);

    system.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_request_carries_encoded_inputs() -> Result<(), Box<dyn Error>> {
    let service = StubService::new();
    let system = start(fast_config(), service.clone(), None).await;

    let job = Job::new("inpaint", GenerationConfig::with_seed(9))
        .with_negative_prompt("blurry")
        .with_canvas(common::png(4, 4))
        .with_mask(common::png(4, 4))
        .with_hint(Hint::new("depth", common::png(2, 2), 0.7));
    let job = system.queue.enqueue(job).await?;
    wait_for_status(&system.queue, job.id, JobStatus::Completed).await;

    let request = service.requests().pop().unwrap();
    assert_eq!(request.negative_prompt, "blurry");
    let canvas = tensor_codec::TensorHeader::parse(request.canvas.as_ref().unwrap())?;
    assert_eq!((canvas.height, canvas.width, canvas.channels), (4, 4, 3));
    assert!(request.mask.unwrap().starts_with(b"\x89PNG"));
    assert_eq!(request.hints["depth"][0].weight, 0.7);

    system.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_unconvertible_canvas_fails_job() -> Result<(), Box<dyn Error>> {
    let service = StubService::new();
    let system = start(fast_config(), service.clone(), None).await;

    let job = job("bad canvas").with_canvas(b"not an image".to_vec());
    let job = system.queue.enqueue(job).await?;
    let failed = wait_for_status(&system.queue, job.id, JobStatus::Failed).await;

    assert!(failed.error_message.unwrap().contains("Canvas"));
    assert_eq!(service.calls(), 0);

    system.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_events_follow_job_lifecycle() -> Result<(), Box<dyn Error>> {
    let system = start(fast_config(), StubService::new(), None).await;
    let mut events = system.queue.subscribe();

    let job = system.queue.enqueue(job("a cat")).await?;
    wait_for_status(&system.queue, job.id, JobStatus::Completed).await;

    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        if event.job_id() == Some(job.id) {
            kinds.push(match event {
                QueueEvent::JobEnqueued { .. } => "enqueued",
                QueueEvent::JobStarted { .. } => "started",
                QueueEvent::JobProgress { .. } => "progress",
                QueueEvent::JobCompleted { image_count, .. } => {
                    assert_eq!(image_count, 1);
                    "completed"
                }
                _ => "other",
            });
        }
    }
    assert_eq!(kinds, vec!["enqueued", "started", "progress", "completed"]);

    system.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_restore_resets_interrupted_jobs() -> Result<(), Box<dyn Error>> {
    let mut interrupted = job("interrupted");
    interrupted.start()?;
    let mut finished = job("finished");
    finished.start()?;
    finished.complete(vec![common::png(1, 1)])?;

    let store = Arc::new(MemoryStore::with_jobs(vec![
        interrupted.clone(),
        finished.clone(),
    ]));
    let system = start(
        fast_config().with_autostart(false),
        StubService::new(),
        Some(store.clone() as Arc<dyn JobStore>),
    )
    .await;

    let snapshot = system.queue.snapshot().await?;
    assert_eq!(snapshot.jobs.len(), 2);
    assert_eq!(snapshot.jobs[0].status, JobStatus::Pending);
    assert!(snapshot.jobs[0].started_at.is_none());
    assert_eq!(snapshot.jobs[1], finished);
    assert!(snapshot.current_job.is_none());

    let saved = store.jobs().await;
    assert_eq!(saved[0].status, JobStatus::Pending);

    system.queue.move_job(finished.id, 0).await?;
    assert_eq!(store.jobs().await[0].id, finished.id);

    system.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_file_store_survives_restart() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let config = || fast_config().with_autostart(false).with_state_dir(dir.path());

    let system = actors::start_system(config(), StubService::new()).await?;
    let queued = system.queue.enqueue(job("keep me")).await?;
    system.shutdown().await;

    let on_disk = StatePersistence::new(dir.path()).load().await?;
    assert_eq!(on_disk.len(), 1);

    let system = actors::start_system(config(), StubService::new()).await?;
    let restored = system.queue.get(queued.id).await?.unwrap();
    assert_eq!(restored.prompt, "keep me");
    assert_eq!(restored.configuration.seed(), Some(42));

    system.shutdown().await;
    Ok(())
}
