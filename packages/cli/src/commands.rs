//! Command implementations.

use std::path::{Path, PathBuf};

use actors::{StatePersistence, SystemConfig};
use anyhow::{Context, Result};
use gen_core::{Job, JobId, JobStatus, QueueStats};
use serde_json::json;
use tensor_codec::{ModelFamily, TensorHeader};

pub fn inspect(path: &Path) -> Result<()> {
    let bytes = read(path)?;
    let header = TensorHeader::parse(&bytes)
        .with_context(|| format!("{} is not a tensor", path.display()))?;
    println!("{}", describe(&header, bytes.len()));
    Ok(())
}

pub fn encode(input: &Path, output: &Path, force_rgb: bool) -> Result<()> {
    let image = read(input)?;
    let tensor = tensor_codec::encode(&image, force_rgb)
        .with_context(|| format!("failed to encode {}", input.display()))?;
    write(output, &tensor)?;

    if let Ok(header) = TensorHeader::parse(&tensor) {
        tracing::info!("Wrote {}", describe(&header, tensor.len()));
    }
    Ok(())
}

pub fn decode(input: &Path, output: &Path, family: Option<ModelFamily>) -> Result<()> {
    let tensor = read(input)?;
    let png = tensor_codec::decode_to_png(&tensor, family)
        .with_context(|| format!("failed to decode {}", input.display()))?;
    write(output, &png)?;

    tracing::info!("Wrote {} ({} bytes)", output.display(), png.len());
    Ok(())
}

pub async fn jobs(
    state_dir: Option<PathBuf>,
    status: Option<JobStatus>,
    job_id: Option<&str>,
    json: bool,
) -> Result<()> {
    let job_id = job_id
        .map(|id| JobId::parse(id).with_context(|| format!("invalid job id {:?}", id)))
        .transpose()?;
    let store = match state_dir.or(SystemConfig::from_env().state_dir) {
        Some(dir) => StatePersistence::new(dir),
        None => StatePersistence::default_dir(),
    };
    let jobs = store
        .load_jobs()
        .await
        .with_context(|| format!("failed to read {}", store.path().display()))?;

    let selected: Vec<&Job> = jobs
        .iter()
        .filter(|job| status.is_none_or(|s| job.status == s))
        .filter(|job| job_id.is_none_or(|id| job.id == id))
        .collect();

    if json {
        let summaries: Vec<_> = selected.iter().map(|job| summary(job)).collect();
        println!("{}", serde_json::to_string_pretty(&summaries)?);
    } else {
        for job in &selected {
            println!("{}", job_line(job));
        }
        println!("{}", stats_line(&QueueStats::from_jobs(jobs.iter())));
    }
    Ok(())
}

fn read(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}

fn write(path: &Path, bytes: &[u8]) -> Result<()> {
    std::fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))
}

fn describe(header: &TensorHeader, len: usize) -> String {
    format!(
        "{}x{}x{} f16 NHWC, {} bytes{}",
        header.height,
        header.width,
        header.channels,
        len,
        if header.is_compressed() { ", compressed" } else { "" }
    )
}

fn job_line(job: &Job) -> String {
    let mut line = format!("{}  {:<10}  {}", job.id, job.status, truncate(&job.prompt, 48));
    if let Some(progress) = &job.progress {
        line.push_str(&format!(
            "  [{}/{} {:.0}%]",
            progress.current_step,
            progress.total_steps,
            progress.fraction() * 100.0
        ));
    }
    if job.retry_count > 0 {
        line.push_str(&format!("  (retries: {})", job.retry_count));
    }
    if let Some(error) = &job.error_message {
        line.push_str(&format!("  error: {}", error));
    }
    line
}

fn stats_line(stats: &QueueStats) -> String {
    format!(
        "{} pending, {} processing, {} completed, {} failed, {} cancelled",
        stats.pending, stats.processing, stats.completed, stats.failed, stats.cancelled
    )
}

fn summary(job: &Job) -> serde_json::Value {
    json!({
        "id": job.id,
        "status": job.status,
        "prompt": job.prompt,
        "seed": job.configuration.seed(),
        "retry_count": job.retry_count,
        "progress": job.progress.as_ref().map(|p| p.fraction()),
        "error_message": job.error_message,
        "result_count": job.results.len(),
        "created_at": job.created_at,
        "completed_at": job.completed_at,
    })
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}
