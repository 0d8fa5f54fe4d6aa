//! Job list persistence.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use gen_core::Job;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;

/// Future returned by [`JobStore`] operations.
pub type StoreFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, PersistenceError>> + Send + 'a>>;

/// Storage for the full job list.
///
/// The queue loads once at startup and saves the whole list after every
/// mutation. Images travel as raw bytes inside the jobs.
pub trait JobStore: Send + Sync + 'static {
    /// Load all jobs in queue order. An empty store yields an empty list.
    fn load(&self) -> StoreFuture<'_, Vec<Job>>;

    /// Replace the stored jobs.
    fn save(&self, jobs: Vec<Job>) -> StoreFuture<'_, ()>;
}

/// File-based job store.
///
/// Keeps the queue in `<base_dir>/jobs.json`, written through a temp file
/// and a rename so a crash never leaves a half-written list behind.
pub struct StatePersistence {
    /// Base directory for state files.
    base_dir: PathBuf,
}

impl StatePersistence {
    const FILE_NAME: &'static str = "jobs.json";

    /// Create a new persistence instance.
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    /// Create persistence with default data directory.
    pub fn default_dir() -> Self {
        Self::new("./data/queue")
    }

    /// Path of the job list file.
    pub fn path(&self) -> PathBuf {
        self.base_dir.join(Self::FILE_NAME)
    }

    /// Ensure the base directory exists.
    pub async fn init(&self) -> Result<(), PersistenceError> {
        fs::create_dir_all(&self.base_dir).await?;
        Ok(())
    }

    /// Write the job list to disk.
    pub async fn save_jobs(&self, jobs: &[Job]) -> Result<(), PersistenceError> {
        self.init().await?;

        let path = self.path();
        let json = serde_json::to_string(jobs)?;

        // Write to temp file first, then rename for atomicity
        let temp_path = self.base_dir.join(format!("{}.tmp", Self::FILE_NAME));
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(json.as_bytes()).await?;
        file.sync_all().await?;
        fs::rename(&temp_path, &path).await?;

        tracing::debug!("Saved {} jobs to {:?}", jobs.len(), path);
        Ok(())
    }

    /// Read the job list from disk. A missing file is an empty queue.
    pub async fn load_jobs(&self) -> Result<Vec<Job>, PersistenceError> {
        let path = self.path();

        if !fs::try_exists(&path).await? {
            return Ok(Vec::new());
        }

        let mut file = fs::File::open(&path).await?;
        let mut json = String::new();
        file.read_to_string(&mut json).await?;

        let jobs: Vec<Job> = serde_json::from_str(&json)?;
        tracing::debug!("Loaded {} jobs from {:?}", jobs.len(), path);

        Ok(jobs)
    }
}

impl JobStore for StatePersistence {
    fn load(&self) -> StoreFuture<'_, Vec<Job>> {
        Box::pin(self.load_jobs())
    }

    fn save(&self, jobs: Vec<Job>) -> StoreFuture<'_, ()> {
        Box::pin(async move { self.save_jobs(&jobs).await })
    }
}

/// In-memory job store, for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryStore {
    jobs: Mutex<Vec<Job>>,
    saves: Mutex<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with `jobs` already stored.
    pub fn with_jobs(jobs: Vec<Job>) -> Self {
        Self {
            jobs: Mutex::new(jobs),
            saves: Mutex::new(0),
        }
    }

    /// Currently stored jobs.
    pub async fn jobs(&self) -> Vec<Job> {
        self.jobs.lock().await.clone()
    }

    /// Number of saves since creation.
    pub async fn save_count(&self) -> usize {
        *self.saves.lock().await
    }
}

impl JobStore for MemoryStore {
    fn load(&self) -> StoreFuture<'_, Vec<Job>> {
        Box::pin(async move { Ok(self.jobs.lock().await.clone()) })
    }

    fn save(&self, jobs: Vec<Job>) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            *self.jobs.lock().await = jobs;
            *self.saves.lock().await += 1;
            Ok(())
        })
    }
}

/// Persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use gen_core::{GenerationConfig, JobStatus};

    #[tokio::test]
    async fn missing_file_is_empty_queue() {
        let dir = tempfile::tempdir().unwrap();
        let store = StatePersistence::new(dir.path());
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn saved_jobs_load_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = StatePersistence::new(dir.path().join("nested"));

        let first = Job::new("a cat", GenerationConfig::with_seed(1)).with_canvas(vec![1, 2, 3]);
        let mut second = Job::new("a dog", GenerationConfig::with_seed(2));
        second.start().unwrap();

        store.save(vec![first.clone(), second.clone()]).await.unwrap();
        let loaded = store.load().await.unwrap();

        assert_eq!(loaded, vec![first, second]);
        assert_eq!(loaded[1].status, JobStatus::Processing);
        assert!(!dir.path().join("nested/jobs.json.tmp").exists());
    }

    #[tokio::test]
    async fn corrupt_file_is_json_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("jobs.json"), "{ not json").unwrap();
        let store = StatePersistence::new(dir.path());

        assert!(matches!(store.load().await, Err(PersistenceError::Json(_))));
    }

    #[tokio::test]
    async fn memory_store_counts_saves() {
        let store = MemoryStore::new();
        store.save(vec![Job::new("x", GenerationConfig::default())]).await.unwrap();
        assert_eq!(store.save_count().await, 1);
        assert_eq!(store.jobs().await.len(), 1);
    }
}
