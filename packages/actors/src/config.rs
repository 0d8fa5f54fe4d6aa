//! Runtime configuration for the queue system.

use std::path::PathBuf;
use std::time::Duration;

/// Processor polling and timeout settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorConfig {
    /// Wait while the queue is paused.
    pub pause_poll_interval: Duration,
    /// Wait while the server is unreachable.
    pub reconnect_poll_interval: Duration,
    /// Wait while there is nothing to do.
    pub idle_poll_interval: Duration,
    /// Wait when the next pending job was already attempted in this run.
    pub dedupe_poll_interval: Duration,
    /// Upper bound for one generation. `None` waits forever.
    pub job_timeout: Option<Duration>,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            pause_poll_interval: Duration::from_millis(500),
            reconnect_poll_interval: Duration::from_secs(1),
            idle_poll_interval: Duration::from_millis(500),
            dedupe_poll_interval: Duration::from_millis(100),
            job_timeout: None,
        }
    }
}

impl ProcessorConfig {
    /// Defaults overridden by `GENQ_JOB_TIMEOUT_SECS` and `GENQ_IDLE_POLL_MS`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(secs) = env_u64("GENQ_JOB_TIMEOUT_SECS") {
            config.job_timeout = Some(Duration::from_secs(secs));
        }
        if let Some(ms) = env_u64("GENQ_IDLE_POLL_MS") {
            config.idle_poll_interval = Duration::from_millis(ms);
        }
        config
    }

    /// Use the same interval for every kind of wait.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.pause_poll_interval = interval;
        self.reconnect_poll_interval = interval;
        self.idle_poll_interval = interval;
        self.dedupe_poll_interval = interval;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = Some(timeout);
        self
    }
}

/// Settings for [`start_system`](crate::start_system).
#[derive(Debug, Clone)]
pub struct SystemConfig {
    /// Directory for `jobs.json`. `None` keeps the queue in memory.
    pub state_dir: Option<PathBuf>,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
    /// Start polling immediately.
    pub autostart: bool,
    pub processor: ProcessorConfig,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            state_dir: None,
            event_capacity: 1000,
            autostart: true,
            processor: ProcessorConfig::default(),
        }
    }
}

impl SystemConfig {
    /// Defaults overridden by `GENQ_STATE_DIR` and the processor variables.
    pub fn from_env() -> Self {
        Self {
            state_dir: std::env::var_os("GENQ_STATE_DIR").map(PathBuf::from),
            processor: ProcessorConfig::from_env(),
            ..Self::default()
        }
    }

    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = Some(dir.into());
        self
    }

    pub fn with_autostart(mut self, autostart: bool) -> Self {
        self.autostart = autostart;
        self
    }

    pub fn with_processor(mut self, processor: ProcessorConfig) -> Self {
        self.processor = processor;
        self
    }
}

fn env_u64(key: &str) -> Option<u64> {
    let value = std::env::var(key).ok()?;
    match value.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!("Ignoring {}={:?}: not a number", key, value);
            None
        }
    }
}
