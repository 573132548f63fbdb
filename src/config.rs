//! Configuration types for trackfetch

use crate::error::{Error, Result};
use crate::types::RunMode;
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Download behavior configuration (target root, run mode, job timeout)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Root directory for `<artist>/<album>/<title>.<ext>` (default: "./downloads")
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,

    /// How a task treats an existing file whose checksum does not match (default: resume)
    #[serde(default)]
    pub run_mode: RunMode,

    /// Per-job timeout raced against the download task (default: 120 seconds)
    #[serde(default = "default_job_timeout", with = "duration_ms_serde")]
    pub job_timeout: Duration,

    /// How long a cancelled task may take to pause before it is abandoned (default: 5 seconds)
    #[serde(default = "default_cancel_grace", with = "duration_ms_serde")]
    pub cancel_grace: Duration,

    /// Hard limit on the whole cascading shutdown (default: 30 seconds)
    #[serde(default = "default_shutdown_grace", with = "duration_ms_serde")]
    pub shutdown_grace: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            run_mode: RunMode::default(),
            job_timeout: default_job_timeout(),
            cancel_grace: default_cancel_grace(),
            shutdown_grace: default_shutdown_grace(),
        }
    }
}

/// Transfer agent configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Per-request retry policy (default: 3 attempts, 100ms base delay)
    #[serde(default)]
    pub retry: RetryConfig,

    /// Minimum interval between progress reports (default: 1 second)
    #[serde(default = "default_progress_interval", with = "duration_ms_serde")]
    pub progress_interval: Duration,

    /// Maximum byte-range continuations after an incomplete body (default: 5)
    #[serde(default = "default_resume_attempts")]
    pub resume_attempts: u32,

    /// TCP connect timeout (default: 30 seconds)
    #[serde(default = "default_connect_timeout", with = "duration_ms_serde")]
    pub connect_timeout: Duration,

    /// Abort a body stream that yields nothing for this long (default: 60 seconds)
    #[serde(default = "default_idle_timeout", with = "duration_ms_serde")]
    pub idle_timeout: Duration,

    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            progress_interval: default_progress_interval(),
            resume_attempts: default_resume_attempts(),
            connect_timeout: default_connect_timeout(),
            idle_timeout: default_idle_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

/// Retry configuration for transient transfer failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 100 milliseconds)
    #[serde(default = "default_initial_delay", with = "duration_ms_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 10 seconds)
    #[serde(default = "default_max_delay", with = "duration_ms_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Job queue and worker pool configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Queue name; jobs are partitioned by it in the broker (default: "downloads")
    #[serde(default = "default_queue_name")]
    pub name: String,

    /// Worker pool size (default: host CPU count)
    #[serde(default)]
    pub concurrency: Option<usize>,

    /// Delivery attempts per job before it is marked failed (default: 5)
    #[serde(default = "default_job_attempts")]
    pub job_attempts: u32,

    /// Base delay of the exponential redelivery backoff (default: 1 second)
    #[serde(default = "default_job_backoff", with = "duration_ms_serde")]
    pub job_backoff: Duration,

    /// How often expired leases are returned to the waiting set (default: 30 seconds)
    #[serde(default = "default_stall_interval", with = "duration_ms_serde")]
    pub stall_interval: Duration,

    /// Idle poll interval of the worker pool when no job is ready (default: 200 milliseconds)
    #[serde(default = "default_poll_interval", with = "duration_ms_serde")]
    pub poll_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: default_queue_name(),
            concurrency: None,
            job_attempts: default_job_attempts(),
            job_backoff: default_job_backoff(),
            stall_interval: default_stall_interval(),
            poll_interval: default_poll_interval(),
        }
    }
}

impl QueueConfig {
    /// Configured concurrency, or the host CPU count when unset
    pub fn effective_concurrency(&self) -> usize {
        self.concurrency
            .filter(|c| *c > 0)
            .unwrap_or_else(host_parallelism)
    }
}

/// Producer configuration (collection paging)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProducerConfig {
    /// Items per collection page (default: 100)
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Pages resolved concurrently (default: host CPU count)
    #[serde(default)]
    pub page_concurrency: Option<usize>,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            page_concurrency: None,
        }
    }
}

impl ProducerConfig {
    /// Configured page concurrency, or the host CPU count when unset
    pub fn effective_page_concurrency(&self) -> usize {
        self.page_concurrency
            .filter(|c| *c > 0)
            .unwrap_or_else(host_parallelism)
    }
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Database path (default: "./trackfetch.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Main configuration for TrackDownloader
///
/// Download settings are flattened into the top level; the other groups are nested:
/// - [`download`](DownloadConfig) - target root, run mode, timeouts
/// - [`transfer`](TransferConfig) - HTTP retry, resume and progress settings
/// - [`queue`](QueueConfig) - worker pool and broker retry policy
/// - [`producer`](ProducerConfig) - collection paging
/// - [`persistence`](PersistenceConfig) - database location
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Download behavior settings
    #[serde(flatten)]
    pub download: DownloadConfig,

    /// Transfer agent settings
    #[serde(default)]
    pub transfer: TransferConfig,

    /// Job queue settings
    #[serde(default)]
    pub queue: QueueConfig,

    /// Producer settings
    #[serde(default)]
    pub producer: ProducerConfig,

    /// Data storage
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl Config {
    /// Lease granted to a worker for one job: 1.25 × the per-job timeout
    pub fn lease_duration(&self) -> Duration {
        self.download.job_timeout.mul_f64(1.25)
    }

    /// Reject settings the queue cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.download.job_timeout.is_zero() {
            return Err(Error::Config {
                message: "job_timeout must be greater than zero".to_string(),
                key: Some("job_timeout".to_string()),
            });
        }
        if self.queue.job_attempts == 0 {
            return Err(Error::Config {
                message: "job_attempts must be at least 1".to_string(),
                key: Some("queue.job_attempts".to_string()),
            });
        }
        if self.queue.stall_interval.is_zero() {
            return Err(Error::Config {
                message: "stall_interval must be greater than zero".to_string(),
                key: Some("queue.stall_interval".to_string()),
            });
        }
        if self.producer.page_size == 0 {
            return Err(Error::Config {
                message: "page_size must be at least 1".to_string(),
                key: Some("producer.page_size".to_string()),
            });
        }
        if self.queue.name.trim().is_empty() {
            return Err(Error::Config {
                message: "queue name must not be empty".to_string(),
                key: Some("queue.name".to_string()),
            });
        }
        Ok(())
    }
}

fn host_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

// Default value functions
fn default_root_dir() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_database_path() -> PathBuf {
    PathBuf::from("trackfetch.db")
}

fn default_job_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_cancel_grace() -> Duration {
    Duration::from_secs(5)
}

fn default_shutdown_grace() -> Duration {
    Duration::from_secs(30)
}

fn default_progress_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_resume_attempts() -> u32 {
    5
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_idle_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_user_agent() -> String {
    format!("trackfetch/{}", env!("CARGO_PKG_VERSION"))
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_millis(100)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(10)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_queue_name() -> String {
    "downloads".to_string()
}

fn default_job_attempts() -> u32 {
    5
}

fn default_job_backoff() -> Duration {
    Duration::from_secs(1)
}

fn default_stall_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(200)
}

fn default_page_size() -> usize {
    100
}

// Durations are stored as whole milliseconds
mod duration_ms_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
