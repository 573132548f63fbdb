//! Test configuration helpers for creating downloaders over a temp directory

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use trackfetch::config::{PersistenceConfig, RetryConfig};
use trackfetch::{Config, DownloadConfig, QueueConfig, StaticResolver, TrackDownloader, TransferConfig};

/// Config rooted in `dir` with short timers and no per-request retries
pub fn fast_config(dir: &Path) -> Config {
    Config {
        download: DownloadConfig {
            root_dir: dir.join("music"),
            job_timeout: Duration::from_secs(10),
            cancel_grace: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(10),
            ..Default::default()
        },
        transfer: TransferConfig {
            retry: RetryConfig {
                max_attempts: 1,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(1),
                backoff_multiplier: 2.0,
                jitter: false,
            },
            progress_interval: Duration::from_millis(0),
            idle_timeout: Duration::from_secs(5),
            ..Default::default()
        },
        queue: QueueConfig {
            concurrency: Some(2),
            job_attempts: 1,
            job_backoff: Duration::from_millis(10),
            stall_interval: Duration::from_millis(200),
            poll_interval: Duration::from_millis(10),
            ..Default::default()
        },
        persistence: PersistenceConfig {
            database_path: dir.join("trackfetch.db"),
        },
        ..Default::default()
    }
}

/// Create an HTTP-backed downloader over a fresh temp directory
///
/// Returns the downloader, its resolver and the temp directory (keep temp_dir alive for
/// the test duration)
pub async fn create_test_downloader() -> (TrackDownloader, Arc<StaticResolver>, TempDir) {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let resolver = Arc::new(StaticResolver::new());
    let downloader = TrackDownloader::new(fast_config(temp_dir.path()), resolver.clone())
        .await
        .expect("Failed to create downloader");
    (downloader, resolver, temp_dir)
}
