//! Core downloader implementation split into focused submodules.
//!
//! The `TrackDownloader` struct and its methods are organized by domain:
//! - [`enqueue`] - Single items, batches and collections
//! - [`control`] - Queue start/stop
//! - [`records`] - Progress, record browsing and queue stats
//! - [`lifecycle`] - Cascading shutdown
//! - [`download_task`] - Core download execution

mod control;
pub mod download_task;
mod enqueue;
mod lifecycle;
mod records;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::config::Config;
use crate::context::Context;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::producer::Producer;
use crate::queue::DownloadQueue;
use crate::resolver::MetadataResolver;
use crate::transfer::{HttpTransferAgent, TransferAgent};
use crate::types::Event;
use download_task::TaskDeps;

/// Main downloader instance (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct TrackDownloader {
    /// Database instance for persistence (wrapped in Arc for sharing across tasks)
    /// Public for integration tests to query record state
    pub db: Arc<Database>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Root of the cancellation tree; every queue, job and transfer hangs below it
    pub(crate) ctx: Context,
    /// Job queue with its worker pool and stall scheduler
    pub(crate) queue: Arc<DownloadQueue>,
    /// Resolves ids and collections into queued jobs
    pub(crate) producer: Arc<Producer>,
}

impl TrackDownloader {
    /// Create a downloader that fetches bytes over HTTP
    pub async fn new(config: Config, resolver: Arc<dyn MetadataResolver>) -> Result<Self> {
        let agent = HttpTransferAgent::new(config.transfer.clone())?;
        Self::with_agent(config, resolver, Arc::new(agent)).await
    }

    /// Create a downloader with a custom transfer agent
    ///
    /// This initializes all core components:
    /// - Validates the configuration and creates the download root
    /// - Opens/creates the SQLite database and runs migrations
    /// - Sets up the event broadcast channel and the root cancellation context
    /// - Wires the job queue (workers stay paused until [`start`](Self::start))
    pub async fn with_agent(
        config: Config,
        resolver: Arc<dyn MetadataResolver>,
        agent: Arc<dyn TransferAgent>,
    ) -> Result<Self> {
        config.validate()?;

        tokio::fs::create_dir_all(&config.download.root_dir)
            .await
            .map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to create download root '{}': {}",
                        config.download.root_dir.display(),
                        e
                    ),
                ))
            })?;

        let db = Arc::new(Database::new(&config.persistence.database_path).await?);

        // Buffer of 1000 events; slow subscribers see RecvError::Lagged
        let (event_tx, _rx) = broadcast::channel(1000);

        let config = Arc::new(config);
        let ctx = Context::root("trackfetch");

        let deps = TaskDeps {
            config: config.clone(),
            store: db.clone(),
            agent,
            event_tx: event_tx.clone(),
        };

        let queue = Arc::new(DownloadQueue::new(&ctx, db.clone(), deps));
        queue.init().await?;

        let producer = Arc::new(Producer::new(
            resolver,
            db.clone(),
            queue.clone(),
            config.clone(),
            event_tx.clone(),
        ));

        tracing::info!(
            root_dir = %config.download.root_dir.display(),
            queue = %config.queue.name,
            concurrency = config.queue.effective_concurrency(),
            "track downloader initialized"
        );

        Ok(Self {
            db,
            event_tx,
            config,
            ctx,
            queue,
            producer,
        })
    }

    /// Subscribe to download events
    ///
    /// Multiple subscribers are supported. Each subscriber receives all events independently.
    /// Events are buffered, but if a subscriber falls behind by more than 1000 events,
    /// it will receive a `RecvError::Lagged` error.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Get the current configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    pub(crate) fn emit_event(&self, event: Event) {
        // send() only fails when nobody is subscribed
        self.event_tx.send(event).ok();
    }
}
