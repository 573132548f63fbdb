//! # trackfetch
//!
//! Backend library for bulk music downloads: resolves tracks and collections, queues one
//! durable job per track and runs the jobs through a worker pool that resumes partial
//! files, verifies checksums and shuts down cooperatively.
//!
//! ## Design Philosophy
//!
//! trackfetch is designed to be:
//! - **Idempotent** - Re-running a collection only downloads what is missing or failed
//! - **Resumable** - Cancelled transfers keep their bytes and continue with a byte range
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Event-driven** - Consumers subscribe to events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use trackfetch::{Config, StaticResolver, TrackDownloader};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let resolver = Arc::new(StaticResolver::new());
//!     let downloader = TrackDownloader::new(Config::default(), resolver).await?;
//!
//!     // Subscribe to events
//!     let mut events = downloader.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     downloader.enqueue_collection("playlist-42").await?;
//!     downloader.start().await?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Hierarchical cancellation contexts
pub mod context;
/// Database persistence layer
pub mod db;
/// Batch deduplication against persisted records
pub mod dedup;
/// Core downloader implementation (decomposed into focused submodules)
pub mod downloader;
/// Error types
pub mod error;
/// Resolves ids and collections into queued jobs
pub mod producer;
/// Durable job queue, worker pool and stall scheduler
pub mod queue;
/// Fixed-window rate limiting for job starts
pub mod rate_limiter;
/// Metadata and source lookup seam
pub mod resolver;
/// Retry logic with exponential backoff
pub mod retry;
/// Byte transfer agents
pub mod transfer;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use config::{Config, DownloadConfig, ProducerConfig, QueueConfig, TransferConfig};
pub use context::{Context, ContextEvent};
pub use db::{Database, ItemRecord};
pub use downloader::TrackDownloader;
pub use error::{DatabaseError, Error, ErrorKind, Result, TransferError};
pub use producer::EnqueueSummary;
pub use resolver::{MetadataResolver, StaticResolver};
pub use transfer::{HttpTransferAgent, TransferAgent};
pub use types::{
    Event, ItemId, ItemProgress, QueueStats, QueueStatus, ResolvedItem, RunMode, SourceInfo,
    StateBucket, TaskState,
};

/// Helper function to run the downloader with graceful signal handling.
///
/// Waits for a termination signal and then calls the downloader's `shutdown()` method,
/// which cascades done through every queue, job and transfer within `shutdown_grace`.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use trackfetch::{Config, StaticResolver, TrackDownloader, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let resolver = Arc::new(StaticResolver::new());
///     let downloader = TrackDownloader::new(Config::default(), resolver).await?;
///     downloader.start().await?;
///
///     // Run with automatic signal handling
///     run_with_shutdown(downloader).await?;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(downloader: TrackDownloader) -> Result<()> {
    wait_for_signal().await;
    downloader.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration can fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
