//! Queue control: let workers pull jobs or pause them.

use crate::error::Result;
use crate::types::QueueStatus;

use super::TrackDownloader;

impl TrackDownloader {
    /// Start pulling jobs from the queue
    ///
    /// Idempotent. Fails once the downloader has been shut down.
    pub async fn start(&self) -> Result<()> {
        self.queue.start().await
    }

    /// Stop pulling new jobs
    ///
    /// Jobs already running are not interrupted; they finish (or time out) on their own.
    pub async fn stop(&self) -> Result<()> {
        self.queue.stop().await
    }

    /// Current queue lifecycle status
    pub fn status(&self) -> QueueStatus {
        self.queue.status()
    }
}
