//! Shutdown coordination.

use crate::context::ContextEvent;
use crate::error::{Error, Result};
use crate::types::Event;

use super::TrackDownloader;

impl TrackDownloader {
    /// Gracefully shut down the downloader
    ///
    /// This method performs a cascading shutdown:
    /// 1. Emits done on the root context, which reaches every queue, job and transfer
    /// 2. Closes the queue: in-flight transfers pause and keep their partial files,
    ///    workers and the stall scheduler are collected
    /// 3. Closes the database pool
    /// 4. Emits [`Event::Shutdown`]
    ///
    /// Steps 1 and 2 are bounded by `shutdown_grace`; when it expires the remaining work is
    /// abandoned, the database is still closed and [`Error::TimedOut`] is returned.
    /// Calling it again after a successful shutdown is a no-op.
    pub async fn shutdown(&self) -> Result<()> {
        if self.db.is_closed() {
            return Ok(());
        }
        tracing::info!("Initiating graceful shutdown");

        let grace = self.config.download.shutdown_grace;
        let cascade = async {
            self.ctx.emit(ContextEvent::Done);
            self.queue.close().await
        };

        let result = match tokio::time::timeout(grace, cascade).await {
            Ok(result) => result,
            Err(_) => Err(Error::TimedOut(grace)),
        };

        match &result {
            Ok(()) => tracing::info!("Queue closed"),
            Err(Error::TimedOut(_)) => {
                tracing::error!(
                    grace_secs = grace.as_secs_f64(),
                    "Shutdown grace expired, abandoning remaining work"
                );
            }
            Err(e) => {
                // Queue restored its previous status; shutdown can be retried
                tracing::error!(error = %e, "Queue did not close cleanly");
                return result;
            }
        }

        self.db.close().await;
        self.emit_event(Event::Shutdown);
        tracing::info!("Shutdown complete");
        result
    }
}
