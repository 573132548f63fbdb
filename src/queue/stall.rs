//! Stalled-job detection.

use crate::context::Context;
use crate::db::JobBroker;
use crate::error::{Error, Result};
use std::sync::Arc;
use std::time::Duration;

/// Background task that returns expired leases to the waiting set
pub(crate) struct StallScheduler {
    handle: tokio::task::JoinHandle<()>,
}

impl StallScheduler {
    /// Spawn the scheduler; it stops when `ctx` goes done
    pub(crate) fn spawn(
        broker: Arc<dyn JobBroker>,
        queue: String,
        interval: Duration,
        ctx: Context,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ctx.done() => break,
                    _ = ticker.tick() => {
                        match broker.requeue_stalled(&queue).await {
                            Ok(0) => {}
                            Ok(count) => {
                                tracing::info!(queue = %queue, count, "returned stalled jobs to the queue");
                            }
                            Err(e) => {
                                tracing::warn!(queue = %queue, error = %e, "stalled job check failed");
                            }
                        }
                    }
                }
            }

            tracing::debug!(queue = %queue, "stall scheduler stopped");
        });

        Self { handle }
    }

    /// Wait for the scheduler to exit (its context must be done)
    pub(crate) async fn shutdown(self) -> Result<()> {
        self.handle
            .await
            .map_err(|e| Error::Other(format!("stall scheduler failed: {}", e)))
    }
}
