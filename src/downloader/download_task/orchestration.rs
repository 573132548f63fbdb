//! Download task orchestration: top-level lifecycle of a single item download.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::context::ContextEvent;
use crate::transfer::{StartFrom, TransferEvent, TransferRequest};
use crate::types::{Event, RunMode, TaskState};

use super::checksum::{checksum_matches, file_md5};
use super::context::{DownloadTask, TaskReport};
use super::finalization::TransferEnd;

/// Limits record writes for progress events to one per interval
pub(super) struct ProgressThrottle {
    interval: Duration,
    last_write: Option<Instant>,
    last_percent: Option<u8>,
}

impl ProgressThrottle {
    pub(super) fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_write: None,
            last_percent: None,
        }
    }

    /// Percent to persist for this report, if any
    pub(super) fn percent(&mut self, received: u64, total: u64) -> Option<u8> {
        let percent = if total == 0 {
            0
        } else {
            (received.saturating_mul(100) / total).min(100) as u8
        };

        if self.last_percent == Some(percent) {
            return None;
        }
        if percent < 100
            && self
                .last_write
                .is_some_and(|last| last.elapsed() < self.interval)
        {
            return None;
        }

        self.last_write = Some(Instant::now());
        self.last_percent = Some(percent);
        Some(percent)
    }
}

impl DownloadTask {
    /// Run the task to a terminal state
    ///
    /// Phases:
    /// 1. Create the target directory
    /// 2. Skip if the file on disk already matches the source checksum
    /// 3. Pick the start position (resume from the bytes on disk or start over)
    /// 4. Run the transfer, racing it against the job context
    /// 5. Verify the checksum and write the terminal state
    ///
    /// Never panics on failure: storage errors end the task as [`TaskState::Error`] with
    /// the error attached to the report.
    pub async fn run(&self, mode: RunMode) -> TaskReport {
        match self.execute(mode).await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!(item_id = %self.item_id(), error = %e, "download task failed");
                let detail = e.to_string();
                let written = self
                    .record
                    .finish(|record| {
                        record.set_state_with_detail(TaskState::Error, detail);
                        record.target_checksum = None;
                    })
                    .await;
                if let Err(write_err) = written {
                    tracing::warn!(
                        item_id = %self.item_id(),
                        error = %write_err,
                        "failed to record task failure"
                    );
                }
                TaskReport::failure(TaskState::Error, e)
            }
        }
    }

    async fn execute(&self, mode: RunMode) -> Result<TaskReport> {
        // Phase 1: target directory
        if let Some(dir) = self.target.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }

        // Phase 2: already complete on disk
        if let Some(report) = self.skip_if_complete().await? {
            return Ok(report);
        }

        if self.ctx.is_done() {
            return self
                .finish_cancelled("cancelled before transfer started".to_string())
                .await;
        }

        // Phase 3: start position
        let start = self.start_position(mode).await;
        let initial_percent = match start {
            StartFrom::Offset(offset) if self.job.source_size > 0 => {
                (offset.saturating_mul(100) / self.job.source_size).min(100) as i64
            }
            _ => 0,
        };
        self.record
            .update(|record| {
                record.set_state(TaskState::Downloading);
                record.target_checksum = None;
                record.download_progress = initial_percent;
            })
            .await?;

        tracing::info!(
            item_id = %self.item_id(),
            target = %self.target.display(),
            start = ?start,
            "starting transfer"
        );

        // Phase 4: transfer
        let (end, cancelled) = self.transfer(start).await?;

        // Phase 5: terminal state
        self.finalize(end, cancelled).await
    }

    /// A target whose MD5 already equals the source checksum is never fetched again
    async fn skip_if_complete(&self) -> Result<Option<TaskReport>> {
        let Ok(metadata) = tokio::fs::metadata(&self.target).await else {
            return Ok(None);
        };
        if !metadata.is_file() {
            return Ok(None);
        }

        let actual = file_md5(self.target.clone()).await?;
        if !checksum_matches(&self.job.source_checksum, &actual) {
            tracing::debug!(
                item_id = %self.item_id(),
                expected = %self.job.source_checksum,
                actual = %actual,
                "existing file does not match source checksum"
            );
            return Ok(None);
        }

        let size = metadata.len() as i64;
        let written = self
            .record
            .finish(|record| {
                record.set_state(TaskState::Skipped);
                record.target_checksum = Some(actual);
                record.target_size = size;
                record.download_progress = 100;
            })
            .await?;

        if written {
            tracing::info!(item_id = %self.item_id(), "file already complete, skipping download");
        }
        Ok(Some(TaskReport::success(TaskState::Skipped)))
    }

    async fn start_position(&self, mode: RunMode) -> StartFrom {
        let existing = tokio::fs::metadata(&self.target)
            .await
            .map(|meta| meta.len())
            .unwrap_or(0);

        match mode {
            RunMode::Resume if existing > 0 && existing < self.job.source_size => {
                StartFrom::Offset(existing)
            }
            RunMode::Resume if existing > 0 => {
                tracing::debug!(
                    item_id = %self.item_id(),
                    existing,
                    expected = self.job.source_size,
                    "existing file is not a usable prefix, overwriting"
                );
                StartFrom::Beginning
            }
            _ => StartFrom::Beginning,
        }
    }

    /// Run the agent until it returns or the job context cancels it.
    /// Returns how the transfer ended and whether a cancellation was requested.
    async fn transfer(&self, start: StartFrom) -> Result<(TransferEnd, bool)> {
        let transfer_ctx = self.ctx.child(format!("{}/transfer", self.ctx.name()));
        let pause = CancellationToken::new();
        let active = Arc::new(AtomicBool::new(true));
        let cancelled = Arc::new(AtomicBool::new(false));

        {
            let pause = pause.clone();
            let active = active.clone();
            let cancelled = cancelled.clone();
            transfer_ctx.once(ContextEvent::Done, move || {
                if active.load(Ordering::SeqCst) {
                    cancelled.store(true, Ordering::SeqCst);
                    pause.cancel();
                }
            });
        }

        let request = TransferRequest {
            url: self.job.source_url.clone(),
            target: self.target.clone(),
            expected_size: self.job.source_size,
            start,
        };

        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let agent = self.deps.agent.clone();
        let transfer = agent.start(request, event_tx, pause.clone());
        tokio::pin!(transfer);

        let mut throttle = ProgressThrottle::new(self.deps.config.transfer.progress_interval);
        let grace = self.deps.config.download.cancel_grace;

        let end = loop {
            tokio::select! {
                biased;
                result = &mut transfer => break TransferEnd::Returned(result),
                Some(event) = event_rx.recv() => self.on_transfer_event(event, &mut throttle).await?,
                _ = pause.cancelled() => {
                    tracing::debug!(item_id = %self.item_id(), "cancel requested, pausing transfer");
                    break match tokio::time::timeout(grace, &mut transfer).await {
                        Ok(result) => TransferEnd::Returned(result),
                        Err(_) => TransferEnd::Abandoned,
                    };
                }
            }
        };

        active.store(false, Ordering::SeqCst);
        transfer_ctx.emit(ContextEvent::Done);

        while let Ok(event) = event_rx.try_recv() {
            self.on_transfer_event(event, &mut throttle).await?;
        }

        Ok((end, cancelled.load(Ordering::SeqCst)))
    }

    async fn on_transfer_event(
        &self,
        event: TransferEvent,
        throttle: &mut ProgressThrottle,
    ) -> Result<()> {
        let item_id = self.item_id();
        match event {
            TransferEvent::Download { offset, total } => {
                tracing::debug!(item_id = %item_id, offset, total, "transfer accepted");
            }
            TransferEvent::Progress { received, total } => {
                if let Some(percent) = throttle.percent(received, total) {
                    let written = self
                        .record
                        .update(|record| record.download_progress = i64::from(percent))
                        .await?;
                    if written {
                        self.emit(Event::Progress {
                            item_id: item_id.clone(),
                            percent,
                        });
                    }
                }
            }
            TransferEvent::Resume { offset, attempt } => {
                tracing::info!(item_id = %item_id, offset, attempt, "transfer resumed");
                self.record
                    .update(|record| {
                        record.set_state_with_detail(
                            TaskState::Downloading,
                            format!("resumed at byte {} (attempt {})", offset, attempt),
                        )
                    })
                    .await?;
            }
            TransferEvent::Retry { attempt } => {
                tracing::debug!(item_id = %item_id, attempt, "transfer request retried");
            }
            TransferEvent::Skip => {
                tracing::debug!(item_id = %item_id, "nothing left to fetch");
            }
            TransferEvent::Pause { received } => {
                tracing::debug!(item_id = %item_id, received, "transfer paused");
            }
            TransferEvent::End { bytes } => {
                tracing::debug!(item_id = %item_id, bytes, "transfer ended");
            }
            TransferEvent::Error { message } => {
                tracing::warn!(item_id = %item_id, error = %message, "transfer failed");
            }
        }
        Ok(())
    }
}
