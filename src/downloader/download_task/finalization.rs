//! Download task finalization: checksum gate and terminal state.

use crate::error::{Error, Result, TransferError};
use crate::transfer::TransferOutcome;
use crate::types::TaskState;

use super::checksum::{checksum_matches, file_md5};
use super::context::{DownloadTask, TaskReport};

/// How the transfer phase ended
#[derive(Debug)]
pub(super) enum TransferEnd {
    /// The agent returned
    Returned(std::result::Result<TransferOutcome, TransferError>),
    /// Cancelled, and the agent did not pause within the grace period
    Abandoned,
}

impl DownloadTask {
    /// Map the transfer result to the terminal state and write it
    pub(super) async fn finalize(&self, end: TransferEnd, cancelled: bool) -> Result<TaskReport> {
        match end {
            TransferEnd::Returned(Ok(TransferOutcome::Completed { bytes })) => {
                self.verify(bytes).await
            }
            TransferEnd::Returned(Ok(TransferOutcome::Paused { bytes })) => {
                self.finish_cancelled(format!("download cancelled after {} bytes", bytes))
                    .await
            }
            TransferEnd::Abandoned => {
                self.finish_cancelled("transfer did not pause in time".to_string())
                    .await
            }
            TransferEnd::Returned(Err(e)) if cancelled => {
                tracing::debug!(item_id = %self.item_id(), error = %e, "transfer failed while cancelling");
                self.finish_cancelled(TaskState::Cancel.description().to_string())
                    .await
            }
            TransferEnd::Returned(Err(TransferError::Write { path, source })) => {
                // The filesystem is gone; surfaces as a storage error
                Err(Error::Io(std::io::Error::new(
                    source.kind(),
                    format!("failed to write {}: {}", path.display(), source),
                )))
            }
            TransferEnd::Returned(Err(e @ TransferError::Timeout(_))) => {
                self.finish_failed(TaskState::Timeout, Error::Transfer(e))
                    .await
            }
            TransferEnd::Returned(Err(e)) => {
                self.finish_failed(TaskState::Error, Error::Transfer(e)).await
            }
        }
    }

    /// `Downloaded` only when the file on disk matches the source checksum
    async fn verify(&self, bytes: u64) -> Result<TaskReport> {
        let actual = file_md5(self.target.clone()).await?;
        let size = self.target_size().await;
        let expected = self.job.source_checksum.clone();

        if checksum_matches(&expected, &actual) {
            let written = self
                .record
                .finish(|record| {
                    record.set_state(TaskState::Downloaded);
                    record.target_checksum = Some(actual);
                    record.target_size = size;
                    record.download_progress = 100;
                })
                .await?;
            self.log_lost_race(written, TaskState::Downloaded);
            tracing::info!(item_id = %self.item_id(), bytes, "download complete");
            return Ok(TaskReport::success(TaskState::Downloaded));
        }

        tracing::warn!(
            item_id = %self.item_id(),
            expected = %expected,
            actual = %actual,
            "checksum mismatch after transfer"
        );
        let detail = format!("checksum mismatch: expected {}, got {}", expected, actual);
        let written = self
            .record
            .finish(|record| {
                record.set_state_with_detail(TaskState::Error, detail);
                record.target_checksum = Some(actual.clone());
                record.target_size = size;
            })
            .await?;
        self.log_lost_race(written, TaskState::Error);

        Ok(TaskReport::failure(
            TaskState::Error,
            Error::ChecksumMismatch {
                path: self.target.clone(),
                expected,
                actual,
            },
        ))
    }

    /// Partial bytes stay on disk for the next run
    pub(super) async fn finish_cancelled(&self, detail: String) -> Result<TaskReport> {
        let size = self.target_size().await;
        let written = self
            .record
            .finish(|record| {
                record.set_state_with_detail(TaskState::Cancel, detail);
                record.target_checksum = None;
                record.target_size = size;
            })
            .await?;
        self.log_lost_race(written, TaskState::Cancel);
        tracing::info!(item_id = %self.item_id(), "download cancelled");

        Ok(TaskReport::failure(TaskState::Cancel, Error::Cancelled))
    }

    async fn finish_failed(&self, state: TaskState, error: Error) -> Result<TaskReport> {
        let size = self.target_size().await;
        let detail = error.to_string();
        let written = self
            .record
            .finish(|record| {
                record.set_state_with_detail(state, detail);
                record.target_checksum = None;
                record.target_size = size;
            })
            .await?;
        self.log_lost_race(written, state);

        Ok(TaskReport::failure(state, error))
    }

    async fn target_size(&self) -> i64 {
        tokio::fs::metadata(&self.target)
            .await
            .map(|meta| meta.len() as i64)
            .unwrap_or(0)
    }

    fn log_lost_race(&self, written: bool, state: TaskState) {
        if !written {
            tracing::debug!(
                item_id = %self.item_id(),
                state = %state,
                "terminal state already written, dropping"
            );
        }
    }
}
