//! Job handler: runs one download task against the per-job timeout.

use crate::context::{Context, ContextEvent};
use crate::downloader::download_task::{DownloadTask, TaskDeps, TaskReport};
use crate::error::{Error, Result};
use crate::types::{Event, ItemId, JobPayload, QueueStatus, TaskState};
use tokio::sync::watch;

/// Outcome of the race between the task and the job timeout
enum Race {
    Finished(TaskReport),
    TimedOut,
}

/// Worker-side handler bound to the pool
#[derive(Clone)]
pub(crate) struct Consumer {
    ctx: Context,
    deps: TaskDeps,
    status: watch::Receiver<QueueStatus>,
}

impl Consumer {
    pub(crate) fn new(ctx: Context, deps: TaskDeps, status: watch::Receiver<QueueStatus>) -> Self {
        Self { ctx, deps, status }
    }

    /// Handle one delivery
    ///
    /// Succeeds only when the task ends as `Downloaded` or `Skipped`. Any other outcome is
    /// returned as an error so the broker applies its retry policy; a job that outlives
    /// the configured timeout is cancelled, recorded as `Cancel` ("timed out") and
    /// reported as [`Error::TimedOut`].
    pub(crate) async fn handle(&self, payload: JobPayload, attempt: u32) -> Result<TaskState> {
        let current = *self.status.borrow();
        if current != QueueStatus::Started {
            return Err(Error::QueueState {
                operation: "handle job",
                current,
            });
        }

        let job = payload.into_job();
        let item_id = job.item.id.clone();
        let job_ctx = self.ctx.child(format!("job-{}", item_id));
        let task = DownloadTask::new(job_ctx.clone(), job, self.deps.clone());
        let record = task.record();

        self.deps
            .event_tx
            .send(Event::Started {
                item_id: item_id.clone(),
                attempt,
            })
            .ok();

        let timeout = self.deps.config.download.job_timeout;
        let run = task.run(self.deps.config.download.run_mode);
        tokio::pin!(run);

        let race = tokio::select! {
            report = &mut run => Race::Finished(report),
            _ = tokio::time::sleep(timeout) => Race::TimedOut,
        };

        let report = match race {
            Race::Finished(report) => report,
            Race::TimedOut => {
                tracing::warn!(
                    item_id = %item_id,
                    timeout_secs = timeout.as_secs(),
                    "job timed out, cancelling download"
                );
                let grace = self.deps.config.download.cancel_grace;

                // Claim the terminal write before the task can report its own cancellation.
                // The task keeps being driven meanwhile: a write in flight holds the record.
                let claim = record.finish(|r| {
                    r.set_state_with_detail(TaskState::Cancel, "timed out");
                    r.target_checksum = None;
                });
                tokio::pin!(claim);
                let mut early = None;
                let written = loop {
                    tokio::select! {
                        written = &mut claim => break written,
                        report = &mut run, if early.is_none() => early = Some(report),
                    }
                };

                if let Ok(false) = written {
                    // The task wrote its own terminal state first
                    let report = match early.take() {
                        Some(report) => Some(report),
                        None => tokio::time::timeout(grace, &mut run).await.ok(),
                    };
                    if let Some(report) = report {
                        return self.finished(&job_ctx, item_id, report);
                    }
                }

                job_ctx.emit(ContextEvent::Done);

                // Give the task a bounded window to pause its transfer and let go
                if early.is_none() && tokio::time::timeout(grace, &mut run).await.is_err() {
                    tracing::warn!(item_id = %item_id, "download task did not stop in time, abandoning it");
                }

                written?;
                self.deps
                    .event_tx
                    .send(Event::Finished {
                        item_id,
                        state: TaskState::Cancel,
                    })
                    .ok();
                return Err(Error::TimedOut(timeout));
            }
        };

        self.finished(&job_ctx, item_id, report)
    }

    /// Report a task that reached its own terminal state
    fn finished(
        &self,
        job_ctx: &Context,
        item_id: ItemId,
        report: TaskReport,
    ) -> Result<TaskState> {
        // Still emitted so everything hanging off the job context is released
        job_ctx.emit(ContextEvent::Done);
        self.deps
            .event_tx
            .send(Event::Finished {
                item_id: item_id.clone(),
                state: report.state,
            })
            .ok();

        if report.state.is_success() {
            return Ok(report.state);
        }
        Err(report.error.unwrap_or_else(|| Error::TaskFailed {
            item_id,
            state: report.state.to_string(),
            detail: report.state.description().to_string(),
        }))
    }
}
