//! Download task state and its shared dependencies.

use crate::Error;
use crate::config::Config;
use crate::context::Context;
use crate::db::{ItemRecord, RecordStore};
use crate::transfer::TransferAgent;
use crate::types::{DownloadJob, Event, ItemId, TaskState};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;

use super::paths::target_path;
use super::record::TaskRecord;

/// Dependencies shared by every download task of one downloader
#[derive(Clone)]
pub struct TaskDeps {
    /// Configuration
    pub config: Arc<Config>,
    /// Record persistence
    pub store: Arc<dyn RecordStore>,
    /// Byte transfer
    pub agent: Arc<dyn TransferAgent>,
    /// Event broadcast
    pub event_tx: broadcast::Sender<Event>,
}

/// How a task run ended
#[derive(Debug)]
pub struct TaskReport {
    /// Final state of this run
    pub state: TaskState,
    /// Failure behind a non-success state
    pub error: Option<Error>,
}

impl TaskReport {
    pub(super) fn success(state: TaskState) -> Self {
        Self { state, error: None }
    }

    pub(super) fn failure(state: TaskState, error: Error) -> Self {
        Self {
            state,
            error: Some(error),
        }
    }
}

/// One download job in execution
///
/// Built by a queue consumer for every delivered job. `ctx` is the job's context: when
/// it goes done (job timeout, consumer close, shutdown) an in-flight transfer is paused and
/// the task ends as [`TaskState::Cancel`].
pub struct DownloadTask {
    pub(super) ctx: Context,
    pub(super) job: DownloadJob,
    pub(super) target: PathBuf,
    pub(super) record: TaskRecord,
    pub(super) deps: TaskDeps,
}

impl DownloadTask {
    /// Prepare a task; nothing is written until [`run`](Self::run)
    pub fn new(ctx: Context, job: DownloadJob, deps: TaskDeps) -> Self {
        let target = target_path(&deps.config.download.root_dir, &job);
        let record = TaskRecord::new(deps.store.clone(), ItemRecord::for_job(&job, &target));
        Self {
            ctx,
            job,
            target,
            record,
            deps,
        }
    }

    /// Item this task downloads
    pub fn item_id(&self) -> &ItemId {
        &self.job.item.id
    }

    /// Where the file is written
    pub fn target(&self) -> &std::path::Path {
        &self.target
    }

    /// Handle for writing this task's record from outside the task
    pub fn record(&self) -> TaskRecord {
        self.record.clone()
    }

    pub(super) fn emit(&self, event: Event) {
        self.deps.event_tx.send(event).ok();
    }
}
