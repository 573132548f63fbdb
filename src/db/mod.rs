//! Database layer for trackfetch
//!
//! Handles SQLite persistence for item records and the durable job queue.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] - Database lifecycle, schema migrations
//! - [`records`] - Persisted item records ([`RecordStore`])
//! - [`jobs`] - Lease-based job broker ([`JobBroker`])
//!
//! Both traits are implemented by [`Database`]; the rest of the crate only sees
//! `Arc<dyn RecordStore>` / `Arc<dyn JobBroker>`, so tests can swap either side.

use crate::Result;
use crate::types::{
    DownloadJob, ItemId, JobId, JobPayload, QueueStats, StateBucket, TaskState,
};
use async_trait::async_trait;
use serde::Serialize;
use sqlx::{FromRow, sqlite::SqlitePool};
use std::path::Path;
use std::time::Duration;

mod jobs;
mod migrations;
mod records;

/// SQLite keeps at most 999 bind variables per statement on older builds
const MAX_IDS_PER_STATEMENT: usize = 500;

/// Durable state of one media item, keyed by item id
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct ItemRecord {
    /// Stable item id
    pub id: ItemId,
    /// Track title
    pub display_name: String,
    /// Album cover URL
    pub cover_url: Option<String>,
    /// Track number within the album
    pub track_number: i64,
    /// Album name
    pub album_name: String,
    /// Artist names joined with ","
    pub artist_names: String,
    /// Download URL
    pub source_url: String,
    /// Expected MD5 checksum
    pub source_checksum: String,
    /// Expected size in bytes
    pub source_size: i64,
    /// Where the file is written
    pub target_path: Option<String>,
    /// MD5 of the file at `target_path`; only set while that file exists
    pub target_checksum: Option<String>,
    /// Size of the file at `target_path`
    pub target_size: i64,
    /// Download state
    pub state: TaskState,
    /// Human-readable state detail or failure reason
    pub state_detail: String,
    /// Download progress (0-100)
    pub download_progress: i64,
    /// Set by the external upload pipeline; never written by downloads
    pub uploaded: bool,
    /// Unix timestamp (seconds) of the first insert
    pub created_at: i64,
}

impl ItemRecord {
    /// A `Waiting` record with no metadata yet
    pub fn placeholder(id: ItemId) -> Self {
        Self {
            id,
            display_name: String::new(),
            cover_url: None,
            track_number: 0,
            album_name: String::new(),
            artist_names: String::new(),
            source_url: String::new(),
            source_checksum: String::new(),
            source_size: 0,
            target_path: None,
            target_checksum: None,
            target_size: 0,
            state: TaskState::Waiting,
            state_detail: TaskState::Waiting.description().to_string(),
            download_progress: 0,
            uploaded: false,
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    /// A `Waiting` record carrying a job's metadata and its target path
    pub fn for_job(job: &DownloadJob, target_path: &Path) -> Self {
        let item = &job.item;
        Self {
            display_name: item.title.clone(),
            cover_url: item.album.cover_url.clone(),
            track_number: i64::from(item.track_no),
            album_name: item.album.name.clone(),
            artist_names: item.artist_names(),
            source_url: job.source_url.clone(),
            source_checksum: job.source_checksum.clone(),
            source_size: job.source_size as i64,
            target_path: Some(target_path.to_string_lossy().into_owned()),
            ..Self::placeholder(item.id.clone())
        }
    }

    /// Move to `state` with its default description
    pub fn set_state(&mut self, state: TaskState) {
        self.set_state_with_detail(state, state.description());
    }

    /// Move to `state` with a specific detail (usually a failure reason)
    pub fn set_state_with_detail(&mut self, state: TaskState, detail: impl Into<String>) {
        self.state = state;
        self.state_detail = detail.into();
    }

    /// Progress as reported to callers: 100 once the item is done
    pub fn progress_percent(&self) -> u8 {
        if self.state.is_success() {
            100
        } else {
            self.download_progress.clamp(0, 100) as u8
        }
    }
}

/// Options applied to every job of one bulk enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobOptions {
    /// Total delivery attempts before the job is marked failed
    pub attempts: u32,
    /// Base of the exponential redelivery backoff
    pub backoff: Duration,
}

/// A job delivered to a worker under a lease
#[derive(Debug, Clone)]
pub struct LeasedJob {
    /// Broker id
    pub id: JobId,
    /// Decoded payload
    pub payload: JobPayload,
    /// This delivery's attempt number (1-based)
    pub attempt: u32,
    /// Attempts allowed in total
    pub max_attempts: u32,
}

/// How the broker disposed of a failed job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Scheduled for redelivery after the given delay
    Retrying(Duration),
    /// No further deliveries
    Dead,
}

/// Persisted record store
///
/// Every write is an upsert keyed by item id, so concurrent writers for different items
/// never conflict and repeated writes of the same record are harmless.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Look up one record
    async fn find_by_id(&self, id: &ItemId) -> Result<Option<ItemRecord>>;

    /// Look up several records; missing ids are left out
    async fn find_many(&self, ids: &[ItemId]) -> Result<Vec<ItemRecord>>;

    /// Insert or overwrite a record (`created_at` and `uploaded` survive an overwrite)
    async fn upsert(&self, record: &ItemRecord) -> Result<()>;

    /// The subset of `ids` whose record is in one of `states`
    async fn ids_where_state_in(&self, ids: &[ItemId], states: &[TaskState])
    -> Result<Vec<ItemId>>;

    /// The subset of `ids` with no record at all
    async fn ids_not_existing(&self, ids: &[ItemId]) -> Result<Vec<ItemId>>;

    /// Insert `Waiting` placeholders; ids that already have a record are left alone
    async fn insert_placeholders(&self, ids: &[ItemId]) -> Result<u64>;

    /// Reset the records of `ids` to `Waiting`
    async fn reset_to_waiting(&self, ids: &[ItemId]) -> Result<u64>;

    /// Records newest first, optionally limited to one state bucket
    async fn paginate(
        &self,
        offset: u64,
        limit: u64,
        bucket: Option<StateBucket>,
    ) -> Result<Vec<ItemRecord>>;
}

/// Durable lease-based job queue
///
/// Delivery is at-least-once: a job whose lease expires before it is completed or failed
/// goes back to the waiting set.
#[async_trait]
pub trait JobBroker: Send + Sync {
    /// Submit jobs in one round-trip; returns their ids in order
    async fn enqueue_bulk(
        &self,
        queue: &str,
        payloads: &[JobPayload],
        options: JobOptions,
    ) -> Result<Vec<JobId>>;

    /// Lease the oldest due job, incrementing its attempt count
    async fn lease_next(&self, queue: &str, lease: Duration) -> Result<Option<LeasedJob>>;

    /// Extend a lease; false if the job is no longer held
    async fn renew_lease(&self, id: JobId, lease: Duration) -> Result<bool>;

    /// Hand a leased job back unrun; the delivery does not count as an attempt
    async fn release(&self, id: JobId) -> Result<bool>;

    /// Mark a leased job completed
    async fn complete(&self, id: JobId) -> Result<()>;

    /// Record a failed delivery; unrecoverable failures are never redelivered
    async fn fail(&self, id: JobId, reason: &str, unrecoverable: bool)
    -> Result<FailureOutcome>;

    /// Return jobs with expired leases to the waiting set; returns how many
    async fn requeue_stalled(&self, queue: &str) -> Result<u64>;

    /// Job counts by status
    async fn stats(&self, queue: &str) -> Result<QueueStats>;
}

/// Database handle for trackfetch
pub struct Database {
    pool: SqlitePool,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
