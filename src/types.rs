//! Core types for trackfetch

use serde::{Deserialize, Serialize};

/// Stable identifier of a media item (the key of its persisted record)
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub String);

impl ItemId {
    /// Create a new ItemId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ItemId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ItemId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<u64> for ItemId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl sqlx::Type<sqlx::Sqlite> for ItemId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <String as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for ItemId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for ItemId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let id = <String as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// State of a download task, mirrored into the persisted record
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// Waiting to be picked up by a worker
    #[default]
    Waiting,
    /// Transfer in progress
    Downloading,
    /// Transfer finished and checksum verified
    Downloaded,
    /// Transfer agent reported a timeout
    Timeout,
    /// Transfer failed or checksum mismatch
    Error,
    /// Target file already matched the source checksum
    Skipped,
    /// Cancelled (shutdown or job timeout); partial bytes kept for resume
    Cancel,
}

impl TaskState {
    /// States a dedup pass resets to `Waiting` so they are downloaded again.
    pub const RETRYABLE: [TaskState; 3] = [TaskState::Cancel, TaskState::Error, TaskState::Timeout];

    /// Storage representation
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Waiting => "waiting",
            TaskState::Downloading => "downloading",
            TaskState::Downloaded => "downloaded",
            TaskState::Timeout => "timeout",
            TaskState::Error => "error",
            TaskState::Skipped => "skipped",
            TaskState::Cancel => "cancel",
        }
    }

    /// Parse the storage representation; unknown values map to `Error`
    pub fn from_db(value: &str) -> Self {
        match value {
            "waiting" => TaskState::Waiting,
            "downloading" => TaskState::Downloading,
            "downloaded" => TaskState::Downloaded,
            "timeout" => TaskState::Timeout,
            "skipped" => TaskState::Skipped,
            "cancel" => TaskState::Cancel,
            _ => TaskState::Error,
        }
    }

    /// Human-readable description stored as the default `state_detail`
    pub fn description(&self) -> &'static str {
        match self {
            TaskState::Waiting => "waiting for download",
            TaskState::Downloading => "downloading",
            TaskState::Downloaded => "download complete",
            TaskState::Timeout => "download timed out",
            TaskState::Error => "download error",
            TaskState::Skipped => "download skipped",
            TaskState::Cancel => "download cancelled",
        }
    }

    /// Whether no further transition happens within the current run
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskState::Waiting | TaskState::Downloading)
    }

    /// Whether the job handler reports success for this state
    pub fn is_success(&self) -> bool {
        matches!(self, TaskState::Downloaded | TaskState::Skipped)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl sqlx::Type<sqlx::Sqlite> for TaskState {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <String as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for TaskState {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <String as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str().to_owned(), buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for TaskState {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let state = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self::from_db(state))
    }
}

/// How a download task treats an existing, non-matching target file
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Keep partial bytes and continue from the current offset
    #[default]
    Resume,
    /// Discard the existing file and download from zero
    Restart,
}

/// Lifecycle of the job queue and its worker pool
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    /// Constructed, nothing wired yet
    #[default]
    Build,
    /// Broker, stall scheduler and worker pool wired; workers paused
    Initiated,
    /// Workers pulling jobs
    Started,
    /// `close()` in progress
    Closing,
    /// All sub-resources torn down
    Closed,
}

/// Grouping of task states used when browsing records
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateBucket {
    /// Waiting
    Waiting,
    /// Downloading
    Downloading,
    /// Downloaded or Skipped
    Done,
    /// Error, Cancel or Timeout
    Failed,
}

impl StateBucket {
    /// The task states contained in this bucket
    pub fn states(&self) -> &'static [TaskState] {
        match self {
            StateBucket::Waiting => &[TaskState::Waiting],
            StateBucket::Downloading => &[TaskState::Downloading],
            StateBucket::Done => &[TaskState::Downloaded, TaskState::Skipped],
            StateBucket::Failed => &TaskState::RETRYABLE,
        }
    }
}

/// Artist as returned by the metadata resolver
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artist {
    /// Artist id at the source
    pub id: String,
    /// Display name
    pub name: String,
}

/// Album as returned by the metadata resolver
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Album {
    /// Album id at the source
    pub id: String,
    /// Album name (may be empty)
    pub name: String,
    /// Cover image URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_url: Option<String>,
}

/// Item metadata resolved from an external lookup
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedItem {
    /// Stable item id
    pub id: ItemId,
    /// Track title
    pub title: String,
    /// Artists, primary first
    pub artists: Vec<Artist>,
    /// Album
    pub album: Album,
    /// Track number within the album
    pub track_no: u32,
    /// Duration in milliseconds
    pub duration_ms: u64,
}

impl ResolvedItem {
    /// Name of the first artist, if any
    pub fn primary_artist_name(&self) -> Option<&str> {
        self.artists
            .first()
            .map(|a| a.name.as_str())
            .filter(|name| !name.trim().is_empty())
    }

    /// All artist names joined for display
    pub fn artist_names(&self) -> String {
        self.artists
            .iter()
            .map(|a| a.name.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Where the bytes of an item come from
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    /// Download URL
    pub url: String,
    /// Expected MD5 checksum (lower-case hex)
    pub checksum: String,
    /// Expected size in bytes
    pub size: u64,
}

/// One page of a paginated source collection
#[derive(Clone, Debug, Default)]
pub struct CollectionPage {
    /// Items on this page
    pub items: Vec<ResolvedItem>,
    /// Whether more pages follow
    pub has_more: bool,
}

/// Unit of queued download work; immutable once enqueued
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadJob {
    /// Resolved item descriptor
    pub item: ResolvedItem,
    /// Download URL
    pub source_url: String,
    /// Expected MD5 checksum
    pub source_checksum: String,
    /// Expected size in bytes
    pub source_size: u64,
}

impl DownloadJob {
    /// Build a job from a resolved item and its source
    pub fn new(item: ResolvedItem, source: SourceInfo) -> Self {
        Self {
            item,
            source_url: source.url,
            source_checksum: source.checksum,
            source_size: source.size,
        }
    }
}

/// Versioned payload carried through the job broker
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "version")]
pub enum JobPayload {
    /// First payload revision
    #[serde(rename = "1")]
    V1(DownloadJob),
}

impl JobPayload {
    /// The download job carried by this payload
    pub fn job(&self) -> &DownloadJob {
        match self {
            JobPayload::V1(job) => job,
        }
    }

    /// Consume the payload into its download job
    pub fn into_job(self) -> DownloadJob {
        match self {
            JobPayload::V1(job) => job,
        }
    }
}

impl From<DownloadJob> for JobPayload {
    fn from(job: DownloadJob) -> Self {
        JobPayload::V1(job)
    }
}

/// Broker-assigned job identifier
pub type JobId = i64;

/// Job counts by broker status
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Waiting for a worker (including delayed retries)
    pub waiting: u64,
    /// Leased by a worker
    pub active: u64,
    /// Completed successfully
    pub completed: u64,
    /// Failed with no attempts left
    pub failed: u64,
}

/// Download progress of one item as reported to callers
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemProgress {
    /// Item id
    pub item_id: ItemId,
    /// Percent complete (0-100); 100 once downloaded or skipped
    pub percent: u8,
    /// Current state, `None` if the item has no record
    pub state: Option<TaskState>,
}

/// Event emitted during the download lifecycle
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Jobs submitted to the broker
    Queued {
        /// Item id
        item_id: ItemId,
        /// Track title
        title: String,
    },

    /// A worker started a job
    Started {
        /// Item id
        item_id: ItemId,
        /// Delivery attempt (1-based)
        attempt: u32,
    },

    /// Transfer progress (throttled)
    Progress {
        /// Item id
        item_id: ItemId,
        /// Percent complete (0-100)
        percent: u8,
    },

    /// Task reached a terminal state
    Finished {
        /// Item id
        item_id: ItemId,
        /// Terminal state
        state: TaskState,
    },

    /// Job handler reported failure to the broker
    Failed {
        /// Item id
        item_id: ItemId,
        /// Failure reason
        error: String,
        /// Whether the broker will redeliver
        will_retry: bool,
    },

    /// Queue lifecycle changed
    QueueStatusChanged {
        /// New status
        status: QueueStatus,
    },

    /// Downloader shut down
    Shutdown,
}
