//! Error types for trackfetch
//!
//! Errors fall into the categories the job broker cares about:
//! - resolution failures (no metadata or no download URL) are never retried
//! - transfer failures (network, checksum mismatch, stall) are retried by the broker
//! - cancellations are reported as such and stay eligible for the next run
//! - storage failures (database or filesystem unreachable) are never retried

use crate::types::{ItemId, QueueStatus};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for trackfetch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for trackfetch
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "root_dir")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Metadata or download source could not be resolved
    #[error("resolution failed for {item_id}: {reason}")]
    Resolution {
        /// Item that could not be resolved
        item_id: ItemId,
        /// Why resolution failed
        reason: String,
    },

    /// Byte transfer failed
    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    /// Downloaded file does not match the source checksum
    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Target file
        path: PathBuf,
        /// Source checksum
        expected: String,
        /// Checksum of the file on disk
        actual: String,
    },

    /// Job ran longer than the configured per-job timeout
    #[error("timed out after {0:?}")]
    TimedOut(std::time::Duration),

    /// Cooperative cancellation (shutdown or job timeout)
    #[error("cancelled")]
    Cancelled,

    /// Download task finished in a non-success state
    #[error("download of {item_id} ended as {state}: {detail}")]
    TaskFailed {
        /// Item id
        item_id: ItemId,
        /// Terminal state name
        state: String,
        /// Failure detail
        detail: String,
    },

    /// Operation not allowed in the current queue state
    #[error("queue is {current:?}, cannot {operation}")]
    QueueState {
        /// The attempted operation
        operation: &'static str,
        /// Current queue status
        current: QueueStatus,
    },

    /// Shutdown in progress
    #[error("shutdown in progress")]
    ShuttingDown,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Record or job not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Stored payload could not be decoded
    #[error("corrupt row: {0}")]
    CorruptRow(String),
}

/// Transfer agent errors
#[derive(Debug, Error)]
pub enum TransferError {
    /// HTTP request failed before a body was received
    #[error("request to {url} failed: {reason}")]
    Request {
        /// Source URL
        url: String,
        /// Underlying reason
        reason: String,
        /// Whether the failure looks transient (timeout, connection reset)
        transient: bool,
    },

    /// Server answered with a non-success status
    #[error("HTTP {status} from {url}")]
    Status {
        /// Source URL
        url: String,
        /// HTTP status code
        status: u16,
    },

    /// Body stream broke or ended early
    #[error("stream interrupted after {received} of {expected} bytes")]
    Incomplete {
        /// Bytes on disk
        received: u64,
        /// Bytes expected
        expected: u64,
    },

    /// No bytes for longer than the agent's own idle timeout
    #[error("transfer idle for {0:?}")]
    Timeout(std::time::Duration),

    /// Writing the target file failed
    #[error("failed to write {path}: {source}")]
    Write {
        /// Target file
        path: PathBuf,
        /// I/O error
        #[source]
        source: std::io::Error,
    },
}

/// Broker-facing classification of an error
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Metadata or download URL missing
    Resolution,
    /// Network, checksum or stall failure
    Transfer,
    /// Cooperative shutdown mid-transfer
    Cancellation,
    /// Database or filesystem unreachable
    Storage,
    /// Misuse of the queue lifecycle or configuration
    Lifecycle,
}

impl Error {
    /// Classify this error for retry decisions
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Resolution { .. } | Error::NotFound(_) => ErrorKind::Resolution,
            Error::Transfer(_)
            | Error::ChecksumMismatch { .. }
            | Error::TimedOut(_)
            | Error::TaskFailed { .. }
            | Error::Network(_) => ErrorKind::Transfer,
            Error::Cancelled => ErrorKind::Cancellation,
            Error::Database(_) | Error::Sqlx(_) | Error::Io(_) | Error::Serialization(_) => {
                ErrorKind::Storage
            }
            Error::Config { .. }
            | Error::QueueState { .. }
            | Error::ShuttingDown
            | Error::Other(_) => ErrorKind::Lifecycle,
        }
    }

    /// Whether the broker must not redeliver the job
    pub fn is_unrecoverable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Resolution | ErrorKind::Storage)
    }
}

impl TransferError {
    /// Whether retrying the same request could succeed
    pub fn is_transient(&self) -> bool {
        match self {
            TransferError::Request { transient, .. } => *transient,
            TransferError::Status { status, .. } => *status == 408 || *status == 429 || *status >= 500,
            TransferError::Incomplete { .. } => true,
            TransferError::Timeout(_) => true,
            TransferError::Write { .. } => false,
        }
    }
}
