//! Byte transfer seam
//!
//! A [`TransferAgent`] moves the bytes of one URL into one file and reports what it is
//! doing through [`TransferEvent`]s. The download task decides where to start (from zero
//! or from the bytes already on disk); the agent owns the HTTP details, per-request retries
//! and the bounded loop that continues incomplete transfers.
//!
//! Pausing is cooperative: cancelling the `pause` token makes the agent flush what it has
//! and return [`TransferOutcome::Paused`] with the partial file left in place.

use crate::error::TransferError;
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

mod http;

pub use http::HttpTransferAgent;

/// Where a transfer starts writing
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartFrom {
    /// Truncate the target and download everything
    Beginning,
    /// Keep the first `n` bytes on disk and request the rest with a byte range
    Offset(u64),
}

/// One file transfer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferRequest {
    /// Source URL
    pub url: String,
    /// Target file
    pub target: PathBuf,
    /// Expected size in bytes (0 if unknown)
    pub expected_size: u64,
    /// Start position
    pub start: StartFrom,
}

/// Lifecycle events emitted while a transfer runs
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransferEvent {
    /// Request accepted, bytes about to flow
    Download {
        /// Byte offset the body starts at
        offset: u64,
        /// Expected total size
        total: u64,
    },
    /// Throttled progress report
    Progress {
        /// Bytes on disk
        received: u64,
        /// Expected total size
        total: u64,
    },
    /// Nothing left to fetch; the file on disk is already complete
    Skip,
    /// Transfer paused on request; partial bytes kept
    Pause {
        /// Bytes on disk
        received: u64,
    },
    /// Continuing an incomplete transfer from the bytes on disk
    Resume {
        /// Byte offset of the continuation request
        offset: u64,
        /// Continuation attempt (1-based)
        attempt: u32,
    },
    /// A request failed transiently and is retried
    Retry {
        /// Retry number (1-based)
        attempt: u32,
    },
    /// All bytes received
    End {
        /// Bytes on disk
        bytes: u64,
    },
    /// Transfer failed
    Error {
        /// Failure description
        message: String,
    },
}

/// How a transfer finished
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferOutcome {
    /// The agent believes the file is complete
    Completed {
        /// Bytes on disk
        bytes: u64,
    },
    /// Stopped on request; partial bytes are on disk
    Paused {
        /// Bytes on disk
        bytes: u64,
    },
}

/// Moves bytes from a URL into a file
#[async_trait]
pub trait TransferAgent: Send + Sync {
    /// Run one transfer to completion, pause or failure
    async fn start(
        &self,
        request: TransferRequest,
        events: mpsc::UnboundedSender<TransferEvent>,
        pause: CancellationToken,
    ) -> Result<TransferOutcome, TransferError>;
}
