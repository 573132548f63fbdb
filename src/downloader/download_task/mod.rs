//! Download task execution: one item from source URL to verified file on disk.
//!
//! Split into focused submodules:
//! - [`context`] - Task state, shared dependencies, run report
//! - [`orchestration`] - Top-level task lifecycle and the transfer race
//! - [`finalization`] - Checksum gate and terminal state
//! - [`record`] - Serialized record writes with a single terminal write
//! - [`paths`] - Target path and extension derivation
//! - [`checksum`] - File MD5

mod checksum;
mod context;
mod finalization;
mod orchestration;
mod paths;
mod record;


pub use checksum::{compute_file_md5, file_md5};
pub use context::{DownloadTask, TaskDeps, TaskReport};
pub use paths::{ParsedExtension, UNKNOWN_ALBUM, UNKNOWN_ARTIST, parse_extension, sanitize, target_path};
pub use record::TaskRecord;
