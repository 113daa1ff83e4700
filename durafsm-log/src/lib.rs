//! # durafsm-log
//!
//! Append-only record log for durafsm.
//!
//! Every instance record is written once and never rewritten. The log provides:
//! - Per-frame CRC32C checksums
//! - Size-bounded segment files
//! - Configurable sync policy
//! - Torn-tail repair on open

pub mod entry;
pub mod error;
pub mod frame;
pub mod record_log;
pub mod segment;

pub use entry::LogEntry;
pub use error::LogError;
pub use frame::{Frame, FrameKind};
pub use record_log::{LogConfig, LogStats, RecordLog, SyncPolicy};
pub use segment::SegmentId;

/// Default segment size (32 MiB).
pub const DEFAULT_SEGMENT_SIZE: u64 = 32 * 1024 * 1024;

/// Frame header size in bytes.
pub const FRAME_HEADER_SIZE: usize = 24;
