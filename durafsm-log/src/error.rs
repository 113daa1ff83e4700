//! Record log error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the record log.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("checksum mismatch in {segment} at offset {offset} (expected {expected:#x}, got {actual:#x})")]
    ChecksumMismatch {
        segment: String,
        offset: u64,
        expected: u32,
        actual: u32,
    },

    #[error("malformed frame at offset {offset}: {reason}")]
    MalformedFrame { offset: u64, reason: String },

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("segment {path} is damaged before its tail and cannot be repaired")]
    DamagedSegment { path: PathBuf },

    #[error("record log is closed")]
    Closed,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LogError {
    /// Returns whether retrying the operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LogError::Io(_))
    }

    /// Whether the bytes of a single frame failed verification.
    pub fn is_frame_damage(&self) -> bool {
        matches!(
            self,
            LogError::ChecksumMismatch { .. }
                | LogError::MalformedFrame { .. }
                | LogError::FrameTooLarge { .. }
        )
    }
}
