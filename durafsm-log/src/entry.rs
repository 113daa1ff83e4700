//! Typed log entries.

use crate::frame::FrameKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A typed entry stored in a frame payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogEntry {
    /// One materialization of an instance's state.
    Record {
        id: String,
        created_at: DateTime<Utc>,
        state: String,
    },
}

impl LogEntry {
    pub fn frame_kind(&self) -> FrameKind {
        match self {
            LogEntry::Record { .. } => FrameKind::Record,
        }
    }

    /// Returns the instance id this entry belongs to.
    pub fn instance_id(&self) -> &str {
        match self {
            LogEntry::Record { id, .. } => id,
        }
    }
}
