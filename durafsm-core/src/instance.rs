//! Instances and their persisted records.

use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

/// One persisted materialization of an instance.
///
/// Records are never updated; every transition produces a new one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceRecord {
    pub id: String,
    /// When this record was written, not when the instance was created.
    pub created_at: DateTime<Utc>,
    pub state: String,
}

/// In-memory projection of an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    pub id: String,
    pub state: String,
    /// `created_at` of the record this projection was loaded from.
    /// `None` for an instance that has never been stored.
    pub version: Option<DateTime<Utc>>,
}

impl Instance {
    pub fn new(id: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: state.into(),
            version: None,
        }
    }

    pub fn from_record(record: &InstanceRecord) -> Self {
        Self {
            id: record.id.clone(),
            state: record.state.clone(),
            version: Some(record.created_at),
        }
    }

    /// Builds the record to append for this instance's current state.
    ///
    /// The timestamp is strictly later than the version it was loaded from,
    /// so one writer's history never has two records at the same instant.
    pub fn to_record(&self) -> InstanceRecord {
        InstanceRecord {
            id: self.id.clone(),
            created_at: next_timestamp(self.version),
            state: self.state.clone(),
        }
    }
}

/// Current time at millisecond precision, bumped past `previous` if the
/// clock has not moved (or moved backwards).
pub fn next_timestamp(previous: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = Utc::now().trunc_subsecs(3);
    match previous {
        Some(prev) if now <= prev => prev + Duration::milliseconds(1),
        _ => now,
    }
}
