//! In-memory index of instance records shared by the store backends.

use crate::error::StoreError;
use durafsm_core::InstanceRecord;
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct Entry {
    record: InstanceRecord,
    /// Position in the store's global append order.
    sequence: u64,
}

/// Records grouped by instance id.
///
/// Ordering within an id is `(created_at, sequence)`, so records sharing a
/// timestamp resolve by append order.
#[derive(Debug, Default)]
pub struct RecordIndex {
    by_id: HashMap<String, Vec<Entry>>,
}

impl RecordIndex {
    pub fn insert(&mut self, record: InstanceRecord, sequence: u64) {
        self.by_id
            .entry(record.id.clone())
            .or_default()
            .push(Entry { record, sequence });
    }

    pub fn latest(&self, id: &str) -> Option<&InstanceRecord> {
        self.by_id
            .get(id)?
            .iter()
            .max_by_key(|e| (e.record.created_at, e.sequence))
            .map(|e| &e.record)
    }

    pub fn history(&self, id: &str) -> Vec<InstanceRecord> {
        let Some(entries) = self.by_id.get(id) else {
            return Vec::new();
        };
        let mut sorted: Vec<&Entry> = entries.iter().collect();
        sorted.sort_by_key(|e| (e.record.created_at, e.sequence));
        sorted.into_iter().map(|e| e.record.clone()).collect()
    }

    pub fn instance_count(&self) -> usize {
        self.by_id.len()
    }

    pub fn record_count(&self) -> usize {
        self.by_id.values().map(Vec::len).sum()
    }

    /// Checks that the latest record for `id` is `expected`.
    pub fn check_latest(
        &self,
        id: &str,
        expected: Option<&InstanceRecord>,
    ) -> Result<(), StoreError> {
        let actual = self.latest(id);
        let same = match (actual, expected) {
            (None, None) => true,
            (Some(a), Some(e)) => a.created_at == e.created_at && a.state == e.state,
            _ => false,
        };
        if same {
            return Ok(());
        }
        Err(StoreError::Conflict {
            id: id.to_string(),
            expected: expected.map(describe),
            actual: actual.map(describe),
        })
    }
}

fn describe(record: &InstanceRecord) -> String {
    format!("'{}' at {}", record.state, record.created_at.to_rfc3339())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn rec(id: &str, ms: i64, state: &str) -> InstanceRecord {
        InstanceRecord {
            id: id.to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                + Duration::milliseconds(ms),
            state: state.to_string(),
        }
    }

    #[test]
    fn test_latest_by_timestamp_not_insert_order() {
        let mut index = RecordIndex::default();
        index.insert(rec("a", 10, "uploaded"), 1);
        index.insert(rec("a", 5, "initial"), 2);
        assert_eq!(index.latest("a").unwrap().state, "uploaded");
        let states: Vec<String> = index.history("a").into_iter().map(|r| r.state).collect();
        assert_eq!(states, vec!["initial", "uploaded"]);
    }

    #[test]
    fn test_equal_timestamps_resolve_by_sequence() {
        let mut index = RecordIndex::default();
        index.insert(rec("a", 0, "initial"), 1);
        index.insert(rec("a", 7, "approved"), 2);
        index.insert(rec("a", 7, "rejected"), 3);
        assert_eq!(index.latest("a").unwrap().state, "rejected");
        assert_eq!(index.record_count(), 3);
        assert_eq!(index.instance_count(), 1);
    }

    #[test]
    fn test_check_latest() {
        let mut index = RecordIndex::default();
        assert!(index.check_latest("a", None).is_ok());

        let first = rec("a", 0, "initial");
        index.insert(first.clone(), 1);
        assert!(index.check_latest("a", Some(&first)).is_ok());
        assert!(matches!(
            index.check_latest("a", None),
            Err(StoreError::Conflict { .. })
        ));
        assert!(matches!(
            index.check_latest("a", Some(&rec("a", 0, "uploaded"))),
            Err(StoreError::Conflict { .. })
        ));
    }

    #[test]
    fn test_unknown_id() {
        let index = RecordIndex::default();
        assert!(index.latest("missing").is_none());
        assert!(index.history("missing").is_empty());
    }
}
