//! Durable instance store backed by the record log.

use crate::error::StoreError;
use crate::index::RecordIndex;
use crate::store::InstanceStore;
use durafsm_core::InstanceRecord;
use durafsm_log::{LogConfig, LogEntry, LogStats, RecordLog};
use parking_lot::RwLock;

/// Writes each record to the log before making it visible.
///
/// The index is rebuilt by replaying the log on open, so it always
/// reflects exactly what is on disk.
pub struct LogStore {
    log: RecordLog,
    index: RwLock<RecordIndex>,
}

impl LogStore {
    pub fn open(config: LogConfig) -> Result<Self, StoreError> {
        let log = RecordLog::open(config)?;

        let mut index = RecordIndex::default();
        let entries = log.replay()?;
        let replayed = entries.len();
        for (sequence, entry) in entries {
            match entry {
                LogEntry::Record {
                    id,
                    created_at,
                    state,
                } => index.insert(
                    InstanceRecord {
                        id,
                        created_at,
                        state,
                    },
                    sequence,
                ),
            }
        }

        tracing::info!(
            "Instance store loaded: {} record(s) across {} instance(s)",
            replayed,
            index.instance_count()
        );

        Ok(Self {
            log,
            index: RwLock::new(index),
        })
    }

    pub fn log_stats(&self) -> LogStats {
        self.log.stats()
    }

    /// Flushes and closes the underlying log.
    pub fn close(&self) -> Result<(), StoreError> {
        self.log.close()?;
        Ok(())
    }

    fn write(&self, index: &mut RecordIndex, record: &InstanceRecord) -> Result<(), StoreError> {
        let sequence = self.log.append(&LogEntry::Record {
            id: record.id.clone(),
            created_at: record.created_at,
            state: record.state.clone(),
        })?;
        index.insert(record.clone(), sequence);
        Ok(())
    }
}

impl InstanceStore for LogStore {
    fn append(&self, record: &InstanceRecord) -> Result<(), StoreError> {
        let mut index = self.index.write();
        self.write(&mut index, record)
    }

    fn append_if_latest(
        &self,
        record: &InstanceRecord,
        expected: Option<&InstanceRecord>,
    ) -> Result<(), StoreError> {
        let mut index = self.index.write();
        index.check_latest(&record.id, expected)?;
        self.write(&mut index, record)
    }

    fn latest(&self, id: &str) -> Result<Option<InstanceRecord>, StoreError> {
        Ok(self.index.read().latest(id).cloned())
    }

    fn history(&self, id: &str) -> Result<Vec<InstanceRecord>, StoreError> {
        Ok(self.index.read().history(id))
    }

    fn instance_count(&self) -> usize {
        self.index.read().instance_count()
    }

    fn sync(&self) -> Result<(), StoreError> {
        self.log.sync()?;
        Ok(())
    }
}
