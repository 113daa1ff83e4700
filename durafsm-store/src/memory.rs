//! In-memory instance store.

use crate::error::StoreError;
use crate::index::RecordIndex;
use crate::store::InstanceStore;
use durafsm_core::InstanceRecord;
use parking_lot::RwLock;

/// Keeps every record in process memory. Lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    index: RecordIndex,
    next_sequence: u64,
}

impl Inner {
    fn push(&mut self, record: &InstanceRecord) {
        self.next_sequence += 1;
        let seq = self.next_sequence;
        self.index.insert(record.clone(), seq);
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_count(&self) -> usize {
        self.inner.read().index.record_count()
    }
}

impl InstanceStore for MemoryStore {
    fn append(&self, record: &InstanceRecord) -> Result<(), StoreError> {
        self.inner.write().push(record);
        Ok(())
    }

    fn append_if_latest(
        &self,
        record: &InstanceRecord,
        expected: Option<&InstanceRecord>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        inner.index.check_latest(&record.id, expected)?;
        inner.push(record);
        Ok(())
    }

    fn latest(&self, id: &str) -> Result<Option<InstanceRecord>, StoreError> {
        Ok(self.inner.read().index.latest(id).cloned())
    }

    fn history(&self, id: &str) -> Result<Vec<InstanceRecord>, StoreError> {
        Ok(self.inner.read().index.history(id))
    }

    fn instance_count(&self) -> usize {
        self.inner.read().index.instance_count()
    }
}
