//! The instance store contract.

use crate::error::StoreError;
use durafsm_core::InstanceRecord;

/// Append-only persistence of instance records.
///
/// Implementations are shared across concurrent requests. The plain
/// [`append`](InstanceStore::append) performs no read-modify-write check:
/// two writers that loaded the same latest record both succeed, and the
/// later `(createdAt, append order)` wins on read.
pub trait InstanceStore: Send + Sync {
    /// Inserts a new record. Never updates an existing one.
    fn append(&self, record: &InstanceRecord) -> Result<(), StoreError>;

    /// Inserts `record` only if the id's latest record still equals
    /// `expected` (`None` meaning the id has no records yet).
    ///
    /// Fails with [`StoreError::Conflict`] otherwise.
    fn append_if_latest(
        &self,
        record: &InstanceRecord,
        expected: Option<&InstanceRecord>,
    ) -> Result<(), StoreError>;

    /// The most recent record for `id`, or `None` if the id is unknown.
    fn latest(&self, id: &str) -> Result<Option<InstanceRecord>, StoreError>;

    /// Every record for `id`, oldest first.
    fn history(&self, id: &str) -> Result<Vec<InstanceRecord>, StoreError>;

    /// Number of distinct instance ids.
    fn instance_count(&self) -> usize;

    /// Flushes pending writes to durable storage.
    fn sync(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
