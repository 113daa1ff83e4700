//! # durafsm-store
//!
//! Instance store for durafsm.
//!
//! Every write appends a new `(id, createdAt, state)` record; nothing is
//! updated or deleted. An instance's current state is its latest record.
//!
//! Backends:
//! - [`MemoryStore`] for tests and ephemeral deployments
//! - [`LogStore`] on top of the durable record log

pub mod error;
pub mod index;
pub mod log_store;
pub mod memory;
pub mod store;

pub use error::StoreError;
pub use log_store::LogStore;
pub use memory::MemoryStore;
pub use store::InstanceStore;
