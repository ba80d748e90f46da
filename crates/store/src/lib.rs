//! `trellis-store`: transactional persistence. Storage backend contract,
//! in-memory backend, typed repositories, by-id cache, and the unit of work
//! that coordinates them with post-commit event dispatch.

pub mod backend;
pub mod cache;
pub mod memory;
pub mod repository;
pub mod unit_of_work;

#[cfg(test)]
mod integration_tests;

pub use backend::{
    DELETED_FIELD, Mutation, Operation, Rows, StorageBackend, StoreError, TxHandle, VERSION_FIELD,
};
pub use cache::DocumentCache;
pub use memory::InMemoryBackend;
pub use repository::{QueryResults, Repository, Stored};
pub use unit_of_work::{
    DEFAULT_STORE_TIMEOUT, EventCollector, StoreContext, UnitOfWork, UowState,
};
