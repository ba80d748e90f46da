//! Storage backend contract: transactional document operations.
//!
//! A backend stores JSON documents per collection and executes operations
//! inside explicit transactions. Repositories and units of work depend only
//! on this contract, never on a concrete backend.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value as JsonValue;
use thiserror::Error;

use trellis_core::{CoreError, EntityId, ExpectedVersion};
use trellis_query::QueryPlan;

/// Document field carrying the optimistic concurrency version.
pub const VERSION_FIELD: &str = "version";

/// Document field carrying the soft-delete flag.
pub const DELETED_FIELD: &str = "deleted";

/// Opaque handle for an in-flight transaction.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TxHandle(u64);

impl TxHandle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// One staged write against a collection.
///
/// `Update` merges the patch object into the stored document. When the patch
/// carries its own version field that value wins; otherwise the backend bumps
/// the stored version by one.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Insert {
        collection: &'static str,
        id: EntityId,
        document: JsonValue,
    },
    Update {
        collection: &'static str,
        id: EntityId,
        patch: JsonValue,
        expected: ExpectedVersion,
    },
    /// Mark the document deleted; reads with the default guard stop seeing it.
    SoftDelete {
        collection: &'static str,
        id: EntityId,
    },
    /// Physically remove the document.
    HardDelete {
        collection: &'static str,
        id: EntityId,
    },
}

impl Mutation {
    pub fn collection(&self) -> &'static str {
        match self {
            Mutation::Insert { collection, .. }
            | Mutation::Update { collection, .. }
            | Mutation::SoftDelete { collection, .. }
            | Mutation::HardDelete { collection, .. } => collection,
        }
    }

    pub fn id(&self) -> EntityId {
        match self {
            Mutation::Insert { id, .. }
            | Mutation::Update { id, .. }
            | Mutation::SoftDelete { id, .. }
            | Mutation::HardDelete { id, .. } => *id,
        }
    }
}

/// One operation executed inside a transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Evaluate a plan against the transaction's view and return documents.
    Select {
        collection: &'static str,
        plan: QueryPlan,
    },
    /// Count documents matching the plan's filter (window ignored).
    Count {
        collection: &'static str,
        plan: QueryPlan,
    },
    /// Stage a write; it takes effect at commit.
    Write(Mutation),
}

impl Operation {
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::Select { .. } => "select",
            Operation::Count { .. } => "count",
            Operation::Write(Mutation::Insert { .. }) => "insert",
            Operation::Write(Mutation::Update { .. }) => "update",
            Operation::Write(Mutation::SoftDelete { .. }) => "soft_delete",
            Operation::Write(Mutation::HardDelete { .. }) => "hard_delete",
        }
    }

    pub fn collection(&self) -> &'static str {
        match self {
            Operation::Select { collection, .. } | Operation::Count { collection, .. } => {
                collection
            }
            Operation::Write(mutation) => mutation.collection(),
        }
    }
}

/// Result rows of one executed operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Rows {
    Documents(Vec<JsonValue>),
    Count(u64),
    /// The write was staged; its effect is observable at commit.
    Staged,
}

/// Backend-level failures, mapped into [`CoreError`] at the repository
/// boundary so callers never see backend internals.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("operation exceeded its {0:?} timeout")]
    Timeout(Duration),

    #[error("write conflict: {0}")]
    Conflict(String),

    #[error("unknown or completed transaction: {0}")]
    InvalidTransaction(String),

    #[error("malformed document: {0}")]
    Document(String),

    #[error("backend failure: {0}")]
    Backend(String),
}

impl From<StoreError> for CoreError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Timeout(limit) => {
                CoreError::timeout(format!("store call exceeded {limit:?}"))
            }
            StoreError::Conflict(msg) => CoreError::conflict(msg),
            StoreError::InvalidTransaction(msg) => CoreError::invalid_state(msg),
            StoreError::Document(msg) | StoreError::Backend(msg) => CoreError::storage(msg),
        }
    }
}

/// Transactional document store.
///
/// Writes staged inside a transaction are visible to reads in the same
/// transaction and invisible to every other transaction until commit.
/// Commit applies all staged writes atomically or none of them.
pub trait StorageBackend: Send + Sync {
    fn begin(&self) -> Result<TxHandle, StoreError>;

    fn execute(
        &self,
        tx: TxHandle,
        operation: Operation,
        timeout: Duration,
    ) -> Result<Rows, StoreError>;

    fn commit(&self, tx: TxHandle) -> Result<(), StoreError>;

    fn rollback(&self, tx: TxHandle) -> Result<(), StoreError>;
}

impl<B> StorageBackend for Arc<B>
where
    B: StorageBackend + ?Sized,
{
    fn begin(&self) -> Result<TxHandle, StoreError> {
        (**self).begin()
    }

    fn execute(
        &self,
        tx: TxHandle,
        operation: Operation,
        timeout: Duration,
    ) -> Result<Rows, StoreError> {
        (**self).execute(tx, operation, timeout)
    }

    fn commit(&self, tx: TxHandle) -> Result<(), StoreError> {
        (**self).commit(tx)
    }

    fn rollback(&self, tx: TxHandle) -> Result<(), StoreError> {
        (**self).rollback(tx)
    }
}
