//! Generic repository: typed persistence over the storage backend contract.
//!
//! A repository is scoped to one aggregate type and one transaction, and is
//! only obtainable from a unit of work. Reads apply the "not soft-deleted"
//! guard unless the specification opts out; writes invalidate the shared
//! by-id cache before reaching the backend and hand the aggregate's
//! uncommitted events to the owning unit of work.

use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use trellis_core::{AggregateRoot, CoreError, CoreResult, Entity, EntityId, ExpectedVersion};
use trellis_query::QuerySpec;

use crate::backend::{
    DELETED_FIELD, Mutation, Operation, Rows, StorageBackend, StoreError, TxHandle, VERSION_FIELD,
};
use crate::cache::DocumentCache;
use crate::unit_of_work::{EventCollector, UowState, WriteLog};

/// An aggregate type persistable through a repository.
///
/// The serde representation must be a JSON object; the repository injects
/// the `id` and `version` fields on write, so the derive does not need to
/// carry them in any particular shape beyond round-tripping.
pub trait Stored:
    AggregateRoot + Entity<Id = EntityId> + Serialize + DeserializeOwned + 'static
{
    const COLLECTION: &'static str;
}

/// Typed repository bound to one transaction.
pub struct Repository<T: Stored> {
    backend: Arc<dyn StorageBackend>,
    tx: TxHandle,
    timeout: Duration,
    cache: Option<Arc<DocumentCache>>,
    events: EventCollector,
    writes: WriteLog,
    owner_state: Arc<Mutex<UowState>>,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Stored> fmt::Debug for Repository<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("collection", &T::COLLECTION)
            .field("tx", &self.tx)
            .finish()
    }
}

impl<T: Stored> Repository<T> {
    pub(crate) fn new(
        backend: Arc<dyn StorageBackend>,
        tx: TxHandle,
        timeout: Duration,
        cache: Option<Arc<DocumentCache>>,
        events: EventCollector,
        writes: WriteLog,
        owner_state: Arc<Mutex<UowState>>,
    ) -> Self {
        Self {
            backend,
            tx,
            timeout,
            cache,
            events,
            writes,
            owner_state,
            _entity: PhantomData,
        }
    }

    /// Persist a new aggregate and queue its events for post-commit dispatch.
    pub fn create(&self, entity: &mut T) -> CoreResult<()> {
        let document = self.serialize_document(entity)?;
        let id = *entity.id();
        self.note_write(id);
        self.run(Operation::Write(Mutation::Insert {
            collection: T::COLLECTION,
            id,
            document,
        }))?;
        self.events.extend(entity.take_uncommitted_events());
        Ok(())
    }

    /// Fetch by id; soft-deleted aggregates are absent.
    pub fn retrieve_by_id(&self, id: EntityId) -> CoreResult<Option<T>> {
        if let Some(cache) = &self.cache {
            if let Some(doc) = cache.get(T::COLLECTION, id) {
                if doc.get(DELETED_FIELD) != Some(&JsonValue::Bool(true)) {
                    return hydrate(&doc).map(Some);
                }
            }
        }

        let spec = QuerySpec::where_field("id")
            .eq(id_value(id)?)
            .paginate(1, 1)?;
        let plan = spec.compile().guarded(DELETED_FIELD);
        let rows = self.run(Operation::Select {
            collection: T::COLLECTION,
            plan,
        })?;

        match rows {
            Rows::Documents(docs) => match docs.into_iter().next() {
                Some(doc) => {
                    // Once this transaction has staged writes its reads see
                    // uncommitted state, which must not reach the shared
                    // cache.
                    if let Some(cache) = &self.cache {
                        if self.writes.is_clean() {
                            cache.insert(T::COLLECTION, id, doc.clone());
                        }
                    }
                    hydrate(&doc).map(Some)
                }
                None => Ok(None),
            },
            other => Err(unexpected_rows("select", &other)),
        }
    }

    /// Fetch by id, failing with `NotFound` when absent or soft-deleted.
    pub fn get_or_fail(&self, id: EntityId) -> CoreResult<T> {
        self.retrieve_by_id(id)?
            .ok_or_else(|| CoreError::not_found(format!("{} {id}", T::COLLECTION)))
    }

    /// Evaluate a specification; deserialization is deferred until the
    /// returned results are iterated.
    pub fn retrieve_by_specification(&self, spec: &QuerySpec) -> CoreResult<QueryResults<T>> {
        let mut plan = spec.compile();
        if !spec.includes_deleted() {
            plan = plan.guarded(DELETED_FIELD);
        }
        let rows = self.run(Operation::Select {
            collection: T::COLLECTION,
            plan,
        })?;
        match rows {
            Rows::Documents(docs) => Ok(QueryResults::new(docs)),
            other => Err(unexpected_rows("select", &other)),
        }
    }

    /// Count matches without materializing documents. Pagination on the
    /// specification does not affect the count.
    pub fn count_by_specification(&self, spec: &QuerySpec) -> CoreResult<u64> {
        let mut plan = spec.compile();
        if !spec.includes_deleted() {
            plan = plan.guarded(DELETED_FIELD);
        }
        let rows = self.run(Operation::Count {
            collection: T::COLLECTION,
            plan,
        })?;
        match rows {
            Rows::Count(count) => Ok(count),
            other => Err(unexpected_rows("count", &other)),
        }
    }

    /// Persist a modified aggregate under its optimistic concurrency check.
    ///
    /// The expected stored version is the aggregate's current version minus
    /// its uncommitted event count: each raise bumped the in-memory version,
    /// while the stored document still carries the pre-raise one.
    pub fn save(&self, entity: &mut T) -> CoreResult<()> {
        let uncommitted = entity.uncommitted_events().len() as u64;
        let expected = ExpectedVersion::Exact(entity.version().saturating_sub(uncommitted));
        let patch = self.serialize_document(entity)?;
        let id = *entity.id();
        self.note_write(id);
        self.run(Operation::Write(Mutation::Update {
            collection: T::COLLECTION,
            id,
            patch,
            expected,
        }))?;
        self.events.extend(entity.take_uncommitted_events());
        Ok(())
    }

    /// Merge a raw field patch into the stored document.
    pub fn update(&self, id: EntityId, patch: JsonValue, expected: ExpectedVersion) -> CoreResult<()> {
        self.note_write(id);
        self.run(Operation::Write(Mutation::Update {
            collection: T::COLLECTION,
            id,
            patch,
            expected,
        }))?;
        Ok(())
    }

    /// Soft delete: the aggregate stops appearing in guarded reads but its
    /// document remains.
    pub fn delete(&self, id: EntityId) -> CoreResult<()> {
        self.note_write(id);
        self.run(Operation::Write(Mutation::SoftDelete {
            collection: T::COLLECTION,
            id,
        }))?;
        Ok(())
    }

    /// Physically remove the document.
    pub fn hard_delete(&self, id: EntityId) -> CoreResult<()> {
        self.note_write(id);
        self.run(Operation::Write(Mutation::HardDelete {
            collection: T::COLLECTION,
            id,
        }))?;
        Ok(())
    }

    fn run(&self, operation: Operation) -> CoreResult<Rows> {
        let kind = operation.kind();
        let started = Instant::now();
        let rows = match self.backend.execute(self.tx, operation, self.timeout) {
            Ok(rows) => rows,
            Err(err) => {
                if matches!(err, StoreError::Timeout(_)) {
                    self.abort_owner();
                }
                return Err(CoreError::from(err));
            }
        };
        tracing::debug!(
            target: "trellis::store",
            collection = T::COLLECTION,
            operation = kind,
            elapsed_us = started.elapsed().as_micros() as u64,
            "store operation"
        );
        Ok(rows)
    }

    /// A timed-out store call poisons the whole transaction: the owning
    /// unit of work is rolled back, so a later `commit` fails with
    /// `InvalidState` instead of applying a partially-failed operation.
    fn abort_owner(&self) {
        if let Ok(mut state) = self.owner_state.lock() {
            if *state == UowState::Open {
                *state = UowState::RolledBack;
                let _ = self.backend.rollback(self.tx);
                self.events.clear();
                tracing::warn!(
                    target: "trellis::store",
                    collection = T::COLLECTION,
                    tx = self.tx.raw(),
                    "store timeout, unit of work rolled back"
                );
            }
        }
    }

    fn note_write(&self, id: EntityId) {
        if let Some(cache) = &self.cache {
            cache.invalidate(T::COLLECTION, id);
        }
        self.writes.record(T::COLLECTION, id);
    }

    fn serialize_document(&self, entity: &T) -> CoreResult<JsonValue> {
        let mut document = serde_json::to_value(entity)
            .map_err(|e| CoreError::storage(format!("serialize {}: {e}", T::COLLECTION)))?;
        let Some(map) = document.as_object_mut() else {
            return Err(CoreError::storage(format!(
                "{} does not serialize to a JSON object",
                T::COLLECTION
            )));
        };
        map.insert("id".into(), id_value(*entity.id())?);
        map.insert(VERSION_FIELD.into(), JsonValue::from(entity.version()));
        map.entry(DELETED_FIELD.to_string())
            .or_insert(JsonValue::Bool(false));
        Ok(document)
    }
}

fn id_value(id: EntityId) -> CoreResult<JsonValue> {
    serde_json::to_value(id).map_err(|e| CoreError::storage(format!("serialize id: {e}")))
}

fn hydrate<T: DeserializeOwned>(doc: &JsonValue) -> CoreResult<T> {
    serde_json::from_value(doc.clone())
        .map_err(|e| CoreError::storage(format!("deserialize document: {e}")))
}

fn unexpected_rows(operation: &str, rows: &Rows) -> CoreError {
    CoreError::storage(format!("{operation} returned unexpected rows: {rows:?}"))
}

/// Lazily deserializing result set of a specification query.
///
/// Documents were materialized by the backend in plan order; each `next`
/// deserializes one of them.
pub struct QueryResults<T> {
    docs: std::vec::IntoIter<JsonValue>,
    _entity: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> QueryResults<T> {
    fn new(docs: Vec<JsonValue>) -> Self {
        Self {
            docs: docs.into_iter(),
            _entity: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.len() == 0
    }

    /// Deserialize the remaining documents eagerly.
    pub fn collect_all(self) -> CoreResult<Vec<T>> {
        self.collect()
    }
}

impl<T: DeserializeOwned> Iterator for QueryResults<T> {
    type Item = CoreResult<T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.docs.next().map(|doc| hydrate(&doc))
    }
}
