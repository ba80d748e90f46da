//! In-memory storage backend for tests and development.
//!
//! Committed documents live behind an `RwLock`; each transaction stages its
//! mutations in a side map. Reads inside a transaction see the committed
//! state with that transaction's staged writes replayed on top. Commit
//! validates and applies all staged writes against a working copy, then
//! swaps it in, so a failed commit leaves the committed state untouched.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use serde_json::Value as JsonValue;

use trellis_core::EntityId;

use crate::backend::{
    DELETED_FIELD, Mutation, Operation, Rows, StorageBackend, StoreError, TxHandle, VERSION_FIELD,
};

type Collection = HashMap<EntityId, JsonValue>;
type Committed = HashMap<&'static str, Collection>;

#[derive(Debug, Default)]
pub struct InMemoryBackend {
    committed: RwLock<Committed>,
    staged: Mutex<HashMap<TxHandle, Vec<Mutation>>>,
    next_tx: AtomicU64,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed document count for one collection (diagnostics and tests).
    pub fn committed_len(&self, collection: &str) -> usize {
        self.committed
            .read()
            .map(|map| map.get(collection).map(Collection::len).unwrap_or(0))
            .unwrap_or(0)
    }

    fn lock_staged(&self) -> Result<std::sync::MutexGuard<'_, HashMap<TxHandle, Vec<Mutation>>>, StoreError> {
        self.staged
            .lock()
            .map_err(|_| StoreError::Backend("staged transaction lock poisoned".into()))
    }

    /// Committed state of `collection` with this transaction's staged writes
    /// replayed on top (read-your-writes).
    fn transaction_view(
        &self,
        tx: TxHandle,
        collection: &'static str,
    ) -> Result<Collection, StoreError> {
        let staged = self.lock_staged()?;
        let mutations = staged
            .get(&tx)
            .ok_or_else(|| StoreError::InvalidTransaction(format!("tx {}", tx.raw())))?;

        let mut view = self
            .committed
            .read()
            .map_err(|_| StoreError::Backend("committed state lock poisoned".into()))?
            .get(collection)
            .cloned()
            .unwrap_or_default();

        for mutation in mutations.iter().filter(|m| m.collection() == collection) {
            // The replay is a preview; full validation happens at commit.
            match mutation {
                Mutation::Insert { id, document, .. } => {
                    view.insert(*id, document.clone());
                }
                Mutation::Update { id, patch, .. } => {
                    if let Some(doc) = view.get_mut(id) {
                        merge_patch(doc, patch);
                    }
                }
                Mutation::SoftDelete { id, .. } => {
                    if let Some(doc) = view.get_mut(id) {
                        set_field(doc, DELETED_FIELD, JsonValue::Bool(true));
                    }
                }
                Mutation::HardDelete { id, .. } => {
                    view.remove(id);
                }
            }
        }
        Ok(view)
    }

    fn apply(collection: &mut Collection, mutation: &Mutation) -> Result<(), StoreError> {
        match mutation {
            Mutation::Insert { id, document, .. } => {
                if !document.is_object() {
                    return Err(StoreError::Document(format!(
                        "insert of {id} is not a JSON object"
                    )));
                }
                if collection.contains_key(id) {
                    return Err(StoreError::Conflict(format!(
                        "insert target {id} already exists"
                    )));
                }
                let mut document = document.clone();
                if document.get(VERSION_FIELD).is_none() {
                    set_field(&mut document, VERSION_FIELD, JsonValue::from(1u64));
                }
                if document.get(DELETED_FIELD).is_none() {
                    set_field(&mut document, DELETED_FIELD, JsonValue::Bool(false));
                }
                collection.insert(*id, document);
                Ok(())
            }
            Mutation::Update {
                id,
                patch,
                expected,
                ..
            } => {
                let Some(doc) = collection.get_mut(id) else {
                    return Err(StoreError::Conflict(format!("update target {id} missing")));
                };
                let actual = stored_version(doc);
                if !expected.matches(actual) {
                    return Err(StoreError::Conflict(format!(
                        "stale write on {id} (expected {expected:?}, stored {actual})"
                    )));
                }
                if !patch.is_object() {
                    return Err(StoreError::Document(format!(
                        "patch for {id} is not a JSON object"
                    )));
                }
                let patch_has_version = patch.get(VERSION_FIELD).is_some();
                merge_patch(doc, patch);
                if !patch_has_version {
                    set_field(doc, VERSION_FIELD, JsonValue::from(actual + 1));
                }
                Ok(())
            }
            Mutation::SoftDelete { id, .. } => {
                let Some(doc) = collection.get_mut(id) else {
                    return Err(StoreError::Conflict(format!("delete target {id} missing")));
                };
                let bumped = stored_version(doc) + 1;
                set_field(doc, DELETED_FIELD, JsonValue::Bool(true));
                set_field(doc, VERSION_FIELD, JsonValue::from(bumped));
                Ok(())
            }
            Mutation::HardDelete { id, .. } => {
                if collection.remove(id).is_none() {
                    return Err(StoreError::Conflict(format!("delete target {id} missing")));
                }
                Ok(())
            }
        }
    }
}

fn stored_version(doc: &JsonValue) -> u64 {
    doc.get(VERSION_FIELD).and_then(JsonValue::as_u64).unwrap_or(0)
}

fn set_field(doc: &mut JsonValue, field: &str, value: JsonValue) {
    if let Some(map) = doc.as_object_mut() {
        map.insert(field.to_string(), value);
    }
}

/// Shallow merge: every top-level entry of `patch` replaces the stored one.
fn merge_patch(doc: &mut JsonValue, patch: &JsonValue) {
    if let (Some(target), Some(source)) = (doc.as_object_mut(), patch.as_object()) {
        for (key, value) in source {
            target.insert(key.clone(), value.clone());
        }
    }
}

impl StorageBackend for InMemoryBackend {
    fn begin(&self) -> Result<TxHandle, StoreError> {
        let tx = TxHandle::new(self.next_tx.fetch_add(1, Ordering::SeqCst) + 1);
        self.lock_staged()?.insert(tx, Vec::new());
        Ok(tx)
    }

    fn execute(
        &self,
        tx: TxHandle,
        operation: Operation,
        timeout: Duration,
    ) -> Result<Rows, StoreError> {
        // Memory operations are effectively instant; a zero timeout is the
        // deterministic way to exercise timeout handling.
        if timeout.is_zero() {
            return Err(StoreError::Timeout(timeout));
        }

        match operation {
            Operation::Select { collection, plan } => {
                let view = self.transaction_view(tx, collection)?;
                Ok(Rows::Documents(plan.execute(view.into_values())))
            }
            Operation::Count { collection, plan } => {
                let view = self.transaction_view(tx, collection)?;
                let count = view.values().filter(|doc| plan.matches(doc)).count();
                Ok(Rows::Count(count as u64))
            }
            Operation::Write(mutation) => {
                let mut staged = self.lock_staged()?;
                let mutations = staged
                    .get_mut(&tx)
                    .ok_or_else(|| StoreError::InvalidTransaction(format!("tx {}", tx.raw())))?;
                mutations.push(mutation);
                Ok(Rows::Staged)
            }
        }
    }

    fn commit(&self, tx: TxHandle) -> Result<(), StoreError> {
        let mutations = self
            .lock_staged()?
            .remove(&tx)
            .ok_or_else(|| StoreError::InvalidTransaction(format!("tx {}", tx.raw())))?;

        let mut committed = self
            .committed
            .write()
            .map_err(|_| StoreError::Backend("committed state lock poisoned".into()))?;

        // Validate and apply against a working copy; swap in only if every
        // mutation passed, so a failed commit applies nothing.
        let mut working = committed.clone();
        for mutation in &mutations {
            let collection = working.entry(mutation.collection()).or_default();
            Self::apply(collection, mutation)?;
        }
        *committed = working;
        Ok(())
    }

    fn rollback(&self, tx: TxHandle) -> Result<(), StoreError> {
        self.lock_staged()?
            .remove(&tx)
            .map(|_| ())
            .ok_or_else(|| StoreError::InvalidTransaction(format!("tx {}", tx.raw())))
    }
}
