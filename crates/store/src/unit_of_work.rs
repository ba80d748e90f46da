//! Unit of work: one transaction, lazily created repositories, post-commit
//! event dispatch.
//!
//! A unit of work is the only way to obtain repositories. It owns one
//! backend transaction and moves through `Open -> Committed | RolledBack`
//! exactly once; operations in a terminal state fail with `InvalidState`.
//! Domain events drained from aggregates during writes are held back and
//! dispatched only after the commit succeeds, so a rolled-back transaction
//! emits nothing.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use trellis_core::{CoreError, CoreResult, EntityId, EventRecord};
use trellis_dispatch::EventDispatcher;

use crate::backend::{StorageBackend, TxHandle};
use crate::cache::DocumentCache;
use crate::repository::{Repository, Stored};

pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(30);

/// Events drained from aggregates during a transaction, held until commit.
///
/// Order is touch order across aggregates, raise order within one aggregate.
#[derive(Debug, Clone, Default)]
pub struct EventCollector {
    inner: Arc<Mutex<Vec<EventRecord>>>,
}

impl EventCollector {
    pub(crate) fn extend(&self, events: Vec<EventRecord>) {
        if let Ok(mut held) = self.inner.lock() {
            held.extend(events);
        }
    }

    fn drain(&self) -> Vec<EventRecord> {
        self.inner
            .lock()
            .map(|mut held| std::mem::take(&mut *held))
            .unwrap_or_default()
    }

    pub(crate) fn clear(&self) {
        if let Ok(mut held) = self.inner.lock() {
            held.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|held| held.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The (collection, id) pairs written during one transaction.
///
/// A transaction with recorded writes must not populate the shared cache
/// from its own reads: its view contains staged, uncommitted state. The log
/// is drained at commit to invalidate the written ids once more, since a
/// read racing the commit may have re-cached the pre-commit document.
#[derive(Debug, Clone, Default)]
pub(crate) struct WriteLog {
    inner: Arc<Mutex<Vec<(&'static str, EntityId)>>>,
}

impl WriteLog {
    pub(crate) fn record(&self, collection: &'static str, id: EntityId) {
        if let Ok(mut log) = self.inner.lock() {
            log.push((collection, id));
        }
    }

    pub(crate) fn is_clean(&self) -> bool {
        self.inner.lock().map(|log| log.is_empty()).unwrap_or(false)
    }

    fn drain(&self) -> Vec<(&'static str, EntityId)> {
        self.inner
            .lock()
            .map(|mut log| std::mem::take(&mut *log))
            .unwrap_or_default()
    }
}

/// Shared wiring from which units of work are begun: the backend, the
/// post-commit event dispatcher, an optional by-id cache, and the per-call
/// store timeout.
#[derive(Clone)]
pub struct StoreContext {
    backend: Arc<dyn StorageBackend>,
    dispatcher: Arc<EventDispatcher>,
    cache: Option<Arc<DocumentCache>>,
    timeout: Duration,
}

impl StoreContext {
    pub fn new(backend: Arc<dyn StorageBackend>, dispatcher: Arc<EventDispatcher>) -> Self {
        Self {
            backend,
            dispatcher,
            cache: None,
            timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    pub fn with_cache(mut self, cache: Arc<DocumentCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    /// Open a transaction and wrap it in a unit of work.
    pub fn begin(&self) -> CoreResult<UnitOfWork> {
        let tx = self.backend.begin().map_err(CoreError::from)?;
        tracing::debug!(target: "trellis::store", tx = tx.raw(), "unit of work opened");
        Ok(UnitOfWork {
            backend: self.backend.clone(),
            dispatcher: self.dispatcher.clone(),
            cache: self.cache.clone(),
            timeout: self.timeout,
            tx,
            state: Arc::new(Mutex::new(UowState::Open)),
            repositories: Mutex::new(HashMap::new()),
            events: EventCollector::default(),
            writes: WriteLog::default(),
        })
    }
}

/// Lifecycle state of a unit of work. Terminal states are final.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum UowState {
    Open,
    Committed,
    RolledBack,
}

pub struct UnitOfWork {
    backend: Arc<dyn StorageBackend>,
    dispatcher: Arc<EventDispatcher>,
    cache: Option<Arc<DocumentCache>>,
    timeout: Duration,
    tx: TxHandle,
    state: Arc<Mutex<UowState>>,
    repositories: Mutex<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
    events: EventCollector,
    writes: WriteLog,
}

impl UnitOfWork {
    /// The repository for `T`, created on first access and memoized for the
    /// lifetime of this unit of work.
    pub fn repository<T: Stored>(&self) -> CoreResult<Arc<Repository<T>>> {
        if self.state() != UowState::Open {
            return Err(CoreError::invalid_state(
                "repository access on a completed unit of work",
            ));
        }
        let mut map = self
            .repositories
            .lock()
            .map_err(|_| CoreError::unexpected("repository registry lock poisoned"))?;
        let entry = map.entry(TypeId::of::<T>()).or_insert_with(|| {
            Arc::new(Repository::<T>::new(
                self.backend.clone(),
                self.tx,
                self.timeout,
                self.cache.clone(),
                self.events.clone(),
                self.writes.clone(),
                self.state.clone(),
            )) as Arc<dyn Any + Send + Sync>
        });
        entry
            .clone()
            .downcast::<Repository<T>>()
            .map_err(|_| CoreError::unexpected("repository registry type confusion"))
    }

    pub fn state(&self) -> UowState {
        self.state
            .lock()
            .map(|state| *state)
            .unwrap_or(UowState::RolledBack)
    }

    /// Commit the transaction, then dispatch the held events.
    ///
    /// A failed backend commit rolls back and surfaces the error with no
    /// events dispatched. A commit that succeeds but whose event delivery
    /// partially fails returns the aggregate delivery error while the
    /// committed state stands.
    pub fn commit(&self) -> CoreResult<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| CoreError::unexpected("unit of work state lock poisoned"))?;
        if *state != UowState::Open {
            return Err(CoreError::invalid_state(format!(
                "commit on a {state:?} unit of work"
            )));
        }

        match self.backend.commit(self.tx) {
            Ok(()) => {
                *state = UowState::Committed;
                drop(state);
                // A read racing the commit may have re-cached a pre-commit
                // document after the stage-time invalidation.
                if let Some(cache) = &self.cache {
                    for (collection, id) in self.writes.drain() {
                        cache.invalidate(collection, id);
                    }
                }
                let events = self.events.drain();
                tracing::debug!(
                    target: "trellis::store",
                    tx = self.tx.raw(),
                    events = events.len(),
                    "unit of work committed"
                );
                self.dispatcher
                    .dispatch_all(&events)
                    .map_err(CoreError::from)
            }
            Err(err) => {
                // The backend discarded the staged writes on failure; mark
                // rolled back and drop the held events.
                let _ = self.backend.rollback(self.tx);
                *state = UowState::RolledBack;
                drop(state);
                self.events.clear();
                tracing::warn!(
                    target: "trellis::store",
                    tx = self.tx.raw(),
                    error = %err,
                    "commit failed, rolled back"
                );
                Err(CoreError::from(err))
            }
        }
    }

    /// Discard the transaction and the held events.
    pub fn rollback(&self) -> CoreResult<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| CoreError::unexpected("unit of work state lock poisoned"))?;
        if *state != UowState::Open {
            return Err(CoreError::invalid_state(format!(
                "rollback on a {state:?} unit of work"
            )));
        }
        *state = UowState::RolledBack;
        drop(state);
        self.events.clear();
        tracing::debug!(target: "trellis::store", tx = self.tx.raw(), "unit of work rolled back");
        self.backend.rollback(self.tx).map_err(CoreError::from)
    }
}

impl Drop for UnitOfWork {
    /// A unit of work dropped while open rolls back; events are discarded.
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            if *state == UowState::Open {
                let _ = self.backend.rollback(self.tx);
                *state = UowState::RolledBack;
                self.events.clear();
                tracing::debug!(
                    target: "trellis::store",
                    tx = self.tx.raw(),
                    "open unit of work dropped, rolled back"
                );
            }
        }
    }
}
