//! Aggregate root trait: consistency boundary + queued domain events.

use serde::Serialize;

use crate::entity::Entity;
use crate::error::{CoreError, CoreResult};
use crate::event::{DomainEvent, EventRecord};
use crate::id::EntityId;

/// Aggregate root interface.
///
/// An aggregate root is an entity that owns a consistency boundary, tracks a
/// monotonically increasing version for optimistic concurrency, and queues
/// domain events until a unit of work drains them after a successful commit.
///
/// Aggregates are mutated only through their own operations; the queue is
/// append-only and cleared exactly once per commit (via
/// `take_uncommitted_events`).
pub trait AggregateRoot: Entity {
    /// Monotonically increasing version of the aggregate's state.
    fn version(&self) -> u64;

    /// Events raised since hydration or creation, in raise order.
    fn uncommitted_events(&self) -> &[EventRecord];

    /// Drain the queued events, leaving the queue empty.
    fn take_uncommitted_events(&mut self) -> Vec<EventRecord>;
}

/// Optimistic concurrency expectation for an aggregate's stored state.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Skip version checking (idempotent writes, backfills).
    Any,
    /// Require the stored state to be at an exact version.
    Exact(u64),
}

impl ExpectedVersion {
    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::Exact(v) => v == actual,
        }
    }

    pub fn check(self, actual: u64) -> CoreResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(CoreError::conflict(format!(
                "optimistic concurrency check failed (expected: {self:?}, actual: {actual})"
            )))
        }
    }
}

/// Ordered, append-only queue of uncommitted events.
///
/// Aggregates embed one of these and delegate the `AggregateRoot` event
/// accessors to it. Recording does not touch the aggregate's version; the
/// aggregate bumps its own version alongside each raise.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventQueue {
    records: Vec<EventRecord>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a typed event to the queue.
    pub fn record<E>(&mut self, aggregate_id: EntityId, event: &E) -> CoreResult<()>
    where
        E: DomainEvent + Serialize,
    {
        self.records.push(EventRecord::from_typed(aggregate_id, event)?);
        Ok(())
    }

    pub fn as_slice(&self) -> &[EventRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Empty the queue, returning the records in raise order.
    pub fn drain(&mut self) -> Vec<EventRecord> {
        std::mem::take(&mut self.records)
    }
}
