//! Domain events: immutable facts describing state changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::CoreError;
use crate::id::{EntityId, EventId};

/// A typed domain event.
///
/// Events are:
/// - **immutable** (treat them as facts, named in past tense)
/// - **self-describing** (stable `event_type` tag)
/// - stamped with business time at creation
pub trait DomainEvent: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name/type identifier (e.g. "user.created").
    fn event_type(&self) -> &'static str;

    /// When the event occurred (business time).
    fn occurred_at(&self) -> DateTime<Utc>;
}

/// Type-erased, immutable record of a single domain event.
///
/// This is the unit an aggregate queues and the dispatcher delivers. Fields
/// are private with read-only accessors; a record is never mutated after
/// creation. The payload is the serde representation of the typed event,
/// which keeps aggregates decoupled from subscriber code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    event_id: EventId,
    aggregate_id: EntityId,
    event_type: String,
    occurred_at: DateTime<Utc>,
    payload: JsonValue,
}

impl EventRecord {
    /// Build a record from a typed event, capturing its metadata.
    pub fn from_typed<E>(aggregate_id: EntityId, event: &E) -> Result<Self, CoreError>
    where
        E: DomainEvent + Serialize,
    {
        let payload = serde_json::to_value(event).map_err(|e| {
            CoreError::storage(format!("event payload serialization failed: {e}"))
        })?;

        Ok(Self {
            event_id: EventId::new(),
            aggregate_id,
            event_type: event.event_type().to_string(),
            occurred_at: event.occurred_at(),
            payload,
        })
    }

    pub fn event_id(&self) -> EventId {
        self.event_id
    }

    pub fn aggregate_id(&self) -> EntityId {
        self.aggregate_id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn payload(&self) -> &JsonValue {
        &self.payload
    }

    /// Deserialize the payload back into its typed event form.
    pub fn typed_payload<E>(&self) -> Result<E, CoreError>
    where
        E: serde::de::DeserializeOwned,
    {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            CoreError::storage(format!(
                "event payload deserialization failed for '{}': {e}",
                self.event_type
            ))
        })
    }
}
