//! `trellis-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure
//! concerns): identifiers, entity/aggregate/value-object traits, the
//! immutable domain event record, the explicit success/failure outcome
//! value, and the shared error taxonomy.

pub mod aggregate;
pub mod entity;
pub mod error;
pub mod event;
pub mod id;
pub mod outcome;
pub mod value_object;

pub use aggregate::{AggregateRoot, EventQueue, ExpectedVersion};
pub use entity::{Entity, same_identity};
pub use error::{CoreError, CoreResult};
pub use event::{DomainEvent, EventRecord};
pub use id::{CorrelationId, EntityId, EventId};
pub use outcome::Outcome;
pub use value_object::ValueObject;
