//! `trellis-dispatch`: command/query mediation and domain event delivery.
//!
//! The mediator routes typed commands and queries to exactly one registered
//! handler and returns an explicit [`trellis_core::Outcome`]. The event
//! dispatcher delivers committed domain events to subscribers with a
//! partial-failure policy.

pub mod dispatcher;
pub mod hooks;
pub mod mediator;

pub use dispatcher::{DeliveryError, EventDispatcher, HandlerFailure};
pub use hooks::{DispatchHook, MessageKind, TracingHook};
pub use mediator::{Command, CommandHandler, Mediator, Query, QueryHandler};
