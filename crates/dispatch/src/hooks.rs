//! Explicit observation chain around mediator dispatch.
//!
//! Cross-cutting behavior (timing, logging) is an explicit pipeline built
//! at construction time around a handler, not implicit syntactic wrapping.

use std::time::Duration;

/// Whether a dispatched message was a command or a query.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MessageKind {
    Command,
    Query,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Command => "command",
            MessageKind::Query => "query",
        }
    }
}

/// Hook invoked around every mediator dispatch, in registration order
/// (`before` forward, `after` reverse).
pub trait DispatchHook: Send + Sync {
    fn before(&self, kind: MessageKind, name: &str);

    fn after(&self, kind: MessageKind, name: &str, success: bool, elapsed: Duration);
}

/// Logs dispatch timing and outcome through `tracing`.
#[derive(Debug, Default)]
pub struct TracingHook;

impl DispatchHook for TracingHook {
    fn before(&self, kind: MessageKind, name: &str) {
        tracing::debug!(
            target: "trellis::mediator",
            kind = kind.as_str(),
            message = name,
            "dispatching"
        );
    }

    fn after(&self, kind: MessageKind, name: &str, success: bool, elapsed: Duration) {
        tracing::debug!(
            target: "trellis::mediator",
            kind = kind.as_str(),
            message = name,
            success,
            elapsed_us = elapsed.as_micros() as u64,
            "dispatched"
        );
    }
}
