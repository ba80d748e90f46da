//! Error taxonomy shared by every layer of the core.

use thiserror::Error;

/// Result type used for error propagation across the core.
///
/// This is ordinary `std::result::Result` plumbing (`?` friendly). The
/// explicit success/failure value handed to callers at the mediator boundary
/// is [`crate::Outcome`], not this alias.
pub type CoreResult<T> = Result<T, CoreError>;

/// Failure taxonomy for the data-access and orchestration core.
///
/// Deterministic, caller-visible failures only. Backend-specific failures are
/// wrapped in `Storage` so callers never see backend internals.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Malformed query shape (e.g. page or page_size below 1). Raised at
    /// specification construction time, never at execution time.
    #[error("invalid specification: {0}")]
    InvalidSpecification(String),

    /// An entity was absent when existence was required.
    #[error("not found: {0}")]
    NotFound(String),

    /// Optimistic concurrency check failed (stale version).
    #[error("conflict: {0}")]
    Conflict(String),

    /// A command or query was dispatched with no handler registered.
    #[error("no handler registered for {0}")]
    HandlerNotRegistered(String),

    /// A second handler was registered for an already-claimed type.
    #[error("handler already registered for {0}")]
    DuplicateHandler(String),

    /// Programmer error: an operation invoked in a terminal state
    /// (e.g. double commit/rollback on one unit of work).
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A store call exceeded its caller-supplied timeout.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Backend failure, wrapped so backend internals never leak.
    #[error("storage failure: {0}")]
    Storage(String),

    /// A non-Outcome failure (handler panic, aggregate dispatch failure)
    /// captured and folded into the taxonomy.
    #[error("unexpected failure: {0}")]
    Unexpected(String),
}

impl CoreError {
    pub fn invalid_specification(msg: impl Into<String>) -> Self {
        Self::InvalidSpecification(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn unexpected(msg: impl Into<String>) -> Self {
        Self::Unexpected(msg.into())
    }
}
