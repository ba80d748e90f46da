//! Explicit success/failure outcome value.
//!
//! Expected business failures travel as values, not as panics or bare error
//! propagation, at the boundary consumed by controllers. Internally the core
//! uses `std::result::Result` with `?`; the mediator converts at the edge.

/// A two-variant outcome: exactly one of success or failure, never both.
///
/// Immutable once constructed: every operation consumes `self` and builds a
/// new value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T, E> {
    Success(T),
    Failure(E),
}

impl<T, E> Outcome<T, E> {
    pub fn success(value: T) -> Self {
        Outcome::Success(value)
    }

    pub fn failure(error: E) -> Self {
        Outcome::Failure(error)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn is_failure(&self) -> bool {
        !self.is_success()
    }

    /// Borrow the success value, if any.
    pub fn value(&self) -> Option<&T> {
        match self {
            Outcome::Success(v) => Some(v),
            Outcome::Failure(_) => None,
        }
    }

    /// Borrow the failure value, if any.
    pub fn failure_value(&self) -> Option<&E> {
        match self {
            Outcome::Success(_) => None,
            Outcome::Failure(e) => Some(e),
        }
    }

    /// Apply `f` to the success value; a failure passes through unchanged
    /// and `f` is never invoked (short-circuit law).
    pub fn map<U, F>(self, f: F) -> Outcome<U, E>
    where
        F: FnOnce(T) -> U,
    {
        match self {
            Outcome::Success(v) => Outcome::Success(f(v)),
            Outcome::Failure(e) => Outcome::Failure(e),
        }
    }

    /// Apply `f` to the failure value; a success passes through unchanged.
    pub fn map_failure<U, F>(self, f: F) -> Outcome<T, U>
    where
        F: FnOnce(E) -> U,
    {
        match self {
            Outcome::Success(v) => Outcome::Success(v),
            Outcome::Failure(e) => Outcome::Failure(f(e)),
        }
    }

    /// As `map`, but `f` itself returns an outcome, chaining without
    /// nested wrapping.
    pub fn flat_map<U, F>(self, f: F) -> Outcome<U, E>
    where
        F: FnOnce(T) -> Outcome<U, E>,
    {
        match self {
            Outcome::Success(v) => f(v),
            Outcome::Failure(e) => Outcome::Failure(e),
        }
    }

    /// The success value, or `default` on failure.
    pub fn get_or_else(self, default: T) -> T {
        match self {
            Outcome::Success(v) => v,
            Outcome::Failure(_) => default,
        }
    }

    pub fn into_result(self) -> Result<T, E> {
        match self {
            Outcome::Success(v) => Ok(v),
            Outcome::Failure(e) => Err(e),
        }
    }
}

impl<T, E> From<Result<T, E>> for Outcome<T, E> {
    fn from(value: Result<T, E>) -> Self {
        match value {
            Ok(v) => Outcome::Success(v),
            Err(e) => Outcome::Failure(e),
        }
    }
}

impl<T, E> From<Outcome<T, E>> for Result<T, E> {
    fn from(value: Outcome<T, E>) -> Self {
        value.into_result()
    }
}
