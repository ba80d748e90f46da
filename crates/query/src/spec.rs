//! Specification trait: composable business-rule predicates.
//!
//! Specifications let business rules be unit-tested against instantiated
//! objects without a store. Combinators are generic adapter structs (the
//! iterator-adapter shape), not a base-class hierarchy.

/// A predicate over candidates of type `T`.
pub trait Specification<T> {
    /// Evaluate this specification against an instantiated object.
    fn is_satisfied_by(&self, candidate: &T) -> bool;

    /// Both this and `other` must hold.
    fn and<S>(self, other: S) -> AndSpec<Self, S>
    where
        Self: Sized,
        S: Specification<T>,
    {
        AndSpec {
            left: self,
            right: other,
        }
    }

    /// Either this or `other` must hold.
    fn or<S>(self, other: S) -> OrSpec<Self, S>
    where
        Self: Sized,
        S: Specification<T>,
    {
        OrSpec {
            left: self,
            right: other,
        }
    }

    /// This must not hold.
    fn not(self) -> NotSpec<Self>
    where
        Self: Sized,
    {
        NotSpec { inner: self }
    }
}

/// Conjunction of two specifications.
#[derive(Debug, Clone, Copy)]
pub struct AndSpec<A, B> {
    left: A,
    right: B,
}

impl<T, A, B> Specification<T> for AndSpec<A, B>
where
    A: Specification<T>,
    B: Specification<T>,
{
    fn is_satisfied_by(&self, candidate: &T) -> bool {
        self.left.is_satisfied_by(candidate) && self.right.is_satisfied_by(candidate)
    }
}

/// Disjunction of two specifications.
#[derive(Debug, Clone, Copy)]
pub struct OrSpec<A, B> {
    left: A,
    right: B,
}

impl<T, A, B> Specification<T> for OrSpec<A, B>
where
    A: Specification<T>,
    B: Specification<T>,
{
    fn is_satisfied_by(&self, candidate: &T) -> bool {
        self.left.is_satisfied_by(candidate) || self.right.is_satisfied_by(candidate)
    }
}

/// Negation of a specification.
#[derive(Debug, Clone, Copy)]
pub struct NotSpec<S> {
    inner: S,
}

impl<T, S> Specification<T> for NotSpec<S>
where
    S: Specification<T>,
{
    fn is_satisfied_by(&self, candidate: &T) -> bool {
        !self.inner.is_satisfied_by(candidate)
    }
}

/// Specification from a closure.
pub struct PredicateSpec<F> {
    predicate: F,
}

impl<F> PredicateSpec<F> {
    pub fn new<T>(predicate: F) -> Self
    where
        F: Fn(&T) -> bool,
    {
        Self { predicate }
    }
}

impl<T, F> Specification<T> for PredicateSpec<F>
where
    F: Fn(&T) -> bool,
{
    fn is_satisfied_by(&self, candidate: &T) -> bool {
        (self.predicate)(candidate)
    }
}

// References delegate, so specifications can be shared without cloning.
impl<T, S> Specification<T> for &S
where
    S: Specification<T> + ?Sized,
{
    fn is_satisfied_by(&self, candidate: &T) -> bool {
        (**self).is_satisfied_by(candidate)
    }
}
