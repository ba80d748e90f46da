//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by structural value; they carry
/// no identifier. To "modify" one, construct a new one. Contrast with
/// [`crate::Entity`], whose equality is identity-only.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
