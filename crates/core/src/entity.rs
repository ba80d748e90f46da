//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// An entity's equality is defined solely by its identifier: two entities
/// with the same id are the same entity regardless of attribute values.
/// Attribute-level equality belongs to value objects.
pub trait Entity {
    /// Strongly-typed entity identifier, immutable after creation.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}

/// Identity-based equality for entities.
pub fn same_identity<E: Entity>(a: &E, b: &E) -> bool {
    a.id() == b.id()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::EntityId;

    struct Customer {
        id: EntityId,
        name: String,
    }

    impl Entity for Customer {
        type Id = EntityId;

        fn id(&self) -> &Self::Id {
            &self.id
        }
    }

    #[test]
    fn identity_ignores_attribute_values() {
        let id = EntityId::new();
        let a = Customer {
            id,
            name: "before".into(),
        };
        let b = Customer {
            id,
            name: "after".into(),
        };
        assert!(same_identity(&a, &b));

        let c = Customer {
            id: EntityId::new(),
            name: "before".into(),
        };
        assert!(!same_identity(&a, &c));
    }
}
