//! Entity identifiers with generational indices.
//!
//! An entity is a 32-bit slot index plus a 16-bit generation. Packed into a
//! `u64` the generation occupies bits 32..48, which keeps the top byte free
//! for the id flags defined in [`crate::id`].

use std::fmt;

/// Generation counter to detect stale entity references.
/// Incremented each time an entity slot is recycled.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Generation(u16);

impl Generation {
    /// Create a new generation (starts at 0).
    #[must_use]
    pub const fn new() -> Self {
        Self(0)
    }

    /// Increment the generation counter, wrapping on overflow.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    /// Get the raw generation value.
    #[must_use]
    pub const fn get(self) -> u16 {
        self.0
    }
}

impl fmt::Debug for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen{}", self.0)
    }
}

/// Raw entity index into the entity index.
pub type EntityIndexRaw = u32;

/// A unique identifier for an entity in a [`World`](crate::World).
///
/// Components, relationships and prefabs are all entities. Index 0 is never
/// handed out, so [`Entity::NULL`] can never be alive.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Entity {
    index: EntityIndexRaw,
    generation: Generation,
}

impl Entity {
    /// The invalid entity.
    pub const NULL: Entity = Entity::builtin(0);

    /// Matches any entity when used in an id pattern.
    pub const WILDCARD: Entity = Entity::builtin(1);

    /// Inheritance relationship: `(IsA, base)`.
    pub const IS_A: Entity = Entity::builtin(2);

    /// Hierarchy relationship: `(ChildOf, parent)`.
    pub const CHILD_OF: Entity = Entity::builtin(3);

    /// Tag marking an entity as a template. Queries skip prefab tables unless
    /// they mention this tag.
    pub const PREFAB: Entity = Entity::builtin(4);

    /// Number of slots reserved for builtin entities, including `NULL`.
    pub(crate) const BUILTIN_COUNT: u32 = 5;

    const fn builtin(index: EntityIndexRaw) -> Self {
        Self {
            index,
            generation: Generation(0),
        }
    }

    /// Create an entity from a slot index and generation.
    #[must_use]
    pub const fn new(index: EntityIndexRaw, generation: Generation) -> Self {
        Self { index, generation }
    }

    /// Slot index of this entity.
    #[must_use]
    pub const fn index(self) -> EntityIndexRaw {
        self.index
    }

    #[must_use]
    pub const fn generation(self) -> Generation {
        self.generation
    }

    #[must_use]
    pub const fn is_null(self) -> bool {
        self.index == 0
    }

    /// Pack the entity into a `u64`: index in the low 32 bits, generation in
    /// bits 32..48.
    #[must_use]
    pub const fn to_bits(self) -> u64 {
        ((self.generation.0 as u64) << 32) | (self.index as u64)
    }

    /// Unpack an entity from a `u64`. Bits above 48 are ignored.
    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self {
            index: bits as u32,
            generation: Generation((bits >> 32) as u16),
        }
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity({}v{})", self.index, self.generation.0)
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation.0)
    }
}
