//! Component ids, pairs and flags packed into one 64-bit space.
//!
//! Layout of an [`Id`]:
//! - bits 0..32: entity index (plain id) or target index (pair)
//! - bits 32..48: entity generation (plain id)
//! - bits 32..56: relationship index (pair)
//! - bits 56..64: flag byte ([`IdFlags`])
//!
//! Ids order numerically. Plain ids sort before pairs, and all pairs with the
//! same relationship form one contiguous run, which the id index relies on to
//! describe wildcard matches as a `(first index, count)` range of a type.

use std::fmt;

use bitflags::bitflags;
use smallvec::SmallVec;

use crate::entity::{Entity, EntityIndexRaw};

bitflags! {
    /// Marker bits stored in the top byte of an [`Id`].
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct IdFlags: u64 {
        /// The id is a `(relationship, target)` pair.
        const PAIR = 1 << 63;
        /// Instances copy the component from their base when `IsA` is added.
        const AUTO_OVERRIDE = 1 << 62;
        /// The component can be enabled/disabled per entity.
        const TOGGLE = 1 << 61;
    }
}

const FLAGS_MASK: u64 = 0xFF << 56;
const LOW_MASK: u64 = 0xFFFF_FFFF;
const RELATIONSHIP_MASK: u64 = 0x00FF_FFFF;
const WILDCARD_INDEX: u32 = Entity::WILDCARD.index();

/// Identifier of anything that can be added to an entity.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Id(u64);

impl Id {
    /// The invalid id.
    pub const NULL: Id = Id(0);

    /// Plain wildcard: matches any id.
    pub const WILDCARD: Id = Id::entity(Entity::WILDCARD);

    /// `(*, *)`: matches any pair.
    pub const ANY_PAIR: Id = Id::pair(Entity::WILDCARD, Entity::WILDCARD);

    /// The `Prefab` tag.
    pub const PREFAB: Id = Id::entity(Entity::PREFAB);

    /// Id of an entity used as a component or tag.
    #[must_use]
    pub const fn entity(entity: Entity) -> Self {
        Self(entity.to_bits())
    }

    /// Pair of a relationship and a target entity. Only the slot indices are
    /// encoded; generations are not part of a pair.
    #[must_use]
    pub const fn pair(relationship: Entity, target: Entity) -> Self {
        Self::pair_from_indices(relationship.index(), target.index())
    }

    /// Pair from raw slot indices. The relationship is truncated to 24 bits.
    #[must_use]
    pub const fn pair_from_indices(first: EntityIndexRaw, second: EntityIndexRaw) -> Self {
        Self(IdFlags::PAIR.bits() | ((first as u64 & RELATIONSHIP_MASK) << 32) | second as u64)
    }

    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    #[must_use]
    pub const fn to_bits(self) -> u64 {
        self.0
    }

    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub const fn is_pair(self) -> bool {
        self.0 & IdFlags::PAIR.bits() != 0
    }

    /// Relationship index of a pair, 0 for plain ids.
    #[must_use]
    pub const fn first(self) -> EntityIndexRaw {
        if self.is_pair() {
            ((self.0 >> 32) & RELATIONSHIP_MASK) as u32
        } else {
            0
        }
    }

    /// Target index of a pair, or the entity index of a plain id.
    #[must_use]
    pub const fn second(self) -> EntityIndexRaw {
        (self.0 & LOW_MASK) as u32
    }

    /// Entity index of a plain id.
    #[must_use]
    pub const fn index(self) -> EntityIndexRaw {
        self.second()
    }

    #[must_use]
    pub const fn flags(self) -> IdFlags {
        IdFlags::from_bits_truncate(self.0 & FLAGS_MASK)
    }

    #[must_use]
    pub const fn with_flags(self, flags: IdFlags) -> Self {
        Self(self.0 | flags.bits())
    }

    /// Clear `AUTO_OVERRIDE` and `TOGGLE`, keeping the pair bit.
    #[must_use]
    pub const fn strip_flags(self) -> Self {
        Self(self.0 & !(FLAGS_MASK & !IdFlags::PAIR.bits()))
    }

    /// Whether the id carries flags other than `PAIR`.
    #[must_use]
    pub const fn has_marker_flags(self) -> bool {
        self.0 & FLAGS_MASK & !IdFlags::PAIR.bits() != 0
    }

    /// Whether the id is a pattern containing a wildcard.
    #[must_use]
    pub const fn is_wildcard(self) -> bool {
        if self.is_pair() {
            self.first() == WILDCARD_INDEX || self.second() == WILDCARD_INDEX
        } else {
            self.0 == Self::WILDCARD.0
        }
    }

    /// The plain entity behind this id, if it is neither a pair nor flagged.
    #[must_use]
    pub const fn as_entity(self) -> Option<Entity> {
        if self.0 & FLAGS_MASK == 0 && self.0 != 0 {
            Some(Entity::from_bits(self.0))
        } else {
            None
        }
    }

    /// Check whether this id matches a (possibly wildcard) pattern.
    #[must_use]
    pub fn matches(self, pattern: Self) -> bool {
        if self == pattern {
            return true;
        }
        if !pattern.is_wildcard() {
            return false;
        }
        if !pattern.is_pair() {
            return true;
        }
        self.is_pair()
            && self.flags() == pattern.flags()
            && (pattern.first() == WILDCARD_INDEX || pattern.first() == self.first())
            && (pattern.second() == WILDCARD_INDEX || pattern.second() == self.second())
    }
}

impl From<Entity> for Id {
    fn from(entity: Entity) -> Self {
        Self::entity(entity)
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flags = self.flags();
        if flags.contains(IdFlags::AUTO_OVERRIDE) {
            write!(f, "AUTO_OVERRIDE|")?;
        }
        if flags.contains(IdFlags::TOGGLE) {
            write!(f, "TOGGLE|")?;
        }
        if self.is_pair() {
            write!(f, "({}, {})", self.first(), self.second())
        } else {
            let e = Entity::from_bits(self.strip_flags().0);
            write!(f, "#{}v{}", e.index(), e.generation().get())
        }
    }
}

/// Sorted, deduplicated list of ids: the signature of a table.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Type(SmallVec<[Id; 8]>);

impl Type {
    #[must_use]
    pub fn new() -> Self {
        Self(SmallVec::new())
    }

    /// Insert `id` keeping the list sorted. Returns `false` if already present.
    pub fn insert(&mut self, id: Id) -> bool {
        match self.0.binary_search(&id) {
            Ok(_) => false,
            Err(pos) => {
                self.0.insert(pos, id);
                true
            }
        }
    }

    /// Remove `id`. Returns `false` if it was not present.
    pub fn remove(&mut self, id: Id) -> bool {
        match self.0.binary_search(&id) {
            Ok(pos) => {
                self.0.remove(pos);
                true
            }
            Err(_) => false,
        }
    }

    #[must_use]
    pub fn contains(&self, id: Id) -> bool {
        self.0.binary_search(&id).is_ok()
    }

    /// Position of `id` in the type.
    #[must_use]
    pub fn index_of(&self, id: Id) -> Option<usize> {
        self.0.binary_search(&id).ok()
    }

    /// Position of the first id matching `pattern`.
    #[must_use]
    pub fn first_match(&self, pattern: Id) -> Option<usize> {
        if !pattern.is_wildcard() {
            return self.index_of(pattern);
        }
        self.0.iter().position(|id| id.matches(pattern))
    }

    #[must_use]
    pub fn as_slice(&self) -> &[Id] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = Id> + '_ {
        self.0.iter().copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Id> for Type {
    fn from_iter<I: IntoIterator<Item = Id>>(iter: I) -> Self {
        let mut ids: SmallVec<[Id; 8]> = iter.into_iter().collect();
        ids.sort_unstable();
        ids.dedup();
        Self(ids)
    }
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.iter()).finish()
    }
}
