//! Sparse entity index: entity → (table, row).
//!
//! Slots live in fixed-size pages allocated on first touch, so lookups are two
//! array indexings. A dense array lists every allocated id: the prefix
//! `[0, alive)` holds alive entities, the suffix holds recycled ids whose
//! generation was already bumped when they were deleted.

use crate::{
    entity::{Entity, EntityIndexRaw, Generation},
    error::{EcsError, EcsResult},
    table::TableId,
};

const PAGE_BITS: u32 = 12;
const PAGE_SIZE: usize = 1 << PAGE_BITS;
const PAGE_MASK: u32 = (1 << PAGE_BITS) - 1;

/// Storage location of an alive entity.
///
/// `table` is `None` only between creating an entity in deferred mode and the
/// flush that places it in the root table.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EntityRecord {
    pub table: Option<TableId>,
    pub row: u32,
}

#[derive(Clone, Copy, Default)]
struct Slot {
    /// Position in `dense` plus one; 0 when the slot was never allocated.
    dense: u32,
    generation: Generation,
    record: EntityRecord,
}

#[derive(Default)]
pub struct EntityIndex {
    pages: Vec<Option<Box<[Slot]>>>,
    dense: Vec<Entity>,
    alive: usize,
    max_index: EntityIndexRaw,
}

impl EntityIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an index with room for `capacity` entities in the dense array.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            dense: Vec::with_capacity(capacity),
            ..Self::default()
        }
    }

    fn slot(&self, index: EntityIndexRaw) -> Option<&Slot> {
        let page = self.pages.get((index >> PAGE_BITS) as usize)?.as_ref()?;
        let slot = &page[(index & PAGE_MASK) as usize];
        (slot.dense != 0).then_some(slot)
    }

    fn slot_mut(&mut self, index: EntityIndexRaw) -> Option<&mut Slot> {
        let page = self.pages.get_mut((index >> PAGE_BITS) as usize)?.as_mut()?;
        let slot = &mut page[(index & PAGE_MASK) as usize];
        (slot.dense != 0).then_some(slot)
    }

    fn slot_ensure(&mut self, index: EntityIndexRaw) -> &mut Slot {
        let page = (index >> PAGE_BITS) as usize;
        if page >= self.pages.len() {
            self.pages.resize_with(page + 1, || None);
        }
        let page = self.pages[page]
            .get_or_insert_with(|| vec![Slot::default(); PAGE_SIZE].into_boxed_slice());
        &mut page[(index & PAGE_MASK) as usize]
    }

    fn alive_slot(&self, entity: Entity) -> Option<&Slot> {
        let slot = self.slot(entity.index())?;
        ((slot.dense as usize) <= self.alive && slot.generation == entity.generation())
            .then_some(slot)
    }

    /// Swap the entities at two dense positions, keeping slots in sync.
    fn swap_dense(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        self.dense.swap(a, b);
        let (ea, eb) = (self.dense[a], self.dense[b]);
        if let Some(slot) = self.slot_mut(ea.index()) {
            slot.dense = a as u32 + 1;
        }
        if let Some(slot) = self.slot_mut(eb.index()) {
            slot.dense = b as u32 + 1;
        }
    }

    /// Allocate an entity, recycling a deleted slot when one is available.
    pub fn create(&mut self) -> Entity {
        if self.alive < self.dense.len() {
            let entity = self.dense[self.alive];
            self.alive += 1;
            if let Some(slot) = self.slot_mut(entity.index()) {
                slot.record = EntityRecord::default();
            }
            return entity;
        }

        self.max_index += 1;
        let entity = Entity::new(self.max_index, Generation::new());
        self.dense.push(entity);
        self.alive += 1;
        let dense = self.dense.len() as u32;
        let slot = self.slot_ensure(entity.index());
        *slot = Slot {
            dense,
            generation: entity.generation(),
            record: EntityRecord::default(),
        };
        entity
    }

    /// Make exactly `entity` alive. Returns `false` if its slot is alive with
    /// a different generation.
    pub fn ensure(&mut self, entity: Entity) -> bool {
        if entity.is_null() {
            return false;
        }
        if let Some(slot) = self.slot(entity.index()) {
            let pos = slot.dense as usize - 1;
            if pos < self.alive {
                return slot.generation == entity.generation();
            }
            let alive = self.alive;
            self.swap_dense(pos, alive);
            self.alive += 1;
            self.dense[alive] = entity;
            if let Some(slot) = self.slot_mut(entity.index()) {
                slot.generation = entity.generation();
                slot.record = EntityRecord::default();
            }
            return true;
        }

        // Indexes skipped by `ensure` are never handed out by `create`.
        self.max_index = self.max_index.max(entity.index());
        self.dense.push(entity);
        let last = self.dense.len() - 1;
        let alive = self.alive;
        let dense = self.dense.len() as u32;
        *self.slot_ensure(entity.index()) = Slot {
            dense,
            generation: entity.generation(),
            record: EntityRecord::default(),
        };
        self.swap_dense(last, alive);
        self.alive += 1;
        true
    }

    /// Delete an entity. Returns its last record, or `None` if it was not
    /// alive.
    pub fn delete(&mut self, entity: Entity) -> Option<EntityRecord> {
        let slot = self.alive_slot(entity)?;
        let pos = slot.dense as usize - 1;
        let record = slot.record;

        let last_alive = self.alive - 1;
        self.swap_dense(pos, last_alive);
        self.alive -= 1;

        let next = Entity::new(entity.index(), entity.generation().next());
        self.dense[last_alive] = next;
        if let Some(slot) = self.slot_mut(entity.index()) {
            slot.generation = next.generation();
            slot.record = EntityRecord::default();
        }
        Some(record)
    }

    #[must_use]
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.alive_slot(entity).is_some()
    }

    /// The alive entity currently occupying slot `index`, if any.
    #[must_use]
    pub fn alive_at(&self, index: EntityIndexRaw) -> Option<Entity> {
        let slot = self.slot(index)?;
        ((slot.dense as usize) <= self.alive).then(|| Entity::new(index, slot.generation))
    }

    pub fn lookup(&self, entity: Entity) -> EcsResult<EntityRecord> {
        self.alive_slot(entity)
            .map(|slot| slot.record)
            .ok_or(EcsError::NotAlive(entity))
    }

    /// Update the location of an alive entity.
    pub fn set_record(&mut self, entity: Entity, record: EntityRecord) {
        if self.alive_slot(entity).is_none() {
            return;
        }
        if let Some(slot) = self.slot_mut(entity.index()) {
            slot.record = record;
        }
    }

    #[must_use]
    pub fn alive_count(&self) -> usize {
        self.alive
    }

    /// Alive entities in dense order.
    #[must_use]
    pub fn alive(&self) -> &[Entity] {
        &self.dense[..self.alive]
    }
}
