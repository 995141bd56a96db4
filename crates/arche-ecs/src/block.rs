//! Fixed-size block allocator for small, frequently churned records.
//!
//! Elements live in blocks of a fixed capacity that are never reallocated, so
//! a [`BlockId`] stays valid until the element is freed. Freed slots are
//! threaded onto an intrusive free list and handed out again before a new
//! block is allocated.

use std::fmt;

/// Stable handle to an element of a [`BlockAllocator`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(u32);

impl BlockId {
    #[must_use]
    pub const fn as_raw(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId({})", self.0)
    }
}

enum Slot<T> {
    Vacant { next: Option<u32> },
    Occupied(T),
}

pub struct BlockAllocator<T> {
    blocks: Vec<Box<[Slot<T>]>>,
    block_capacity: usize,
    free_head: Option<u32>,
    /// First slot that has never been handed out.
    next_unused: u32,
    len: usize,
}

impl<T> BlockAllocator<T> {
    /// Create an allocator whose blocks hold `block_capacity` elements
    /// (at least one).
    #[must_use]
    pub fn new(block_capacity: usize) -> Self {
        Self {
            blocks: Vec::new(),
            block_capacity: block_capacity.max(1),
            free_head: None,
            next_unused: 0,
            len: 0,
        }
    }

    fn locate(&self, slot: u32) -> (usize, usize) {
        let slot = slot as usize;
        (slot / self.block_capacity, slot % self.block_capacity)
    }

    fn slot(&self, id: BlockId) -> Option<&Slot<T>> {
        let (block, offset) = self.locate(id.0);
        self.blocks.get(block).map(|b| &b[offset])
    }

    fn slot_mut(&mut self, id: BlockId) -> Option<&mut Slot<T>> {
        let (block, offset) = self.locate(id.0);
        self.blocks.get_mut(block).map(|b| &mut b[offset])
    }

    /// Store `value` and return its handle.
    pub fn alloc(&mut self, value: T) -> BlockId {
        self.len += 1;

        if let Some(head) = self.free_head {
            let id = BlockId(head);
            if let Some(slot) = self.slot_mut(id)
                && let Slot::Vacant { next } = *slot
            {
                *slot = Slot::Occupied(value);
                self.free_head = next;
                return id;
            }
        }

        let id = BlockId(self.next_unused);
        self.next_unused += 1;
        let (block, offset) = self.locate(id.0);
        if block == self.blocks.len() {
            let fresh: Vec<Slot<T>> = (0..self.block_capacity)
                .map(|_| Slot::Vacant { next: None })
                .collect();
            self.blocks.push(fresh.into_boxed_slice());
        }
        self.blocks[block][offset] = Slot::Occupied(value);
        id
    }

    /// Release the element behind `id`, returning it. Freeing a vacant slot
    /// returns `None` and changes nothing.
    pub fn free(&mut self, id: BlockId) -> Option<T> {
        let free_head = self.free_head;
        let slot = self.slot_mut(id)?;
        if matches!(slot, Slot::Vacant { .. }) {
            return None;
        }
        let Slot::Occupied(value) = std::mem::replace(slot, Slot::Vacant { next: free_head }) else {
            return None;
        };
        self.free_head = Some(id.0);
        self.len -= 1;
        Some(value)
    }

    #[must_use]
    pub fn get(&self, id: BlockId) -> Option<&T> {
        match self.slot(id)? {
            Slot::Occupied(value) => Some(value),
            Slot::Vacant { .. } => None,
        }
    }

    pub fn get_mut(&mut self, id: BlockId) -> Option<&mut T> {
        match self.slot_mut(id)? {
            Slot::Occupied(value) => Some(value),
            Slot::Vacant { .. } => None,
        }
    }

    /// Number of live elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Drop every element and release all blocks.
    pub fn clear(&mut self) {
        self.blocks.clear();
        self.free_head = None;
        self.next_unused = 0;
        self.len = 0;
    }
}

impl<T> fmt::Debug for BlockAllocator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockAllocator")
            .field("len", &self.len)
            .field("blocks", &self.blocks.len())
            .field("block_capacity", &self.block_capacity)
            .finish()
    }
}
