//! World construction parameters.

/// Tuning knobs for a [`World`](crate::World).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorldConfig {
    /// Entities to reserve room for up front.
    pub entity_capacity: usize,
    /// Plain ids with an entity index below this use array-backed graph
    /// edges; all other ids use hashed edges.
    pub lo_edge_ids: u32,
    /// Elements per block for edge and table records.
    pub block_capacity: usize,
    /// Maximum relationship depth followed by inheritance and `up` traversal.
    pub max_traversal_depth: u32,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            entity_capacity: 0,
            lo_edge_ids: 256,
            block_capacity: 64,
            max_traversal_depth: 32,
        }
    }
}

impl WorldConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn entity_capacity(mut self, capacity: usize) -> Self {
        self.entity_capacity = capacity;
        self
    }

    #[must_use]
    pub const fn lo_edge_ids(mut self, lo_edge_ids: u32) -> Self {
        self.lo_edge_ids = lo_edge_ids;
        self
    }

    #[must_use]
    pub const fn block_capacity(mut self, block_capacity: usize) -> Self {
        self.block_capacity = block_capacity;
        self
    }

    #[must_use]
    pub const fn max_traversal_depth(mut self, depth: u32) -> Self {
        self.max_traversal_depth = depth;
        self
    }
}
