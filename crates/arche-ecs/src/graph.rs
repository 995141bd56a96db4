//! Table graph: every table plus cached single-id transitions between them.
//!
//! Adding id `i` to a table of type `T` leads to the table of type `T ∪ {i}`.
//! The first lookup computes that type and finds or creates its table, then
//! caches the edge in both directions: `T --add i--> U` and `U --remove i--> T`.
//! Edges for small plain ids live in a direct array; all other ids go through
//! a hash map. Edge records are block-allocated.

use std::fmt;

use tracing::{debug, trace};

use crate::{
    HashMap,
    block::{BlockAllocator, BlockId},
    component::ComponentRegistry,
    id::{Id, Type},
    id_index::IdIndex,
    table::{Table, TableId},
};

/// Direction of a graph edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EdgeKind {
    Add,
    Remove,
}

impl EdgeKind {
    const fn opposite(self) -> Self {
        match self {
            Self::Add => Self::Remove,
            Self::Remove => Self::Add,
        }
    }
}

/// A cached transition `from --id--> to`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GraphEdge {
    pub from: TableId,
    pub to: TableId,
    pub id: Id,
}

#[derive(Default)]
struct Edges {
    lo: Vec<Option<BlockId>>,
    hi: HashMap<Id, BlockId>,
}

impl Edges {
    fn blocks(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.lo.iter().flatten().copied().chain(self.hi.values().copied())
    }
}

#[derive(Default)]
struct Node {
    add: Edges,
    remove: Edges,
}

impl Node {
    fn edges(&self, kind: EdgeKind) -> &Edges {
        match kind {
            EdgeKind::Add => &self.add,
            EdgeKind::Remove => &self.remove,
        }
    }

    fn edges_mut(&mut self, kind: EdgeKind) -> &mut Edges {
        match kind {
            EdgeKind::Add => &mut self.add,
            EdgeKind::Remove => &mut self.remove,
        }
    }
}

pub struct TableGraph {
    /// Tables indexed by id. Deleted tables leave a `None`; ids are not reused.
    tables: Vec<Option<Table>>,
    nodes: Vec<Node>,
    type_map: HashMap<Type, TableId>,
    edges: BlockAllocator<GraphEdge>,
    lo_edge_ids: u32,
    live: usize,
}

impl TableGraph {
    /// Create the graph with its root table (empty type).
    #[must_use]
    pub fn new(lo_edge_ids: u32, block_capacity: usize, components: &ComponentRegistry) -> Self {
        let root = Table::new(TableId::ROOT, Type::new(), components);
        let mut type_map = HashMap::default();
        type_map.insert(Type::new(), TableId::ROOT);
        Self {
            tables: vec![Some(root)],
            nodes: vec![Node::default()],
            type_map,
            edges: BlockAllocator::new(block_capacity),
            lo_edge_ids,
            live: 1,
        }
    }

    #[must_use]
    pub fn get(&self, id: TableId) -> Option<&Table> {
        self.tables.get(id.as_raw() as usize)?.as_ref()
    }

    pub fn get_mut(&mut self, id: TableId) -> Option<&mut Table> {
        self.tables.get_mut(id.as_raw() as usize)?.as_mut()
    }

    /// Borrow two distinct tables mutably.
    pub(crate) fn pair_mut(&mut self, a: TableId, b: TableId) -> Option<(&mut Table, &mut Table)> {
        let (ai, bi) = (a.as_raw() as usize, b.as_raw() as usize);
        if ai == bi || ai.max(bi) >= self.tables.len() {
            return None;
        }
        if ai < bi {
            let (lo, hi) = self.tables.split_at_mut(bi);
            Some((lo[ai].as_mut()?, hi[0].as_mut()?))
        } else {
            let (lo, hi) = self.tables.split_at_mut(ai);
            Some((hi[0].as_mut()?, lo[bi].as_mut()?))
        }
    }

    /// Number of live tables, including the root.
    #[must_use]
    pub fn len(&self) -> usize {
        self.live
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &Table> {
        self.tables.iter().flatten()
    }

    /// Ids of all live tables in creation order.
    #[must_use]
    pub fn ids(&self) -> Vec<TableId> {
        self.iter().map(Table::id).collect()
    }

    #[must_use]
    pub fn find(&self, ty: &Type) -> Option<TableId> {
        self.type_map.get(ty).copied()
    }

    /// Number of cached edges, counting both directions.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn find_or_create(
        &mut self,
        ty: Type,
        ids: &mut IdIndex,
        components: &ComponentRegistry,
    ) -> TableId {
        if let Some(id) = self.find(&ty) {
            return id;
        }

        let id = TableId::from_raw(self.tables.len() as u32);
        let table = Table::new(id, ty.clone(), components);
        ids.register_table(&table, components);
        debug!(table = ?id, ty = ?table.ty(), columns = table.column_count(), "created table");

        self.tables.push(Some(table));
        self.nodes.push(Node::default());
        self.type_map.insert(ty, id);
        self.live += 1;
        id
    }

    fn is_lo(&self, id: Id) -> bool {
        id.as_entity()
            .is_some_and(|e| e.index() < self.lo_edge_ids)
    }

    fn edge_block(&self, table: TableId, id: Id, kind: EdgeKind) -> Option<BlockId> {
        let edges = self.nodes.get(table.as_raw() as usize)?.edges(kind);
        if self.is_lo(id) {
            edges.lo.get(id.index() as usize).copied().flatten()
        } else {
            edges.hi.get(&id).copied()
        }
    }

    /// Cached destination of `table --id-->` in direction `kind`.
    #[must_use]
    pub fn edge(&self, table: TableId, id: Id, kind: EdgeKind) -> Option<TableId> {
        let edge = self.edges.get(self.edge_block(table, id, kind)?)?;
        (edge.id == id).then_some(edge.to)
    }

    /// Drop the edge of `table` for `id` in direction `kind`.
    fn unlink(&mut self, table: TableId, id: Id, kind: EdgeKind) -> Option<GraphEdge> {
        let lo = self.is_lo(id);
        let edges = self.nodes.get_mut(table.as_raw() as usize)?.edges_mut(kind);
        let block = if lo {
            edges.lo.get_mut(id.index() as usize)?.take()?
        } else {
            edges.hi.remove(&id)?
        };
        self.edges.free(block)
    }

    fn link(&mut self, from: TableId, id: Id, kind: EdgeKind, to: TableId) {
        if let Some(existing) = self
            .edge_block(from, id, kind)
            .and_then(|b| self.edges.get(b))
            .copied()
        {
            self.unlink(from, existing.id, kind);
            // A low slot can still hold the edge of a deleted id with the same index.
            if existing.id != id {
                self.unlink(existing.to, existing.id, kind.opposite());
            }
        }

        let block = self.edges.alloc(GraphEdge { from, to, id });
        let lo = self.is_lo(id);
        let lo_len = self.lo_edge_ids as usize;
        let edges = self.nodes[from.as_raw() as usize].edges_mut(kind);
        if lo {
            if edges.lo.is_empty() {
                edges.lo.resize(lo_len, None);
            }
            edges.lo[id.index() as usize] = Some(block);
        } else {
            edges.hi.insert(id, block);
        }
    }

    fn transition(
        &mut self,
        from: TableId,
        id: Id,
        kind: EdgeKind,
        ids: &mut IdIndex,
        components: &ComponentRegistry,
    ) -> TableId {
        if let Some(to) = self.edge(from, id, kind) {
            return to;
        }
        let Some(table) = self.get(from) else {
            return from;
        };

        let mut ty = table.ty().clone();
        let changed = match kind {
            EdgeKind::Add => ty.insert(id),
            EdgeKind::Remove => ty.remove(id),
        };
        if !changed {
            return from;
        }

        trace!(?from, ?id, ?kind, "table edge cache miss");
        let to = self.find_or_create(ty, ids, components);
        self.link(from, id, kind, to);
        self.link(to, id, kind.opposite(), from);
        to
    }

    /// Table reached by adding `id` to `from`. Returns `from` if it already
    /// contains `id`.
    pub fn add_id(
        &mut self,
        from: TableId,
        id: Id,
        ids: &mut IdIndex,
        components: &ComponentRegistry,
    ) -> TableId {
        self.transition(from, id, EdgeKind::Add, ids, components)
    }

    /// Table reached by removing `id` from `from`. Returns `from` if it does
    /// not contain `id`.
    pub fn remove_id(
        &mut self,
        from: TableId,
        id: Id,
        ids: &mut IdIndex,
        components: &ComponentRegistry,
    ) -> TableId {
        self.transition(from, id, EdgeKind::Remove, ids, components)
    }

    /// Delete a table, unregistering it from the id index and dropping every
    /// edge from or to it. The root table cannot be deleted.
    pub fn delete_table(&mut self, id: TableId, ids: &mut IdIndex) -> Option<Table> {
        if id == TableId::ROOT {
            return None;
        }
        let table = self.tables.get_mut(id.as_raw() as usize)?.take()?;
        ids.unregister_table(&table);
        self.type_map.remove(table.ty());
        self.live -= 1;

        let node = std::mem::take(&mut self.nodes[id.as_raw() as usize]);
        for kind in [EdgeKind::Add, EdgeKind::Remove] {
            for block in node.edges(kind).blocks() {
                if let Some(edge) = self.edges.free(block) {
                    self.unlink(edge.to, edge.id, kind.opposite());
                }
            }
        }

        debug!(table = ?id, ty = ?table.ty(), "deleted table");
        Some(table)
    }

    /// Delete every empty table except the root. Returns how many were
    /// reclaimed.
    pub fn compact(&mut self, ids: &mut IdIndex) -> usize {
        let empty: Vec<TableId> = self
            .iter()
            .filter(|t| t.is_empty() && t.id() != TableId::ROOT)
            .map(Table::id)
            .collect();
        for id in &empty {
            self.delete_table(*id, ids);
        }
        if !empty.is_empty() {
            debug!(reclaimed = empty.len(), remaining = self.live, "compacted tables");
        }
        empty.len()
    }
}

impl fmt::Debug for TableGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableGraph")
            .field("tables", &self.live)
            .field("edges", &self.edges.len())
            .finish()
    }
}
