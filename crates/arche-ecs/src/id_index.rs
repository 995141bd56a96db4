//! Id index: for every id in use, the set of tables containing it.
//!
//! Besides exact ids, every pair `(R, T)` in a table is also registered under
//! the wildcard records `(R, *)`, `(*, T)` and `(*, *)`, so wildcard query
//! terms resolve through the index instead of scanning all tables.
//!
//! Per-table records are block-allocated; each id record keeps a position map
//! so lookups and removals are O(1).

use std::fmt;

use crate::{
    HashMap,
    block::{BlockAllocator, BlockId},
    component::{ComponentRegistry, TypeInfo},
    entity::Entity,
    id::Id,
    table::{Table, TableId},
};

/// Where an id (or pattern) appears in one table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TableRecord {
    pub table: TableId,
    /// Type index of the first matching id.
    pub index: u16,
    /// Number of ids in the type matching the record's id.
    pub count: u16,
    /// Column of the first matching id, if it carries data.
    pub column: Option<u16>,
}

pub struct IdRecord {
    id: Id,
    type_info: Option<TypeInfo>,
    tables: Vec<BlockId>,
    positions: HashMap<TableId, u32>,
}

impl IdRecord {
    fn new(id: Id, type_info: Option<TypeInfo>) -> Self {
        Self {
            id,
            type_info,
            tables: Vec::new(),
            positions: HashMap::default(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> Id {
        self.id
    }

    /// Type info of the data stored for this id, `None` for tags and
    /// wildcards.
    #[must_use]
    pub const fn type_info(&self) -> Option<&TypeInfo> {
        self.type_info.as_ref()
    }

    #[must_use]
    pub fn table_count(&self) -> usize {
        self.tables.len()
    }
}

impl fmt::Debug for IdRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdRecord")
            .field("id", &self.id)
            .field("tables", &self.tables.len())
            .finish()
    }
}

pub struct IdIndex {
    records: HashMap<Id, IdRecord>,
    table_records: BlockAllocator<TableRecord>,
}

impl IdIndex {
    #[must_use]
    pub fn new(block_capacity: usize) -> Self {
        Self {
            records: HashMap::default(),
            table_records: BlockAllocator::new(block_capacity),
        }
    }

    #[must_use]
    pub fn get(&self, id: Id) -> Option<&IdRecord> {
        self.records.get(&id)
    }

    /// Number of ids (including wildcard patterns) with a record.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of tables containing `pattern`.
    #[must_use]
    pub fn table_count(&self, pattern: Id) -> usize {
        self.records.get(&pattern).map_or(0, IdRecord::table_count)
    }

    /// Tables containing `pattern`, with their per-table records.
    pub fn tables_for(&self, pattern: Id) -> impl Iterator<Item = &TableRecord> + '_ {
        self.records
            .get(&pattern)
            .into_iter()
            .flat_map(|record| record.tables.iter())
            .filter_map(|block| self.table_records.get(*block))
    }

    /// Record of `pattern` in `table`, in O(1).
    #[must_use]
    pub fn table_record(&self, pattern: Id, table: TableId) -> Option<&TableRecord> {
        let record = self.records.get(&pattern)?;
        let pos = *record.positions.get(&table)?;
        self.table_records.get(record.tables[pos as usize])
    }

    /// Patterns a table is registered under, with the first matching type
    /// index and match count for each.
    fn patterns(table: &Table) -> Vec<(Id, usize, usize)> {
        let mut patterns: Vec<(Id, usize, usize)> = Vec::with_capacity(table.ty().len() * 2);
        let mut add = |pattern: Id, index: usize| {
            if let Some(entry) = patterns.iter_mut().find(|(p, ..)| *p == pattern) {
                entry.2 += 1;
            } else {
                patterns.push((pattern, index, 1));
            }
        };

        for (index, id) in table.ty().iter().enumerate() {
            add(id, index);
            if id.is_pair() && !id.has_marker_flags() {
                add(Id::pair_from_indices(id.first(), Entity::WILDCARD.index()), index);
                add(Id::pair_from_indices(Entity::WILDCARD.index(), id.second()), index);
                add(Id::ANY_PAIR, index);
            }
        }
        patterns
    }

    /// Register a newly created table under every id and pattern of its type.
    pub fn register_table(&mut self, table: &Table, components: &ComponentRegistry) {
        for (pattern, index, count) in Self::patterns(table) {
            let column = table.column_of_type_index(index).map(|c| c as u16);
            let block = self.table_records.alloc(TableRecord {
                table: table.id(),
                index: index as u16,
                count: count as u16,
                column: if pattern.is_wildcard() { None } else { column },
            });

            let record = self.records.entry(pattern).or_insert_with(|| {
                let info = components
                    .type_info(pattern)
                    .filter(|info| info.has_data())
                    .copied();
                IdRecord::new(pattern, info)
            });
            record.positions.insert(table.id(), record.tables.len() as u32);
            record.tables.push(block);
        }
    }

    /// Remove a table from every record it was registered in. Records left
    /// without tables are dropped.
    pub fn unregister_table(&mut self, table: &Table) {
        for (pattern, ..) in Self::patterns(table) {
            let Some(record) = self.records.get_mut(&pattern) else {
                continue;
            };
            let Some(pos) = record.positions.remove(&table.id()) else {
                continue;
            };
            let block = record.tables.swap_remove(pos as usize);
            if let Some(moved) = record.tables.get(pos as usize)
                && let Some(moved) = self.table_records.get(*moved)
            {
                record.positions.insert(moved.table, pos);
            }
            self.table_records.free(block);
            if record.tables.is_empty() {
                self.records.remove(&pattern);
            }
        }
    }
}

impl fmt::Debug for IdIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdIndex")
            .field("records", &self.records.len())
            .field("table_records", &self.table_records.len())
            .finish()
    }
}
