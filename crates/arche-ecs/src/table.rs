//! Tables: column storage for all entities sharing one exact [`Type`].
//!
//! A table owns one [`Column`] per id that carries data, the dense entity
//! list, per-row enable bits for toggled components and the change counters
//! used by query change detection:
//! - `dirty[0]` counts structural changes (rows added or removed),
//! - `dirty[1 + c]` counts writes to column `c`.

use std::{fmt, ptr::NonNull};

use bitflags::bitflags;
use smallvec::SmallVec;

use crate::{
    bitset::Bitset,
    component::ComponentRegistry,
    entity::Entity,
    id::{Id, IdFlags, Type},
    storage::Column,
};

/// Unique identifier for a table. Ids are never reused within a world.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableId(u32);

impl TableId {
    /// The root table (empty type).
    pub const ROOT: Self = Self(0);

    #[must_use]
    pub const fn from_raw(id: u32) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn as_raw(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TableId({})", self.0)
    }
}

bitflags! {
    /// Properties of a table derived from its type.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct TableFlags: u32 {
        const HAS_PAIRS = 1 << 0;
        const HAS_IS_A = 1 << 1;
        const IS_PREFAB = 1 << 2;
        const HAS_TOGGLE = 1 << 3;
    }
}

/// Enable bits for one toggled component.
struct Toggle {
    component: Id,
    bits: Bitset,
}

pub struct Table {
    id: TableId,
    ty: Type,
    columns: Vec<Column>,
    /// Column of each type index, `None` for tags.
    column_map: SmallVec<[Option<u16>; 8]>,
    entities: Vec<Entity>,
    dirty: Vec<u64>,
    toggles: Vec<Toggle>,
    flags: TableFlags,
}

impl Table {
    /// Create an empty table for `ty`, allocating a column for every id the
    /// registry says carries data.
    #[must_use]
    pub fn new(id: TableId, ty: Type, components: &ComponentRegistry) -> Self {
        let mut columns = Vec::new();
        let mut column_map = SmallVec::with_capacity(ty.len());
        let mut toggles = Vec::new();
        let mut flags = TableFlags::empty();

        for id in ty.iter() {
            if id.flags().contains(IdFlags::TOGGLE) {
                toggles.push(Toggle {
                    component: id.strip_flags(),
                    bits: Bitset::new(),
                });
                flags |= TableFlags::HAS_TOGGLE;
            }
            if id.is_pair() {
                flags |= TableFlags::HAS_PAIRS;
                if id.first() == Entity::IS_A.index() {
                    flags |= TableFlags::HAS_IS_A;
                }
            }
            if id == Id::PREFAB {
                flags |= TableFlags::IS_PREFAB;
            }

            match components.type_info(id).filter(|info| info.has_data()) {
                Some(info) => {
                    column_map.push(Some(columns.len() as u16));
                    columns.push(Column::new(*info));
                }
                None => column_map.push(None),
            }
        }

        let dirty = vec![0; columns.len() + 1];
        Self {
            id,
            ty,
            columns,
            column_map,
            entities: Vec::new(),
            dirty,
            toggles,
            flags,
        }
    }

    #[must_use]
    pub const fn id(&self) -> TableId {
        self.id
    }

    /// The sorted id list of this table.
    #[must_use]
    pub const fn ty(&self) -> &Type {
        &self.ty
    }

    #[must_use]
    pub const fn flags(&self) -> TableFlags {
        self.flags
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    #[must_use]
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// Column index of the data for the id at type index `type_index`.
    #[must_use]
    pub fn column_of_type_index(&self, type_index: usize) -> Option<usize> {
        self.column_map.get(type_index).copied().flatten().map(usize::from)
    }

    /// Column index of the data for `id`.
    #[must_use]
    pub fn column_index(&self, id: Id) -> Option<usize> {
        self.column_of_type_index(self.ty.index_of(id)?)
    }

    #[must_use]
    pub fn column(&self, index: usize) -> Option<&Column> {
        self.columns.get(index)
    }

    #[must_use]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Start of the column storing `id` and its element size. `None` when the
    /// table has no data for `id`.
    #[must_use]
    pub fn get_column(&self, id: Id) -> Option<(NonNull<u8>, usize)> {
        let column = &self.columns[self.column_index(id)?];
        let ptr = NonNull::new(column.as_ptr())?;
        Some((ptr, column.info().size()))
    }

    /// Pointer to the value of column `column` at `row`.
    #[must_use]
    pub fn ptr(&self, column: usize, row: usize) -> Option<NonNull<u8>> {
        self.columns.get(column)?.ptr_at(row)
    }

    /// Append a row for `entity`, constructing every column. Returns the row.
    pub fn append(&mut self, entity: Entity) -> usize {
        let row = self.entities.len();
        self.entities.push(entity);
        for column in &mut self.columns {
            column.push_default();
        }
        for toggle in &mut self.toggles {
            toggle.bits.push(true);
        }
        self.dirty[0] += 1;
        row
    }

    /// Destroy `row`, swapping the last row into its place. Returns the
    /// entity that now occupies `row`, or `None` if `row` was the last one.
    pub fn delete(&mut self, row: usize) -> Option<Entity> {
        if row >= self.entities.len() {
            return None;
        }
        for column in &mut self.columns {
            // SAFETY: row is in bounds, every column has one element per entity.
            unsafe { column.swap_remove_drop(row) };
        }
        for toggle in &mut self.toggles {
            toggle.bits.swap_remove(row);
        }
        self.entities.swap_remove(row);
        self.dirty[0] += 1;
        self.entities.get(row).copied()
    }

    /// Move `row` of `src` into `dst`.
    ///
    /// Shared columns are moved, columns only in `src` are destroyed and
    /// columns only in `dst` are constructed, except the column for
    /// `uninit`, which is left for the caller to write. Returns the new row
    /// in `dst` and the entity swapped into `row` of `src`.
    pub(crate) fn move_row(
        src: &mut Table,
        row: usize,
        dst: &mut Table,
        uninit: Option<Id>,
    ) -> (usize, Option<Entity>) {
        let entity = src.entities[row];
        let dst_row = dst.entities.len();
        dst.entities.push(entity);

        for (type_index, id) in dst.ty.iter().enumerate() {
            let Some(dc) = dst.column_of_type_index(type_index) else {
                continue;
            };
            let dst_column = &mut dst.columns[dc];
            match src.column_index(id) {
                // SAFETY: row is in bounds of the source column; its slot is
                // released by `swap_remove_forget` below.
                Some(sc) => unsafe { dst_column.push_move(src.columns[sc].get_unchecked_raw(row)) },
                None if uninit == Some(id) => {
                    dst_column.push_uninit();
                }
                None => dst_column.push_default(),
            }
        }

        for (type_index, id) in src.ty.iter().enumerate() {
            let Some(sc) = src.column_of_type_index(type_index) else {
                continue;
            };
            let moved = dst.column_index(id).is_some();
            let column = &mut src.columns[sc];
            // SAFETY: row is in bounds; moved values are forgotten, the rest dropped.
            unsafe {
                if moved {
                    column.swap_remove_forget(row);
                } else {
                    column.swap_remove_drop(row);
                }
            }
        }

        for toggle in &mut dst.toggles {
            let enabled = src
                .toggles
                .iter()
                .find(|t| t.component == toggle.component)
                .is_none_or(|t| t.bits.get(row));
            toggle.bits.push(enabled);
        }
        for toggle in &mut src.toggles {
            toggle.bits.swap_remove(row);
        }

        src.entities.swap_remove(row);
        src.dirty[0] += 1;
        dst.dirty[0] += 1;
        (dst_row, src.entities.get(row).copied())
    }

    /// All change counters: structural first, then one per column.
    #[must_use]
    pub fn dirty_state(&self) -> &[u64] {
        &self.dirty
    }

    #[must_use]
    pub fn structure_version(&self) -> u64 {
        self.dirty[0]
    }

    #[must_use]
    pub fn column_version(&self, column: usize) -> u64 {
        self.dirty.get(column + 1).copied().unwrap_or(0)
    }

    /// Record a write to column `column`.
    pub fn mark_column_dirty(&mut self, column: usize) {
        if let Some(counter) = self.dirty.get_mut(column + 1) {
            *counter += 1;
        }
    }

    pub(crate) fn mark_structure_dirty(&mut self) {
        self.dirty[0] += 1;
    }

    /// Index of the enable bits kept for `component`.
    #[must_use]
    pub fn toggle_index(&self, component: Id) -> Option<usize> {
        self.toggles.iter().position(|t| t.component == component)
    }

    /// Whether `component` is enabled for `row`. Components without enable
    /// bits are always enabled.
    #[must_use]
    pub fn is_enabled(&self, row: usize, component: Id) -> bool {
        self.toggle_index(component)
            .is_none_or(|t| self.toggles[t].bits.get(row))
    }

    /// Set the enable bit of `component` for `row`. Returns `false` when the
    /// table keeps no bits for `component`.
    pub fn set_enabled(&mut self, row: usize, component: Id, enabled: bool) -> bool {
        let Some(t) = self.toggle_index(component) else {
            return false;
        };
        self.toggles[t].bits.set(row, enabled);
        true
    }

    /// First row `>= from` where all the given toggles are enabled, and the
    /// length of the run of such rows starting there.
    #[must_use]
    pub fn enabled_run(&self, from: usize, toggles: &[usize]) -> Option<(usize, usize)> {
        let all_enabled = |row: usize| toggles.iter().all(|&t| self.toggles[t].bits.get(row));
        let start = (from..self.len()).find(|&row| all_enabled(row))?;
        let end = (start..self.len())
            .find(|&row| !all_enabled(row))
            .unwrap_or(self.len());
        Some((start, end - start))
    }
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("id", &self.id)
            .field("type", &self.ty)
            .field("entities", &self.entities.len())
            .field("flags", &self.flags)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        component::{ComponentDesc, TypeInfo},
        entity::Generation,
    };

    #[derive(Debug, Clone, Copy, PartialEq, Default)]
    struct Position {
        x: f32,
        y: f32,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Default)]
    struct Velocity {
        x: f32,
        y: f32,
    }

    fn entity(index: u32) -> Entity {
        Entity::new(index, Generation::new())
    }

    struct Fixture {
        registry: ComponentRegistry,
        pos: Id,
        vel: Id,
        tag: Id,
    }

    fn fixture() -> Fixture {
        let mut registry = ComponentRegistry::new();
        let pos = Id::from(entity(100));
        let vel = Id::from(entity(101));
        let tag = Id::from(entity(102));
        registry.insert(pos, TypeInfo::of::<Position>());
        registry.insert(vel, TypeInfo::of::<Velocity>());
        registry.insert(tag, TypeInfo::from(ComponentDesc::tag("Tag")));
        Fixture {
            registry,
            pos,
            vel,
            tag,
        }
    }

    fn write<T: Copy>(table: &Table, id: Id, row: usize, value: T) {
        let column = table.column_index(id).unwrap();
        unsafe { table.ptr(column, row).unwrap().cast::<T>().write(value) };
    }

    fn read<T: Copy>(table: &Table, id: Id, row: usize) -> T {
        let column = table.column_index(id).unwrap();
        unsafe { table.ptr(column, row).unwrap().cast::<T>().read() }
    }

    #[test]
    fn test_table_columns_skip_tags() {
        let f = fixture();
        let ty: Type = [f.pos, f.tag, f.vel].into_iter().collect();
        let table = Table::new(TableId::from_raw(1), ty, &f.registry);

        assert_eq!(table.column_count(), 2);
        assert!(table.column_index(f.pos).is_some());
        assert!(table.column_index(f.tag).is_none());
        assert!(table.get_column(f.tag).is_none());
        assert_eq!(table.get_column(f.pos).unwrap().1, std::mem::size_of::<Position>());
        assert_eq!(table.dirty_state().len(), 3);
    }

    #[test]
    fn test_append_and_delete() {
        let f = fixture();
        let ty: Type = [f.pos].into_iter().collect();
        let mut table = Table::new(TableId::from_raw(1), ty, &f.registry);

        for i in 0..3 {
            let row = table.append(entity(i + 10));
            write(&table, f.pos, row, Position { x: i as f32, y: 0.0 });
        }
        assert_eq!(table.len(), 3);
        assert_eq!(read::<Position>(&table, f.pos, 0), Position::default());

        let moved = table.delete(0);
        assert_eq!(moved, Some(entity(12)));
        assert_eq!(read::<Position>(&table, f.pos, 0).x, 2.0);

        assert_eq!(table.delete(1), None);
        assert_eq!(table.entities(), &[entity(12)]);
        assert_eq!(table.structure_version(), 5);
    }

    #[test]
    fn test_move_row_between_tables() {
        let f = fixture();
        let mut src = Table::new(
            TableId::from_raw(1),
            [f.pos].into_iter().collect(),
            &f.registry,
        );
        let mut dst = Table::new(
            TableId::from_raw(2),
            [f.pos, f.vel].into_iter().collect(),
            &f.registry,
        );

        src.append(entity(1));
        src.append(entity(2));
        write(&src, f.pos, 0, Position { x: 5.0, y: 6.0 });
        write(&src, f.pos, 1, Position { x: 7.0, y: 8.0 });

        let (row, moved) = Table::move_row(&mut src, 0, &mut dst, None);
        assert_eq!(row, 0);
        assert_eq!(moved, Some(entity(2)));
        assert_eq!(read::<Position>(&dst, f.pos, 0), Position { x: 5.0, y: 6.0 });
        assert_eq!(read::<Velocity>(&dst, f.vel, 0), Velocity::default());
        assert_eq!(read::<Position>(&src, f.pos, 0), Position { x: 7.0, y: 8.0 });

        let (back, moved) = Table::move_row(&mut dst, 0, &mut src, None);
        assert_eq!(back, 1);
        assert_eq!(moved, None);
        assert!(dst.is_empty());
        assert_eq!(read::<Position>(&src, f.pos, 1), Position { x: 5.0, y: 6.0 });
    }

    #[test]
    fn test_column_dirty_counters() {
        let f = fixture();
        let mut table = Table::new(
            TableId::from_raw(1),
            [f.pos, f.vel].into_iter().collect(),
            &f.registry,
        );
        table.append(entity(1));
        let vel = table.column_index(f.vel).unwrap();
        table.mark_column_dirty(vel);
        table.mark_column_dirty(vel);
        assert_eq!(table.column_version(vel), 2);
        assert_eq!(table.column_version(table.column_index(f.pos).unwrap()), 0);
        assert_eq!(table.structure_version(), 1);
    }

    #[test]
    fn test_toggle_runs() {
        let f = fixture();
        let toggled = f.pos.with_flags(IdFlags::TOGGLE);
        let mut table = Table::new(
            TableId::from_raw(1),
            [f.pos, toggled].into_iter().collect(),
            &f.registry,
        );
        assert!(table.flags().contains(TableFlags::HAS_TOGGLE));

        for i in 0..5 {
            table.append(entity(i + 1));
        }
        table.set_enabled(1, f.pos, false);
        table.set_enabled(2, f.pos, false);
        assert!(!table.is_enabled(1, f.pos));
        assert!(table.is_enabled(1, f.vel));

        let t = table.toggle_index(f.pos).unwrap();
        assert_eq!(table.enabled_run(0, &[t]), Some((0, 1)));
        assert_eq!(table.enabled_run(1, &[t]), Some((3, 2)));
        assert_eq!(table.enabled_run(5, &[t]), None);

        // Swap-remove keeps the bits aligned with rows.
        table.delete(0);
        assert!(table.is_enabled(0, f.pos));
        assert!(!table.is_enabled(1, f.pos));
    }

    #[test]
    fn test_table_flags() {
        let f = fixture();
        let base = entity(50);
        let ty: Type = [Id::PREFAB, Id::pair(Entity::IS_A, base)].into_iter().collect();
        let table = Table::new(TableId::from_raw(3), ty, &f.registry);
        assert!(table.flags().contains(TableFlags::IS_PREFAB));
        assert!(table.flags().contains(TableFlags::HAS_IS_A | TableFlags::HAS_PAIRS));
        assert_eq!(table.column_count(), 0);
    }
}
