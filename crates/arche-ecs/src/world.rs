//! World - the container for entities, components, tables and queries.
//!
//! The world ties together the entity index, the component registry, the id
//! index and the table graph. Structural operations move an entity's row
//! between tables along cached graph edges. While a query iterator is alive
//! the world is in deferred mode: structural operations are queued and
//! applied in order when the outermost iterator is dropped.

use std::{fmt, mem::ManuallyDrop, ptr::NonNull};

use smallvec::SmallVec;
use tracing::{debug, trace, warn};

use crate::{
    HashSet,
    command::{Command, CommandQueue, CommandValue},
    component::{Component, ComponentDesc, ComponentRegistry, TypeHooks, TypeInfo},
    config::WorldConfig,
    entity::{Entity, Generation},
    entity_index::{EntityIndex, EntityRecord},
    error::{EcsError, EcsResult},
    graph::{EdgeKind, TableGraph},
    id::{Id, IdFlags, Type},
    id_index::IdIndex,
    query::{Query, QueryBuilder},
    table::{Table, TableFlags, TableId},
};

/// The ECS world.
pub struct World {
    pub(crate) entities: EntityIndex,
    pub(crate) components: ComponentRegistry,
    pub(crate) ids: IdIndex,
    pub(crate) tables: TableGraph,
    commands: CommandQueue,
    defer_depth: u32,
    /// Deferred scopes held by live query iterators.
    iterating: u32,
    config: WorldConfig,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    /// Create a new world with the builtin entities in place.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(WorldConfig::default())
    }

    /// Create a world with pre-allocated room for `entity_capacity` entities.
    #[must_use]
    pub fn with_capacity(entity_capacity: usize) -> Self {
        Self::with_config(WorldConfig::default().entity_capacity(entity_capacity))
    }

    #[must_use]
    pub fn with_config(config: WorldConfig) -> Self {
        let components = ComponentRegistry::new();
        let tables = TableGraph::new(config.lo_edge_ids, config.block_capacity, &components);
        let mut world = Self {
            entities: EntityIndex::with_capacity(config.entity_capacity),
            components,
            ids: IdIndex::new(config.block_capacity),
            tables,
            commands: CommandQueue::default(),
            defer_depth: 0,
            iterating: 0,
            config,
        };

        // Wildcard, IsA, ChildOf and Prefab occupy the first indices.
        for index in 1..Entity::BUILTIN_COUNT {
            let builtin = Entity::new(index, Generation::new());
            world.entities.ensure(builtin);
            world.place(builtin);
        }
        world
    }

    #[must_use]
    pub const fn config(&self) -> &WorldConfig {
        &self.config
    }

    // ==================== Components ====================

    /// Register a component described at runtime. Returns its id.
    pub fn register_component(&mut self, desc: ComponentDesc) -> Id {
        self.register_info(TypeInfo::from(desc))
    }

    fn register_info(&mut self, info: TypeInfo) -> Id {
        let entity = self.create();
        let id = Id::from(entity);
        debug!(?id, name = info.name(), size = info.size(), "registered component");
        self.components.insert(id, info);
        id
    }

    /// Id of the component for `T`, registering it on first use.
    pub fn component<T: Component>(&mut self) -> Id {
        match self.components.id_of::<T>() {
            Some(id) => id,
            None => self.register_info(TypeInfo::of::<T>()),
        }
    }

    /// Register `T` with custom lifecycle hooks. Fails if `T` is already
    /// registered.
    pub fn component_with_hooks<T: Component>(&mut self, hooks: TypeHooks) -> EcsResult<Id> {
        if self.components.id_of::<T>().is_some() {
            return Err(EcsError::InvalidParameter("component already registered"));
        }
        Ok(self.register_info(TypeInfo::with_hooks::<T>(hooks)))
    }

    /// Id of the component for `T`, if registered.
    #[must_use]
    pub fn component_id<T: Component>(&self) -> Option<Id> {
        self.components.id_of::<T>()
    }

    /// Type info of the data stored for `id`.
    #[must_use]
    pub fn type_info(&self, id: Id) -> Option<&TypeInfo> {
        self.components.type_info(id)
    }

    // ==================== Entity Operations ====================

    /// Create an empty entity.
    ///
    /// In deferred mode the entity is alive immediately but only placed in a
    /// table when the queue is flushed.
    pub fn create(&mut self) -> Entity {
        let entity = self.entities.create();
        if self.is_deferred() {
            trace!(?entity, "deferred create");
            self.commands.push(Command::Place { entity });
        } else {
            self.place(entity);
        }
        entity
    }

    /// Create an entity with one component.
    pub fn spawn<T: Component>(&mut self, component: T) -> Entity {
        let entity = self.create();
        if let Err(err) = self.set(entity, component) {
            warn!(?entity, %err, "failed to set component on spawned entity");
        }
        entity
    }

    /// Create an instance of `base`: an entity with `(IsA, base)`.
    pub fn instantiate(&mut self, base: Entity) -> EcsResult<Entity> {
        if !self.is_alive(base) {
            return Err(EcsError::NotAlive(base));
        }
        let entity = self.create();
        if let Err(err) = self.add_pair(entity, Entity::IS_A, base) {
            self.delete(entity);
            return Err(err);
        }
        Ok(entity)
    }

    /// Delete an entity and everything referring to it.
    ///
    /// Children (`(ChildOf, entity)`) are deleted too; other pairs targeting
    /// the entity are removed from their owners. If the entity is a component
    /// it is removed from every entity that has it.
    ///
    /// Returns `true` if the entity was alive.
    pub fn delete(&mut self, entity: Entity) -> bool {
        if !self.is_alive(entity) {
            return false;
        }
        if self.is_deferred() {
            trace!(?entity, "deferred delete");
            self.commands.push(Command::Delete { entity });
            return true;
        }
        self.delete_now(entity);
        true
    }

    /// Delete `entity` and everything below it in the `ChildOf` hierarchy.
    /// Cycles are visited once.
    fn delete_now(&mut self, entity: Entity) {
        if !self.is_alive(entity) {
            return;
        }

        let mut visited = HashSet::default();
        visited.insert(entity);
        let mut order = vec![entity];
        let mut next = 0;
        while let Some(&parent) = order.get(next) {
            next += 1;
            for child in self.entities_with(Id::pair(Entity::CHILD_OF, parent)) {
                if visited.insert(child) {
                    order.push(child);
                }
            }
        }
        if order.len() > 1 {
            trace!(?entity, count = order.len() - 1, "deleting children");
        }

        for entity in order.into_iter().rev() {
            self.delete_one(entity);
        }
    }

    fn delete_one(&mut self, entity: Entity) {
        if !self.is_alive(entity) {
            return;
        }

        let id = Id::from(entity);
        self.remove_everywhere(Id::pair(Entity::WILDCARD, entity));
        self.remove_everywhere(Id::pair(entity, Entity::WILDCARD));
        self.remove_everywhere(id);
        self.remove_everywhere(id.with_flags(IdFlags::TOGGLE));
        self.remove_everywhere(id.with_flags(IdFlags::AUTO_OVERRIDE));

        if let Ok(EntityRecord {
            table: Some(table_id),
            row,
        }) = self.entities.lookup(entity)
            && let Some(table) = self.tables.get_mut(table_id)
            && let Some(moved) = table.delete(row as usize)
        {
            self.entities.set_record(
                moved,
                EntityRecord {
                    table: Some(table_id),
                    row,
                },
            );
        }

        self.entities.delete(entity);
        if self.components.remove(id).is_some() {
            debug!(?id, "deleted component");
        }
    }

    /// Entities of every table registered under `pattern`.
    fn entities_with(&self, pattern: Id) -> Vec<Entity> {
        self.ids
            .tables_for(pattern)
            .filter_map(|record| self.tables.get(record.table))
            .flat_map(|table| table.entities().iter().copied())
            .collect()
    }

    /// Remove every id matching `pattern` from every entity.
    fn remove_everywhere(&mut self, pattern: Id) {
        let tables: Vec<TableId> = self.ids.tables_for(pattern).map(|r| r.table).collect();
        for table_id in tables {
            let Some(table) = self.tables.get(table_id) else {
                continue;
            };
            if table.is_empty() {
                continue;
            }
            let ids: SmallVec<[Id; 4]> = table.ty().iter().filter(|id| id.matches(pattern)).collect();
            let entities = table.entities().to_vec();
            trace!(?pattern, table = ?table_id, count = entities.len(), "removing references");
            for entity in entities {
                for id in &ids {
                    if let Err(err) = self.remove_now(entity, *id) {
                        warn!(?entity, ?id, %err, "failed to remove reference");
                    }
                }
            }
        }
    }

    /// Remove every component and pair from an entity.
    pub fn clear(&mut self, entity: Entity) -> EcsResult<()> {
        self.entities.lookup(entity)?;
        if self.is_deferred() {
            self.commands.push(Command::Clear { entity });
            return Ok(());
        }
        self.clear_now(entity)
    }

    fn clear_now(&mut self, entity: Entity) -> EcsResult<()> {
        let (table, row) = self.locate(entity)?;
        if table != TableId::ROOT {
            self.move_entity(entity, table, row, TableId::ROOT, None);
        }
        Ok(())
    }

    #[must_use]
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.entities.is_alive(entity)
    }

    /// Number of alive entities, including builtins and components.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.entities.alive_count()
    }

    /// All alive entities.
    #[must_use]
    pub fn entities(&self) -> &[Entity] {
        self.entities.alive()
    }

    // ==================== Structural Operations ====================

    fn validate_id(id: Id) -> EcsResult<()> {
        if id.is_null() {
            return Err(EcsError::InvalidParameter("null id"));
        }
        if id.is_pair() && (id.first() == 0 || id.second() == 0) {
            return Err(EcsError::InvalidParameter("pair with a null element"));
        }
        Ok(())
    }

    /// Add an id (component, tag or pair) to an entity. Adding an id the
    /// entity already has does nothing.
    pub fn add(&mut self, entity: Entity, id: Id) -> EcsResult<()> {
        Self::validate_id(id)?;
        if id.is_wildcard() {
            return Err(EcsError::InvalidParameter("cannot add a wildcard id"));
        }
        self.entities.lookup(entity)?;
        if !self.owns(entity, id) {
            self.check_constructible(id)?;
        }
        if self.is_deferred() {
            trace!(?entity, ?id, "deferred add");
            self.commands.push(Command::Add { entity, id });
            return Ok(());
        }
        self.add_now(entity, id)
    }

    pub fn add_pair(&mut self, entity: Entity, relationship: Entity, target: Entity) -> EcsResult<()> {
        if !self.is_alive(target) {
            return Err(EcsError::NotAlive(target));
        }
        self.add(entity, Id::pair(relationship, target))
    }

    fn is_a_base(&self, id: Id) -> Option<Entity> {
        if id.is_pair() && !id.has_marker_flags() && id.first() == Entity::IS_A.index() {
            self.entities.alive_at(id.second())
        } else {
            None
        }
    }

    fn add_now(&mut self, entity: Entity, id: Id) -> EcsResult<()> {
        let overrides = match self.is_a_base(id) {
            Some(base) if base == entity => {
                return Err(EcsError::InvalidParameter("entity cannot inherit from itself"));
            }
            Some(base) => self.auto_overrides(entity, base)?,
            None => SmallVec::new(),
        };

        let (from, row) = self.locate(entity)?;
        let to = self.tables.add_id(from, id, &mut self.ids, &self.components);
        if to != from {
            self.check_constructible(id)?;
            self.move_entity(entity, from, row, to, None);
        }

        if let Some(base) = self.is_a_base(id) {
            for component in overrides {
                self.copy_from_base(entity, base, component)?;
            }
        }
        Ok(())
    }

    /// Fail unless a value for `id` can be created without one being given.
    fn check_constructible(&self, id: Id) -> EcsResult<()> {
        match self.components.type_info(id) {
            Some(info) if info.has_data() && !info.can_default() => {
                Err(EcsError::MissingHook { id, hook: "ctor" })
            }
            _ => Ok(()),
        }
    }

    /// Components `entity` must copy from `base` when inheriting from it.
    fn auto_overrides(&self, entity: Entity, base: Entity) -> EcsResult<SmallVec<[Id; 4]>> {
        let Some(table) = self.table_of(base).and_then(|t| self.tables.get(t)) else {
            return Ok(SmallVec::new());
        };
        let mut overrides = SmallVec::new();
        for id in table.ty().iter() {
            if !id.flags().contains(IdFlags::AUTO_OVERRIDE) {
                continue;
            }
            let component = id.strip_flags();
            let Some(info) = self.components.type_info(component) else {
                continue;
            };
            if !info.has_data() || self.owns(entity, component) || self.get_id(base, component).is_none() {
                continue;
            }
            if info.hooks().copy.is_none() {
                return Err(EcsError::MissingHook {
                    id: component,
                    hook: "copy",
                });
            }
            overrides.push(component);
        }
        Ok(overrides)
    }

    fn copy_from_base(&mut self, entity: Entity, base: Entity, component: Id) -> EcsResult<()> {
        let info = *self
            .components
            .type_info(component)
            .ok_or(EcsError::InvalidParameter("id carries no data"))?;
        let copy = info.hooks().copy.ok_or(EcsError::MissingHook {
            id: component,
            hook: "copy",
        })?;
        let src = self
            .get_id(base, component)
            .ok_or(EcsError::InvalidParameter("base has no value to copy"))?;

        // SAFETY: `src` points to an initialized value of `component`, and
        // the copy is taken before any table moves.
        let value = unsafe { CommandValue::copied(info, copy, src.as_ptr()) };
        // SAFETY: `value` holds an initialized value built from this info.
        unsafe { self.set_raw(entity, component, value.as_ptr()) }?;
        value.consume();
        Ok(())
    }

    /// Remove an id from an entity. A wildcard removes every matching id.
    /// Removing an id the entity does not have does nothing.
    pub fn remove(&mut self, entity: Entity, id: Id) -> EcsResult<()> {
        Self::validate_id(id)?;
        self.entities.lookup(entity)?;
        if self.is_deferred() {
            trace!(?entity, ?id, "deferred remove");
            self.commands.push(Command::Remove { entity, id });
            return Ok(());
        }
        self.remove_now(entity, id)
    }

    pub fn remove_pair(&mut self, entity: Entity, relationship: Entity, target: Entity) -> EcsResult<()> {
        self.remove(entity, Id::pair(relationship, target))
    }

    /// Remove the component `T`.
    pub fn remove_component<T: Component>(&mut self, entity: Entity) -> EcsResult<()> {
        match self.component_id::<T>() {
            Some(id) => self.remove(entity, id),
            None => Err(EcsError::UnregisteredType(std::any::type_name::<T>())),
        }
    }

    fn remove_now(&mut self, entity: Entity, id: Id) -> EcsResult<()> {
        let (from, row) = self.locate(entity)?;
        if id.is_wildcard() {
            let matching: SmallVec<[Id; 4]> = self
                .tables
                .get(from)
                .map(|t| t.ty().iter().filter(|i| i.matches(id)).collect())
                .unwrap_or_default();
            for id in matching {
                self.remove_now(entity, id)?;
            }
            return Ok(());
        }

        let to = self.tables.remove_id(from, id, &mut self.ids, &self.components);
        if to != from {
            self.move_entity(entity, from, row, to, None);
        }
        Ok(())
    }

    /// Set the value of component `T`, adding it if missing.
    ///
    /// Returns a reference to the stored value, or `None` when the entity
    /// lacked the component and the world is deferred: the write is then
    /// queued.
    pub fn set<T: Component>(&mut self, entity: Entity, value: T) -> EcsResult<Option<&mut T>> {
        let id = self.component::<T>();
        self.set_id(entity, id, value)
    }

    /// Set the value stored for `id`, which must carry data of type `T`
    /// (e.g. a pair whose relationship is `T`).
    pub fn set_id<T: Component>(&mut self, entity: Entity, id: Id, value: T) -> EcsResult<Option<&mut T>> {
        Self::validate_id(id)?;
        match self.components.type_info(id) {
            Some(info) => info.expect_type::<T>(id)?,
            None if size_of::<T>() == 0 => {}
            None => return Err(EcsError::InvalidParameter("id carries no data")),
        }

        if size_of::<T>() == 0 {
            self.add(entity, id)?;
            if self.is_deferred() && !self.owns(entity, id) {
                return Ok(None);
            }
            // SAFETY: a dangling pointer is a valid reference to a zero-sized value.
            return Ok(Some(unsafe { &mut *NonNull::<T>::dangling().as_ptr() }));
        }

        let mut value = ManuallyDrop::new(value);
        // SAFETY: `value` is an initialized `T`, which the type check above
        // matched with the type info of `id`.
        match unsafe { self.set_raw(entity, id, (&raw mut *value).cast()) } {
            // SAFETY: the pointer addresses the stored `T`.
            Ok(ptr) => Ok(ptr.map(|ptr| unsafe { &mut *ptr.as_ptr().cast::<T>() })),
            Err(err) => {
                // SAFETY: not consumed on error.
                unsafe { ManuallyDrop::drop(&mut value) };
                Err(err)
            }
        }
    }

    /// Set the value stored for `id` from raw bytes. Only components without
    /// destructor or move hook can be set this way.
    pub fn set_bytes(&mut self, entity: Entity, id: Id, bytes: &[u8]) -> EcsResult<Option<NonNull<u8>>> {
        Self::validate_id(id)?;
        let info = *self
            .components
            .type_info(id)
            .filter(|info| info.has_data())
            .ok_or(EcsError::InvalidParameter("id carries no data"))?;
        if bytes.len() != info.size() {
            return Err(EcsError::InvalidParameter("byte length does not match component size"));
        }
        if info.hooks().dtor.is_some() || info.hooks().move_fn.is_some() {
            return Err(EcsError::InvalidParameter("component is not plain data"));
        }

        let value = CommandValue::from_bytes(info, bytes);
        // SAFETY: `value` holds an initialized value described by `info`.
        let result = unsafe { self.set_raw(entity, id, value.as_ptr()) };
        if result.is_ok() {
            value.consume();
        }
        result
    }

    /// Move the value at `src` into the storage of `id`.
    ///
    /// # Safety
    ///
    /// `src` must hold an initialized value described by the type info of
    /// `id`. It is consumed only when `Ok` is returned.
    unsafe fn set_raw(&mut self, entity: Entity, id: Id, src: *mut u8) -> EcsResult<Option<NonNull<u8>>> {
        self.entities.lookup(entity)?;
        let info = *self
            .components
            .type_info(id)
            .filter(|info| info.has_data())
            .ok_or(EcsError::InvalidParameter("id carries no data"))?;

        if let Some((table, column, row)) = self.owned_column(entity, id) {
            let table = self
                .tables
                .get_mut(table)
                .ok_or(EcsError::InvalidParameter("missing table"))?;
            let dst = table
                .ptr(column, row)
                .ok_or(EcsError::InvalidParameter("missing column"))?;
            // SAFETY: `dst` holds the current value, replaced by `src`.
            unsafe {
                if let Some(dtor) = info.hooks().dtor {
                    dtor(dst.as_ptr(), 1);
                }
                move_into(&info, dst.as_ptr(), src);
            }
            table.mark_column_dirty(column);
            return Ok(Some(dst));
        }

        if self.is_deferred() {
            trace!(?entity, ?id, "deferred set");
            // SAFETY: forwarded from caller.
            let value = unsafe { CommandValue::take(info, src) };
            self.commands.push(Command::Set { entity, id, value });
            return Ok(None);
        }

        let (table, column, row) = self.insert_uninit(entity, id)?;
        let table = self
            .tables
            .get_mut(table)
            .ok_or(EcsError::InvalidParameter("missing table"))?;
        let dst = table
            .ptr(column, row)
            .ok_or(EcsError::InvalidParameter("missing column"))?;
        // SAFETY: `dst` is the uninitialized slot created for this value.
        unsafe { move_into(&info, dst.as_ptr(), src) };
        table.mark_column_dirty(column);
        Ok(Some(dst))
    }

    /// Move `entity` into the table with `id` added, leaving the new column
    /// slot uninitialized. Returns `(table, column, row)`; the caller must
    /// initialize the slot before touching the table again.
    fn insert_uninit(&mut self, entity: Entity, id: Id) -> EcsResult<(TableId, usize, usize)> {
        let (from, row) = self.locate(entity)?;
        let to = self.tables.add_id(from, id, &mut self.ids, &self.components);
        if to == from {
            return Err(EcsError::InvalidParameter("entity already has the id"));
        }
        let column = self
            .tables
            .get(to)
            .and_then(|t| t.column_index(id))
            .ok_or(EcsError::InvalidParameter("id carries no data"))?;
        let row = self.move_entity(entity, from, row, to, Some(id));
        Ok((to, column, row))
    }

    /// Table, column and row of the value `entity` owns for `id`.
    fn owned_column(&self, entity: Entity, id: Id) -> Option<(TableId, usize, usize)> {
        let record = self.entities.lookup(entity).ok()?;
        let table_id = record.table?;
        let column = self.tables.get(table_id)?.column_index(id)?;
        Some((table_id, column, record.row as usize))
    }

    /// Value of component `T`, owned or inherited through `IsA`.
    #[must_use]
    pub fn get<T: Component>(&self, entity: Entity) -> Option<&T> {
        let id = self.component_id::<T>()?;
        self.get_by_id(entity, id).ok().flatten()
    }

    /// Value stored for `id`, read as `T`. Fails with
    /// [`EcsError::TypeMismatch`] when `id` stores another type.
    pub fn get_by_id<T: Component>(&self, entity: Entity, id: Id) -> EcsResult<Option<&T>> {
        self.entities.lookup(entity)?;
        let Some(info) = self.components.type_info(id) else {
            return Ok(None);
        };
        info.expect_type::<T>(id)?;
        if !info.has_data() {
            // SAFETY: a dangling pointer is a valid reference to a zero-sized value.
            return Ok(self
                .has(entity, id)
                .then(|| unsafe { &*NonNull::<T>::dangling().as_ptr() }));
        }
        // SAFETY: the type check above matched `T` with the stored data.
        Ok(self
            .get_id(entity, id)
            .map(|ptr| unsafe { &*ptr.as_ptr().cast::<T>() }))
    }

    /// Pointer to the value stored for `id`, owned or inherited through
    /// `IsA`. `None` for tags and absent ids.
    #[must_use]
    pub fn get_id(&self, entity: Entity, id: Id) -> Option<NonNull<u8>> {
        self.get_id_at_depth(entity, id, 0)
    }

    fn get_id_at_depth(&self, entity: Entity, id: Id, depth: u32) -> Option<NonNull<u8>> {
        let record = self.entities.lookup(entity).ok()?;
        let table = self.tables.get(record.table?)?;
        if let Some(column) = table.column_index(id) {
            return table.ptr(column, record.row as usize);
        }
        if depth >= self.config.max_traversal_depth || !table.flags().contains(TableFlags::HAS_IS_A) {
            return None;
        }
        self.targets(table, Entity::IS_A)
            .find_map(|base| self.get_id_at_depth(base, id, depth + 1))
    }

    /// Mutable access to the component `T` the entity owns. Inherited values
    /// are not returned. Counts as a write for change detection.
    pub fn get_mut<T: Component>(&mut self, entity: Entity) -> Option<&mut T> {
        let id = self.component_id::<T>()?;
        if !self.components.type_info(id)?.has_data() {
            return None;
        }
        let (table_id, column, row) = self.owned_column(entity, id)?;
        let table = self.tables.get_mut(table_id)?;
        table.mark_column_dirty(column);
        let ptr = table.ptr(column, row)?;
        // SAFETY: the column stores `T`, registered for this id.
        Some(unsafe { &mut *ptr.as_ptr().cast::<T>() })
    }

    /// Signal that the value stored for `id` was written through a raw
    /// pointer. Returns `false` if the entity does not own the value.
    pub fn modified(&mut self, entity: Entity, id: Id) -> bool {
        let Some((table_id, column, _)) = self.owned_column(entity, id) else {
            return false;
        };
        if let Some(table) = self.tables.get_mut(table_id) {
            table.mark_column_dirty(column);
        }
        true
    }

    /// Whether the entity has `id`, directly or through `IsA`. Accepts
    /// wildcard patterns.
    #[must_use]
    pub fn has(&self, entity: Entity, id: Id) -> bool {
        self.has_at_depth(entity, id, 0)
    }

    fn has_at_depth(&self, entity: Entity, id: Id, depth: u32) -> bool {
        let Some(table) = self.table_of(entity).and_then(|t| self.tables.get(t)) else {
            return false;
        };
        if self.match_self(table, id).is_some() {
            return true;
        }
        depth < self.config.max_traversal_depth
            && table.flags().contains(TableFlags::HAS_IS_A)
            && self
                .targets(table, Entity::IS_A)
                .any(|base| self.has_at_depth(base, id, depth + 1))
    }

    #[must_use]
    pub fn has_component<T: Component>(&self, entity: Entity) -> bool {
        self.component_id::<T>()
            .is_some_and(|id| self.has(entity, id))
    }

    #[must_use]
    pub fn has_pair(&self, entity: Entity, relationship: Entity, target: Entity) -> bool {
        self.has(entity, Id::pair(relationship, target))
    }

    /// Whether the entity itself has `id`, ignoring inheritance.
    #[must_use]
    pub fn owns(&self, entity: Entity, id: Id) -> bool {
        self.table_of(entity)
            .and_then(|t| self.tables.get(t))
            .is_some_and(|table| self.match_self(table, id).is_some())
    }

    /// The `index`-th target of `relationship` on the entity.
    #[must_use]
    pub fn target(&self, entity: Entity, relationship: Entity, index: usize) -> Option<Entity> {
        let table = self.tables.get(self.table_of(entity)?)?;
        self.targets(table, relationship).nth(index)
    }

    /// Enable or disable a component for one entity. Disabled components are
    /// skipped by queries that require them.
    pub fn enable(&mut self, entity: Entity, component: Id, enabled: bool) -> EcsResult<()> {
        Self::validate_id(component)?;
        if component.is_wildcard() || component.has_marker_flags() {
            return Err(EcsError::InvalidParameter("cannot toggle this id"));
        }
        self.entities.lookup(entity)?;

        if self.set_enabled_bit(entity, component, enabled) {
            return Ok(());
        }
        if self.is_deferred() {
            trace!(?entity, ?component, enabled, "deferred enable");
            self.commands.push(Command::Enable {
                entity,
                id: component,
                enabled,
            });
            return Ok(());
        }
        self.add_now(entity, component.with_flags(IdFlags::TOGGLE))?;
        self.set_enabled_bit(entity, component, enabled);
        Ok(())
    }

    fn set_enabled_bit(&mut self, entity: Entity, component: Id, enabled: bool) -> bool {
        let Ok(EntityRecord { table: Some(table), row }) = self.entities.lookup(entity) else {
            return false;
        };
        let Some(table) = self.tables.get_mut(table) else {
            return false;
        };
        if !table.set_enabled(row as usize, component, enabled) {
            return false;
        }
        table.mark_structure_dirty();
        true
    }

    /// Whether the entity has `component` and it is enabled.
    #[must_use]
    pub fn is_enabled(&self, entity: Entity, component: Id) -> bool {
        let Ok(EntityRecord { table: Some(table_id), row }) = self.entities.lookup(entity) else {
            return false;
        };
        match self.tables.get(table_id) {
            Some(table) if table.toggle_index(component).is_some() => table.is_enabled(row as usize, component),
            _ => self.has(entity, component),
        }
    }

    // ==================== Deferred Mode ====================

    /// Enter deferred mode. Scopes nest; structural operations are queued
    /// until the outermost scope ends.
    pub fn defer_begin(&mut self) {
        self.defer_depth += 1;
    }

    /// Leave deferred mode, applying queued operations when the outermost
    /// scope ends. A scope opened by a live query iterator is only closed by
    /// dropping the iterator.
    pub fn defer_end(&mut self) {
        if self.defer_depth == 0 {
            warn!("defer_end without matching defer_begin");
            return;
        }
        if self.defer_depth <= self.iterating {
            warn!("defer_end would close the scope of a live query iterator");
            return;
        }
        self.defer_depth -= 1;
        if self.defer_depth == 0 {
            self.flush();
        }
    }

    pub(crate) fn begin_iteration(&mut self) {
        self.iterating += 1;
        self.defer_begin();
    }

    pub(crate) fn end_iteration(&mut self) {
        self.iterating = self.iterating.saturating_sub(1);
        self.defer_end();
    }

    #[must_use]
    pub const fn is_deferred(&self) -> bool {
        self.defer_depth > 0
    }

    /// Number of queued structural operations.
    #[must_use]
    pub fn pending_commands(&self) -> usize {
        self.commands.len()
    }

    fn flush(&mut self) {
        while !self.commands.is_empty() {
            let commands = self.commands.take();
            debug!(count = commands.len(), "flushing deferred commands");
            for command in commands {
                self.apply(command);
            }
        }
    }

    fn apply(&mut self, command: Command) {
        let entity = command.entity();
        if !self.is_alive(entity) {
            trace!(?entity, ?command, "dropping command for dead entity");
            return;
        }
        let result = match command {
            Command::Place { entity } => {
                if matches!(self.entities.lookup(entity), Ok(EntityRecord { table: None, .. })) {
                    self.place(entity);
                }
                Ok(())
            }
            Command::Add { entity, id } => self.add_now(entity, id),
            Command::Remove { entity, id } => self.remove_now(entity, id),
            Command::Set { entity, id, value } => {
                // SAFETY: the queued value was built from the type info of `id`.
                let result = unsafe { self.set_raw(entity, id, value.as_ptr()) };
                if result.is_ok() {
                    value.consume();
                }
                result.map(|_| ())
            }
            Command::Enable { entity, id, enabled } => self.enable(entity, id, enabled),
            Command::Clear { entity } => self.clear_now(entity),
            Command::Delete { entity } => {
                self.delete_now(entity);
                Ok(())
            }
        };
        if let Err(err) = result {
            warn!(?entity, %err, "deferred command failed");
        }
    }

    // ==================== Tables ====================

    /// Put a new entity into the root table.
    fn place(&mut self, entity: Entity) {
        let Some(root) = self.tables.get_mut(TableId::ROOT) else {
            return;
        };
        let row = root.append(entity);
        self.entities.set_record(
            entity,
            EntityRecord {
                table: Some(TableId::ROOT),
                row: row as u32,
            },
        );
    }

    /// Table and row of an alive entity, placing it first if it was created
    /// in deferred mode.
    fn locate(&mut self, entity: Entity) -> EcsResult<(TableId, usize)> {
        let record = self.entities.lookup(entity)?;
        if let Some(table) = record.table {
            return Ok((table, record.row as usize));
        }
        self.place(entity);
        let record = self.entities.lookup(entity)?;
        Ok((record.table.unwrap_or(TableId::ROOT), record.row as usize))
    }

    /// Move an entity's row between tables and fix up the records. Returns
    /// the new row.
    fn move_entity(&mut self, entity: Entity, from: TableId, row: usize, to: TableId, uninit: Option<Id>) -> usize {
        let Some((src, dst)) = self.tables.pair_mut(from, to) else {
            return row;
        };
        let (new_row, moved) = Table::move_row(src, row, dst, uninit);
        if let Some(moved) = moved {
            self.entities.set_record(
                moved,
                EntityRecord {
                    table: Some(from),
                    row: row as u32,
                },
            );
        }
        self.entities.set_record(
            entity,
            EntityRecord {
                table: Some(to),
                row: new_row as u32,
            },
        );
        new_row
    }

    /// Type index and column of the first id in `table` matching `pattern`.
    pub(crate) fn match_self(&self, table: &Table, pattern: Id) -> Option<(usize, Option<usize>)> {
        let index = if pattern.is_pair() && pattern.is_wildcard() {
            self.ids.table_record(pattern, table.id())?.index as usize
        } else {
            table.ty().first_match(pattern)?
        };
        Some((index, table.column_of_type_index(index)))
    }

    /// Find the first entity reachable from `table` over `relationship`
    /// that owns an id matching `pattern`. Returns the entity, the matched
    /// id and its column.
    pub(crate) fn match_up(
        &self,
        table: &Table,
        pattern: Id,
        relationship: Entity,
        depth: u32,
    ) -> Option<(Entity, Id, Option<usize>)> {
        if depth >= self.config.max_traversal_depth {
            return None;
        }
        self.targets(table, relationship).find_map(|target| {
            let source = self.tables.get(self.table_of(target)?)?;
            match self.match_self(source, pattern) {
                Some((index, column)) => Some((target, source.ty().as_slice()[index], column)),
                None => self.match_up(source, pattern, relationship, depth + 1),
            }
        })
    }

    /// Alive targets of `relationship` pairs in a table's type.
    pub(crate) fn targets<'a>(&'a self, table: &'a Table, relationship: Entity) -> impl Iterator<Item = Entity> + 'a {
        let range = self
            .ids
            .table_record(Id::pair(relationship, Entity::WILDCARD), table.id())
            .map_or(0..0, |r| r.index as usize..(r.index + r.count) as usize);
        table.ty().as_slice()[range]
            .iter()
            .filter_map(|id| self.entities.alive_at(id.second()))
    }

    /// Number of live tables, including the root.
    #[must_use]
    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    #[must_use]
    pub fn table(&self, id: TableId) -> Option<&Table> {
        self.tables.get(id)
    }

    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.iter()
    }

    /// Table currently storing the entity.
    #[must_use]
    pub fn table_of(&self, entity: Entity) -> Option<TableId> {
        self.entities.lookup(entity).ok()?.table
    }

    /// Type of the entity: the sorted list of its ids.
    #[must_use]
    pub fn type_of(&self, entity: Entity) -> Option<&Type> {
        Some(self.tables.get(self.table_of(entity)?)?.ty())
    }

    #[must_use]
    pub const fn id_index(&self) -> &IdIndex {
        &self.ids
    }

    /// Table reached from `table` by adding `id`.
    pub fn table_add_id(&mut self, table: TableId, id: Id) -> TableId {
        self.tables.add_id(table, id, &mut self.ids, &self.components)
    }

    /// Table reached from `table` by removing `id`.
    pub fn table_remove_id(&mut self, table: TableId, id: Id) -> TableId {
        self.tables.remove_id(table, id, &mut self.ids, &self.components)
    }

    /// Cached graph edge from `table` for `id`, if any.
    #[must_use]
    pub fn table_edge(&self, table: TableId, id: Id, kind: EdgeKind) -> Option<TableId> {
        self.tables.edge(table, id, kind)
    }

    /// Reclaim empty tables. Does nothing in deferred mode. Returns the
    /// number of tables deleted.
    pub fn compact(&mut self) -> usize {
        if self.is_deferred() {
            return 0;
        }
        self.tables.compact(&mut self.ids)
    }

    // ==================== Queries ====================

    /// Start building a query.
    pub fn query(&self) -> QueryBuilder<'_> {
        QueryBuilder::new(self)
    }

    /// Whether anything `query` reads changed since its last complete
    /// iteration.
    #[must_use]
    pub fn query_changed(&self, query: &Query) -> bool {
        query.changed(self)
    }
}

/// Move one value into uninitialized `dst`.
///
/// # Safety
///
/// `src` holds an initialized value described by `info`; `dst` is valid for
/// one value and does not overlap `src`.
unsafe fn move_into(info: &TypeInfo, dst: *mut u8, src: *mut u8) {
    // SAFETY: forwarded from caller.
    unsafe {
        match info.hooks().move_fn {
            Some(move_fn) => move_fn(dst, src, 1),
            None => std::ptr::copy_nonoverlapping(src, dst, info.size()),
        }
    }
}

/// Construct one value in uninitialized `dst`.
///
impl fmt::Debug for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("World")
            .field("entity_count", &self.entity_count())
            .field("table_count", &self.tables.len())
            .field("components", &self.components.len())
            .field("deferred", &self.defer_depth)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Position {
        x: f32,
        y: f32,
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Velocity {
        x: f32,
        y: f32,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Default)]
    struct Health(u32);

    struct Tracked(Arc<AtomicUsize>);

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_spawn_and_get() {
        let mut world = World::new();

        let entity = world.spawn(Position { x: 1.0, y: 2.0 });

        assert!(world.is_alive(entity));
        // Four builtins, the Position component and the entity
        assert_eq!(world.entity_count(), 6);

        let pos = world.get::<Position>(entity).unwrap();
        assert_eq!(pos.x, 1.0);
        assert_eq!(pos.y, 2.0);
    }

    #[test]
    fn test_builtins_alive() {
        let world = World::new();
        for builtin in [Entity::WILDCARD, Entity::IS_A, Entity::CHILD_OF, Entity::PREFAB] {
            assert!(world.is_alive(builtin));
            assert_eq!(world.table_of(builtin), Some(TableId::ROOT));
        }
        assert!(!world.is_alive(Entity::NULL));
    }

    #[test]
    fn test_set_overwrites_and_get_mut() {
        let mut world = World::new();
        let entity = world.spawn(Position { x: 1.0, y: 2.0 });
        let table = world.table_of(entity);

        world.set(entity, Position { x: 3.0, y: 4.0 }).unwrap();
        assert_eq!(world.table_of(entity), table);

        world.get_mut::<Position>(entity).unwrap().x += 10.0;
        assert_eq!(world.get::<Position>(entity), Some(&Position { x: 13.0, y: 4.0 }));
    }

    #[test]
    fn test_add_and_remove_component() {
        let mut world = World::new();
        let entity = world.spawn(Position { x: 1.0, y: 2.0 });
        world.set(entity, Velocity { x: 0.5, y: 0.5 }).unwrap();

        assert!(world.has_component::<Position>(entity));
        assert!(world.has_component::<Velocity>(entity));

        world.remove_component::<Velocity>(entity).unwrap();
        assert!(world.has_component::<Position>(entity));
        assert!(!world.has_component::<Velocity>(entity));
        assert_eq!(world.get::<Position>(entity), Some(&Position { x: 1.0, y: 2.0 }));

        // Removing again is a no-op
        world.remove_component::<Velocity>(entity).unwrap();
    }

    #[test]
    fn test_invalid_ids() {
        let mut world = World::new();
        let entity = world.create();
        assert_eq!(world.add(entity, Id::NULL), Err(EcsError::InvalidParameter("null id")));
        assert!(world.add(entity, Id::WILDCARD).is_err());

        world.delete(entity);
        let tag = world.create();
        assert_eq!(world.add(entity, Id::from(tag)), Err(EcsError::NotAlive(entity)));
    }

    #[test]
    fn test_delete_recycles_index() {
        let mut world = World::new();
        let entity = world.spawn(Health(3));
        let count = world.entity_count();

        assert!(world.delete(entity));
        assert!(!world.is_alive(entity));
        assert!(!world.delete(entity));
        assert_eq!(world.entity_count(), count - 1);

        let reused = world.create();
        assert_eq!(reused.index(), entity.index());
        assert_ne!(reused.generation(), entity.generation());
        assert!(world.get::<Health>(reused).is_none());
        assert!(world.get::<Health>(entity).is_none());
    }

    #[test]
    fn test_swap_remove_keeps_records() {
        let mut world = World::new();
        let a = world.spawn(Health(1));
        let b = world.spawn(Health(2));
        let c = world.spawn(Health(3));

        world.delete(a);
        assert_eq!(world.get::<Health>(b), Some(&Health(2)));
        assert_eq!(world.get::<Health>(c), Some(&Health(3)));

        world.set(c, Position { x: 0.0, y: 0.0 }).unwrap();
        assert_eq!(world.get::<Health>(b), Some(&Health(2)));
        assert_eq!(world.get::<Health>(c), Some(&Health(3)));
    }

    #[test]
    fn test_values_dropped_once() {
        let drops = Arc::new(AtomicUsize::new(0));
        let mut world = World::new();

        let entity = world.spawn(Tracked(drops.clone()));
        world.set(entity, Tracked(drops.clone())).unwrap();
        assert_eq!(drops.load(Ordering::SeqCst), 1);

        world.set(entity, Health(1)).unwrap();
        assert_eq!(drops.load(Ordering::SeqCst), 1);

        world.remove_component::<Tracked>(entity).unwrap();
        assert_eq!(drops.load(Ordering::SeqCst), 2);

        let other = world.spawn(Tracked(drops.clone()));
        world.delete(other);
        assert_eq!(drops.load(Ordering::SeqCst), 3);

        world.spawn(Tracked(drops.clone()));
        drop(world);
        assert_eq!(drops.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_pairs_and_wildcards() {
        let mut world = World::new();
        let likes = world.create();
        let apples = world.create();
        let pears = world.create();
        let entity = world.create();

        world.add_pair(entity, likes, apples).unwrap();
        world.add_pair(entity, likes, pears).unwrap();
        assert!(world.has_pair(entity, likes, apples));
        assert!(world.has(entity, Id::pair(likes, Entity::WILDCARD)));
        assert!(world.has(entity, Id::pair(Entity::WILDCARD, pears)));
        assert_eq!(world.target(entity, likes, 0), Some(apples));
        assert_eq!(world.target(entity, likes, 1), Some(pears));
        assert_eq!(world.target(entity, likes, 2), None);

        world.remove(entity, Id::pair(likes, Entity::WILDCARD)).unwrap();
        assert!(!world.has(entity, Id::pair(likes, Entity::WILDCARD)));
        assert_eq!(world.table_of(entity), Some(TableId::ROOT));
    }

    #[test]
    fn test_delete_target_removes_pairs() {
        let mut world = World::new();
        let likes = world.create();
        let apples = world.create();
        let entity = world.spawn(Health(7));
        world.add_pair(entity, likes, apples).unwrap();

        world.delete(apples);
        assert!(world.is_alive(entity));
        assert!(!world.has(entity, Id::pair(likes, Entity::WILDCARD)));
        assert_eq!(world.get::<Health>(entity), Some(&Health(7)));
    }

    #[test]
    fn test_delete_parent_deletes_children() {
        let mut world = World::new();
        let parent = world.create();
        let child = world.create();
        let grandchild = world.create();
        world.add_pair(child, Entity::CHILD_OF, parent).unwrap();
        world.add_pair(grandchild, Entity::CHILD_OF, child).unwrap();

        world.delete(parent);
        assert!(!world.is_alive(child));
        assert!(!world.is_alive(grandchild));
    }

    #[test]
    fn test_delete_child_of_cycle() {
        let mut world = World::new();
        let a = world.create();
        let b = world.create();
        let own = world.create();
        world.add_pair(a, Entity::CHILD_OF, b).unwrap();
        world.add_pair(b, Entity::CHILD_OF, a).unwrap();
        world.add_pair(own, Entity::CHILD_OF, own).unwrap();

        assert!(world.delete(b));
        assert!(!world.is_alive(a));
        assert!(!world.is_alive(b));

        assert!(world.delete(own));
        assert!(!world.is_alive(own));
    }

    #[test]
    fn test_add_without_value_requires_ctor() {
        let mut world = World::new();
        let name = world.component::<String>();
        let entity = world.create();

        let missing = Err(EcsError::MissingHook { id: name, hook: "ctor" });
        assert_eq!(world.add(entity, name), missing);
        world.defer_begin();
        assert_eq!(world.add(entity, name), missing);
        assert_eq!(world.pending_commands(), 0);
        world.defer_end();
        assert!(!world.has(entity, name));

        let health = world
            .component_with_hooks::<Health>(TypeHooks::of::<Health>().with_default::<Health>())
            .unwrap();
        world.add(entity, health).unwrap();
        assert_eq!(world.get::<Health>(entity), Some(&Health::default()));
    }

    #[test]
    fn test_delete_component_entity() {
        let mut world = World::new();
        let entity = world.spawn(Health(1));
        world.set(entity, Position { x: 0.0, y: 0.0 }).unwrap();
        let health = world.component::<Health>();

        world.delete(health.as_entity().unwrap());
        assert!(world.component_id::<Health>().is_none());
        assert!(world.type_info(health).is_none());
        assert!(!world.has(entity, health));
        assert!(world.has_component::<Position>(entity));
    }

    #[test]
    fn test_inheritance() {
        let mut world = World::new();
        let base = world.spawn(Health(10));
        let instance = world.create();
        world.add_pair(instance, Entity::IS_A, base).unwrap();

        assert!(world.has_component::<Health>(instance));
        assert!(!world.owns(instance, world.component_id::<Health>().unwrap()));
        assert_eq!(world.get::<Health>(instance), Some(&Health(10)));
        assert!(world.get_mut::<Health>(instance).is_none());

        world.set(instance, Health(20)).unwrap();
        assert_eq!(world.get::<Health>(instance), Some(&Health(20)));
        assert_eq!(world.get::<Health>(base), Some(&Health(10)));

        assert!(world.add_pair(base, Entity::IS_A, base).is_err());
    }

    #[test]
    fn test_auto_override_copies_value() {
        let mut world = World::new();
        let health = world
            .component_with_hooks::<Health>(TypeHooks::of::<Health>().with_clone::<Health>())
            .unwrap();
        let base = world.create();
        world.add(base, Id::PREFAB).unwrap();
        world.set(base, Health(5)).unwrap();
        world.add(base, health.with_flags(IdFlags::AUTO_OVERRIDE)).unwrap();

        let instance = world.instantiate(base).unwrap();
        assert!(world.owns(instance, health));
        assert_eq!(world.get::<Health>(instance), Some(&Health(5)));

        world.get_mut::<Health>(instance).unwrap().0 = 1;
        assert_eq!(world.get::<Health>(base), Some(&Health(5)));
    }

    #[test]
    fn test_auto_override_requires_copy_hook() {
        let mut world = World::new();
        let base = world.spawn(Position { x: 1.0, y: 1.0 });
        let position = world.component::<Position>();
        world.add(base, position.with_flags(IdFlags::AUTO_OVERRIDE)).unwrap();

        let count = world.entity_count();
        assert_eq!(
            world.instantiate(base),
            Err(EcsError::MissingHook {
                id: position,
                hook: "copy",
            })
        );
        assert_eq!(world.entity_count(), count);
    }

    #[test]
    fn test_get_by_id_type_mismatch() {
        let mut world = World::new();
        let entity = world.spawn(Health(1));
        let health = world.component::<Health>();

        assert_eq!(world.get_by_id::<Health>(entity, health), Ok(Some(&Health(1))));
        assert!(matches!(
            world.get_by_id::<Position>(entity, health),
            Err(EcsError::TypeMismatch { .. })
        ));
        assert!(matches!(
            world.set_id(entity, health, Position { x: 0.0, y: 0.0 }),
            Err(EcsError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_pair_with_data() {
        let mut world = World::new();
        let amount = world.component::<Health>();
        let target = world.create();
        let entity = world.create();

        let pair = Id::pair(amount.as_entity().unwrap(), target);
        world.set_id(entity, pair, Health(9)).unwrap();
        assert_eq!(world.get_by_id::<Health>(entity, pair), Ok(Some(&Health(9))));
        assert!(!world.has_component::<Health>(entity));
    }

    #[test]
    fn test_set_bytes() {
        let mut world = World::new();
        let raw = world.register_component(ComponentDesc::new("Raw", 4, 4).unwrap());
        let tag = world.register_component(ComponentDesc::tag("Tag"));
        let entity = world.create();

        let ptr = world.set_bytes(entity, raw, &9u32.to_ne_bytes()).unwrap().unwrap();
        assert_eq!(unsafe { ptr.as_ptr().cast::<u32>().read() }, 9);
        assert!(world.set_bytes(entity, raw, &[0; 3]).is_err());
        assert!(world.set_bytes(entity, tag, &[]).is_err());

        let tracked = world.component::<Tracked>();
        assert!(world.set_bytes(entity, tracked, &[0; size_of::<Tracked>()]).is_err());
    }

    #[test]
    fn test_clear() {
        let mut world = World::new();
        let entity = world.spawn(Health(1));
        world.set(entity, Position { x: 0.0, y: 0.0 }).unwrap();

        world.clear(entity).unwrap();
        assert!(world.is_alive(entity));
        assert_eq!(world.table_of(entity), Some(TableId::ROOT));
        assert!(world.type_of(entity).unwrap().is_empty());
    }

    #[test]
    fn test_deferred_operations_apply_in_order() {
        let mut world = World::new();
        let position = world.component::<Position>();
        let tag = world.create();
        let existing = world.spawn(Health(1));

        world.defer_begin();
        let entity = world.create();
        assert!(world.is_alive(entity));
        assert_eq!(world.table_of(entity), None);

        assert!(world.set(entity, Position { x: 1.0, y: 0.0 }).unwrap().is_none());
        world.add(entity, Id::from(tag)).unwrap();
        world.remove(entity, Id::from(tag)).unwrap();
        world.delete(existing);

        // Writes to owned components are not structural
        world.set(existing, Health(2)).unwrap();
        assert_eq!(world.get::<Health>(existing), Some(&Health(2)));

        world.defer_begin();
        world.defer_end();
        assert!(world.is_deferred());
        assert_eq!(world.pending_commands(), 5);
        assert!(!world.has(entity, position));

        world.defer_end();
        assert!(!world.is_deferred());
        assert_eq!(world.pending_commands(), 0);
        assert_eq!(world.get::<Position>(entity), Some(&Position { x: 1.0, y: 0.0 }));
        assert!(!world.has(entity, Id::from(tag)));
        assert!(!world.is_alive(existing));
    }

    #[test]
    fn test_deferred_commands_for_deleted_entity_are_dropped() {
        let drops = Arc::new(AtomicUsize::new(0));
        let mut world = World::new();
        world.component::<Tracked>();
        let entity = world.create();

        world.defer_begin();
        world.delete(entity);
        world.set(entity, Tracked(drops.clone())).unwrap();
        world.defer_end();

        assert!(!world.is_alive(entity));
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_enable_disable() {
        let mut world = World::new();
        let entity = world.spawn(Health(1));
        let health = world.component::<Health>();

        assert!(world.is_enabled(entity, health));
        world.enable(entity, health, false).unwrap();
        assert!(!world.is_enabled(entity, health));
        assert!(world.owns(entity, health.with_flags(IdFlags::TOGGLE)));
        assert_eq!(world.get::<Health>(entity), Some(&Health(1)));

        world.enable(entity, health, true).unwrap();
        assert!(world.is_enabled(entity, health));
    }

    #[test]
    fn test_table_edges_and_compact() {
        let mut world = World::new();
        let a = world.create();
        let b = world.create();
        let with_a = world.table_add_id(TableId::ROOT, Id::from(a));
        let with_ab = world.table_add_id(with_a, Id::from(b));

        assert_eq!(world.table_edge(TableId::ROOT, Id::from(a), EdgeKind::Add), Some(with_a));
        assert_eq!(world.table_edge(with_ab, Id::from(b), EdgeKind::Remove), Some(with_a));
        assert_eq!(world.table_remove_id(with_ab, Id::from(b)), with_a);
        assert_eq!(world.table_count(), 3);

        let entity = world.create();
        world.add(entity, Id::from(a)).unwrap();
        assert_eq!(world.compact(), 1);
        assert!(world.table(with_ab).is_none());
        assert!(world.table(with_a).is_some());
        assert_eq!(world.table_edge(with_a, Id::from(b), EdgeKind::Add), None);
    }
}
