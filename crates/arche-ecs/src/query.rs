//! Queries over tables.
//!
//! A query is a list of terms. Each term names an id (or wildcard pattern),
//! where it is looked up (the matched table itself, or entities reached by
//! following a relationship "up"), an operator and an access mode. Matching
//! happens per table: a table either matches a query for all of its rows or
//! for none, except for rows whose required components are disabled.
//!
//! # Example
//!
//! ```
//! use arche_ecs::World;
//!
//! #[derive(Debug, Clone, Copy, PartialEq)]
//! struct Position(f32);
//! #[derive(Debug, Clone, Copy, PartialEq)]
//! struct Velocity(f32);
//!
//! let mut world = World::new();
//! let e = world.spawn(Position(0.0));
//! world.set(e, Velocity(2.0)).unwrap();
//!
//! let mut query = world.query().with::<Position>().with::<Velocity>().build().unwrap();
//! let mut it = query.iter(&mut world);
//! while it.next() {
//!     let velocity: Vec<Velocity> = it.field::<Velocity>(1).unwrap().to_vec();
//!     for (p, v) in it.field_mut::<Position>(0).unwrap().iter_mut().zip(velocity) {
//!         p.0 += v.0;
//!     }
//! }
//! drop(it);
//! assert_eq!(world.get::<Position>(e), Some(&Position(2.0)));
//! ```

use std::{fmt, ptr::NonNull};

use smallvec::SmallVec;
use tracing::trace;

use crate::{
    change::{QueryMonitor, Watermark},
    component::{Component, TypeInfo},
    entity::Entity,
    error::{EcsError, EcsResult},
    id::Id,
    table::{Table, TableFlags, TableId},
    world::World,
};

/// Where a term's id is looked up.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TermSrc {
    /// On the matched table.
    #[default]
    SelfOnly,
    /// On entities reached by following the relationship from the matched
    /// table, transitively.
    Up(Entity),
    /// On the matched table, else up the relationship.
    SelfUp(Entity),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TermOper {
    #[default]
    And,
    /// Forms a chain with the next term: one of the chained terms must match.
    Or,
    Not,
    Optional,
}

/// How a term's data is accessed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InOut {
    #[default]
    InOut,
    In,
    Out,
    /// The term only filters; its data is not accessed.
    None,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Term {
    pub id: Id,
    pub src: TermSrc,
    pub oper: TermOper,
    pub inout: InOut,
}

impl Term {
    #[must_use]
    pub const fn new(id: Id) -> Self {
        Self {
            id,
            src: TermSrc::SelfOnly,
            oper: TermOper::And,
            inout: InOut::InOut,
        }
    }

    #[must_use]
    pub const fn src(mut self, src: TermSrc) -> Self {
        self.src = src;
        self
    }

    #[must_use]
    pub const fn oper(mut self, oper: TermOper) -> Self {
        self.oper = oper;
        self
    }

    #[must_use]
    pub const fn inout(mut self, inout: InOut) -> Self {
        self.inout = inout;
        self
    }
}

// ==================== Builder ====================

/// Builder for [`Query`], obtained from [`World::query`].
///
/// Modifiers (`or`, `up`, `self_up`, `read_only`, ...) apply to the most
/// recently added term.
pub struct QueryBuilder<'w> {
    world: &'w World,
    terms: Vec<Term>,
    detect_changes: bool,
    error: Option<EcsError>,
}

impl<'w> QueryBuilder<'w> {
    pub(crate) const fn new(world: &'w World) -> Self {
        Self {
            world,
            terms: Vec::new(),
            detect_changes: false,
            error: None,
        }
    }

    fn typed<T: Component>(mut self, oper: TermOper) -> Self {
        match self.world.component_id::<T>() {
            Some(id) => self.terms.push(Term::new(id).oper(oper)),
            None => {
                self.error
                    .get_or_insert(EcsError::UnregisteredType(std::any::type_name::<T>()));
            }
        }
        self
    }

    fn modify_last(mut self, f: impl FnOnce(&mut Term)) -> Self {
        match self.terms.last_mut() {
            Some(term) => f(term),
            None => {
                self.error
                    .get_or_insert(EcsError::InvalidParameter("modifier without a term"));
            }
        }
        self
    }

    #[must_use]
    pub fn term(mut self, term: Term) -> Self {
        self.terms.push(term);
        self
    }

    #[must_use]
    pub fn with_id(self, id: Id) -> Self {
        self.term(Term::new(id))
    }

    #[must_use]
    pub fn with<T: Component>(self) -> Self {
        self.typed::<T>(TermOper::And)
    }

    #[must_use]
    pub fn with_pair(self, relationship: Entity, target: Entity) -> Self {
        self.with_id(Id::pair(relationship, target))
    }

    #[must_use]
    pub fn without_id(self, id: Id) -> Self {
        self.term(Term::new(id).oper(TermOper::Not))
    }

    #[must_use]
    pub fn without<T: Component>(self) -> Self {
        self.typed::<T>(TermOper::Not)
    }

    #[must_use]
    pub fn optional_id(self, id: Id) -> Self {
        self.term(Term::new(id).oper(TermOper::Optional))
    }

    #[must_use]
    pub fn optional<T: Component>(self) -> Self {
        self.typed::<T>(TermOper::Optional)
    }

    /// Require `T` without accessing its data.
    #[must_use]
    pub fn filter<T: Component>(self) -> Self {
        self.typed::<T>(TermOper::And).modify_last(|t| t.inout = InOut::None)
    }

    /// Chain the last term with the next one: either may match.
    #[must_use]
    pub fn or(self) -> Self {
        self.modify_last(|t| t.oper = TermOper::Or)
    }

    #[must_use]
    pub fn up(self, relationship: Entity) -> Self {
        self.modify_last(|t| t.src = TermSrc::Up(relationship))
    }

    #[must_use]
    pub fn self_up(self, relationship: Entity) -> Self {
        self.modify_last(|t| t.src = TermSrc::SelfUp(relationship))
    }

    #[must_use]
    pub fn read_only(self) -> Self {
        self.modify_last(|t| t.inout = InOut::In)
    }

    #[must_use]
    pub fn write_only(self) -> Self {
        self.modify_last(|t| t.inout = InOut::Out)
    }

    #[must_use]
    pub fn inout(self, inout: InOut) -> Self {
        self.modify_last(|t| t.inout = inout)
    }

    /// Track what the query reads so [`Query::changed`] can tell whether
    /// matched data changed since the last complete iteration.
    #[must_use]
    pub fn detect_changes(mut self) -> Self {
        self.detect_changes = true;
        self
    }

    pub fn build(self) -> EcsResult<Query> {
        if let Some(err) = self.error {
            return Err(err);
        }
        Query::new(self.terms, self.detect_changes)
    }
}

// ==================== Query ====================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FieldOper {
    And,
    Optional,
    Not,
    Or,
}

/// A query field: one term, or a chain of `Or` terms.
#[derive(Clone, Copy, Debug)]
struct Field {
    terms: (usize, usize),
    oper: FieldOper,
    /// Whether the field's column counter is part of the watermark.
    tracked: bool,
}

/// Resolution of one field against a table.
#[derive(Clone, Copy, Debug)]
struct FieldMatch {
    /// Matched id, or the term's id when the field is not set.
    id: Id,
    term: usize,
    column: Option<usize>,
    /// Entity the data comes from, `None` for the matched table itself.
    src: Option<Entity>,
    set: bool,
}

#[derive(Clone, Debug)]
struct TableMatch {
    fields: SmallVec<[FieldMatch; 8]>,
    /// Enable bits that must be set for a row to be visited.
    toggles: SmallVec<[usize; 2]>,
}

/// A compiled query.
pub struct Query {
    terms: Vec<Term>,
    fields: Vec<Field>,
    /// Terms whose id index record can enumerate candidate tables.
    drivers: SmallVec<[usize; 4]>,
    match_prefabs: bool,
    monitor: Option<QueryMonitor>,
}

impl Query {
    /// Compile terms into a query.
    pub fn new(terms: Vec<Term>, detect_changes: bool) -> EcsResult<Self> {
        if terms.is_empty() {
            return Err(EcsError::InvalidParameter("query has no terms"));
        }
        for term in &terms {
            if term.id.is_null() {
                return Err(EcsError::InvalidParameter("query term has a null id"));
            }
            if let TermSrc::Up(rel) | TermSrc::SelfUp(rel) = term.src
                && rel.is_null()
            {
                return Err(EcsError::InvalidParameter("traversal over a null relationship"));
            }
        }

        let mut fields = Vec::new();
        let mut start = 0;
        while start < terms.len() {
            let mut end = start;
            while terms[end].oper == TermOper::Or {
                end += 1;
                if end == terms.len() {
                    return Err(EcsError::InvalidParameter("or-chain is not terminated"));
                }
            }
            let oper = if end > start {
                if terms[end].oper != TermOper::And {
                    return Err(EcsError::InvalidParameter("or-chain mixed with another operator"));
                }
                FieldOper::Or
            } else {
                match terms[start].oper {
                    TermOper::Optional => FieldOper::Optional,
                    TermOper::Not => FieldOper::Not,
                    TermOper::And | TermOper::Or => FieldOper::And,
                }
            };
            let tracked = oper != FieldOper::Not
                && terms[start..=end]
                    .iter()
                    .any(|t| matches!(t.inout, InOut::InOut | InOut::In));
            fields.push(Field {
                terms: (start, end + 1),
                oper,
                tracked,
            });
            start = end + 1;
        }
        if fields.len() > 64 {
            return Err(EcsError::InvalidParameter("too many query fields"));
        }

        let drivers = fields
            .iter()
            .filter(|f| f.oper == FieldOper::And)
            .map(|f| f.terms.0)
            .filter(|&t| terms[t].src == TermSrc::SelfOnly && terms[t].id != Id::WILDCARD)
            .collect();
        let match_prefabs = terms.iter().any(|t| t.id == Id::PREFAB);

        Ok(Self {
            terms,
            fields,
            drivers,
            match_prefabs,
            monitor: detect_changes.then(QueryMonitor::new),
        })
    }

    #[must_use]
    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    /// Number of fields; an or-chain counts as one field.
    #[must_use]
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub const fn detects_changes(&self) -> bool {
        self.monitor.is_some()
    }

    /// Tables that may match, from the id index when a required term allows
    /// it, else every table.
    fn candidates(&self, world: &World) -> Vec<TableId> {
        let driver = self
            .drivers
            .iter()
            .map(|&t| (t, world.ids.table_count(self.terms[t].id)))
            .min_by_key(|&(_, count)| count);
        match driver {
            Some((t, _)) => world
                .ids
                .tables_for(self.terms[t].id)
                .map(|r| r.table)
                .collect(),
            None => world.tables.ids(),
        }
    }

    fn resolve(&self, world: &World, table: &Table, term_index: usize) -> Option<FieldMatch> {
        let term = &self.terms[term_index];
        let on_self = || {
            world
                .match_self(table, term.id)
                .map(|(index, column)| FieldMatch {
                    id: table.ty().as_slice()[index],
                    term: term_index,
                    column,
                    src: None,
                    set: true,
                })
        };
        let up = |rel| {
            world
                .match_up(table, term.id, rel, 0)
                .map(|(src, id, column)| FieldMatch {
                    id,
                    term: term_index,
                    column,
                    src: Some(src),
                    set: true,
                })
        };
        match term.src {
            TermSrc::SelfOnly => on_self(),
            TermSrc::Up(rel) => up(rel),
            TermSrc::SelfUp(rel) => on_self().or_else(|| up(rel)),
        }
    }

    fn unset(&self, term_index: usize) -> FieldMatch {
        FieldMatch {
            id: self.terms[term_index].id,
            term: term_index,
            column: None,
            src: None,
            set: false,
        }
    }

    fn match_table(&self, world: &World, table: &Table) -> Option<TableMatch> {
        if table.flags().contains(TableFlags::IS_PREFAB) && !self.match_prefabs {
            return None;
        }

        let mut fields: SmallVec<[FieldMatch; 8]> = SmallVec::new();
        for field in &self.fields {
            let (first, end) = field.terms;
            let matched = match field.oper {
                FieldOper::And => self.resolve(world, table, first)?,
                FieldOper::Optional => self
                    .resolve(world, table, first)
                    .unwrap_or_else(|| self.unset(first)),
                FieldOper::Not => {
                    if self.resolve(world, table, first).is_some() {
                        return None;
                    }
                    self.unset(first)
                }
                FieldOper::Or => (first..end).find_map(|t| self.resolve(world, table, t))?,
            };
            fields.push(matched);
        }

        let mut toggles: SmallVec<[usize; 2]> = SmallVec::new();
        if table.flags().contains(TableFlags::HAS_TOGGLE) {
            for (field, matched) in self.fields.iter().zip(&fields) {
                if matches!(field.oper, FieldOper::And | FieldOper::Or)
                    && matched.src.is_none()
                    && let Some(t) = table.toggle_index(matched.id)
                    && !toggles.contains(&t)
                {
                    toggles.push(t);
                }
            }
        }

        Some(TableMatch { fields, toggles })
    }

    /// Non-empty matched tables, without touching the monitor.
    fn collect_matches(&self, world: &World) -> Vec<(TableId, TableMatch)> {
        self.candidates(world)
            .into_iter()
            .filter_map(|id| {
                let table = world.tables.get(id)?;
                if table.is_empty() {
                    return None;
                }
                Some((id, self.match_table(world, table)?))
            })
            .collect()
    }

    fn watermark(&self, world: &World, table: &Table, matched: &TableMatch) -> Watermark {
        let mut watermark = Watermark::new();
        watermark.push(table.structure_version());
        for (field, m) in self.fields.iter().zip(&matched.fields) {
            if field.tracked {
                watermark.push(field_version(world, table, m));
            }
        }
        watermark
    }

    fn watermark_width(&self) -> usize {
        1 + self.fields.iter().filter(|f| f.tracked).count()
    }

    /// Whether data or structure the query reads changed since the last
    /// complete iteration. Always `true` without change detection or before
    /// the first complete iteration.
    #[must_use]
    pub fn changed(&self, world: &World) -> bool {
        let Some(monitor) = &self.monitor else {
            return true;
        };
        if !monitor.is_completed() {
            return true;
        }
        let matches = self.collect_matches(world);
        let tables: Vec<TableId> = matches.iter().map(|(t, _)| *t).collect();
        if monitor.is_match_set_changed(&tables) {
            return true;
        }
        matches.iter().any(|(id, matched)| {
            world.tables.get(*id).is_none_or(|table| {
                monitor.is_table_changed(*id, &self.watermark(world, table, matched))
            })
        })
    }

    /// Iterate matched tables. The world is deferred until the iterator is
    /// dropped.
    pub fn iter<'w, 'q>(&'q mut self, world: &'w mut World) -> QueryIter<'w, 'q> {
        world.begin_iteration();
        let candidates = self.candidates(world);
        QueryIter {
            world,
            query: self,
            candidates,
            cursor: 0,
            current: None,
            observed: Vec::new(),
            skipped: Vec::new(),
            done: false,
        }
    }

    /// Call `f` for every matched entity, with access to the world. The
    /// world is deferred during the calls.
    pub fn each(&mut self, world: &mut World, mut f: impl FnMut(&mut World, Entity)) {
        let mut it = self.iter(world);
        while it.next() {
            let entities = it.entities().to_vec();
            for entity in entities {
                f(it.world(), entity);
            }
        }
    }

    /// Number of matched entities with every required component enabled.
    #[must_use]
    pub fn count(&self, world: &World) -> usize {
        self.collect_matches(world)
            .iter()
            .filter_map(|(id, matched)| Some(enabled_rows(world.tables.get(*id)?, &matched.toggles)))
            .sum()
    }

    /// Number of non-empty matched tables.
    #[must_use]
    pub fn table_count(&self, world: &World) -> usize {
        self.collect_matches(world).len()
    }

    /// Matched entities with every required component enabled.
    #[must_use]
    pub fn entities(&self, world: &World) -> Vec<Entity> {
        let mut entities = Vec::new();
        for (id, matched) in self.collect_matches(world) {
            let Some(table) = world.tables.get(id) else {
                continue;
            };
            let mut from = 0;
            while let Some((start, len)) = enabled_run(table, from, &matched.toggles) {
                entities.extend_from_slice(&table.entities()[start..start + len]);
                from = start + len;
            }
        }
        entities
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("terms", &self.terms)
            .field("detect_changes", &self.monitor.is_some())
            .finish()
    }
}

fn enabled_run(table: &Table, from: usize, toggles: &[usize]) -> Option<(usize, usize)> {
    if toggles.is_empty() {
        return (from < table.len()).then(|| (from, table.len() - from));
    }
    table.enabled_run(from, toggles)
}

fn enabled_rows(table: &Table, toggles: &[usize]) -> usize {
    let mut count = 0;
    let mut from = 0;
    while let Some((start, len)) = enabled_run(table, from, toggles) {
        count += len;
        from = start + len;
    }
    count
}

/// Write counter of the column a field reads.
fn field_version(world: &World, table: &Table, matched: &FieldMatch) -> u64 {
    let Some(column) = matched.column.filter(|_| matched.set) else {
        return 0;
    };
    match matched.src {
        None => table.column_version(column),
        Some(src) => world
            .table_of(src)
            .and_then(|t| world.tables.get(t))
            .map_or(0, |t| t.column_version(column)),
    }
}

// ==================== Iteration ====================

struct Current {
    table: TableId,
    matched: TableMatch,
    offset: usize,
    count: usize,
    skipped: bool,
    /// Fields already counted as written in this table.
    written: u64,
}

/// Iterator over the tables matched by a query.
///
/// Each successful [`next`](Self::next) exposes a run of rows of one table:
/// all of them, or a run where every required toggled component is
/// enabled. The world stays deferred until the iterator is dropped.
pub struct QueryIter<'w, 'q> {
    world: &'w mut World,
    query: &'q mut Query,
    candidates: Vec<TableId>,
    cursor: usize,
    current: Option<Current>,
    observed: Vec<(TableId, Watermark)>,
    skipped: Vec<TableId>,
    done: bool,
}

impl QueryIter<'_, '_> {
    /// Advance to the next run of rows. Returns `false` once exhausted.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> bool {
        if self.done {
            return false;
        }

        if let Some(current) = &mut self.current {
            if !current.matched.toggles.is_empty()
                && let Some(table) = self.world.tables.get(current.table)
                && let Some((offset, count)) =
                    table.enabled_run(current.offset + current.count, &current.matched.toggles)
            {
                current.offset = offset;
                current.count = count;
                return true;
            }
            self.leave_table();
        }

        while let Some(&table_id) = self.candidates.get(self.cursor) {
            self.cursor += 1;
            let Some(table) = self.world.tables.get(table_id) else {
                continue;
            };
            if table.is_empty() {
                continue;
            }
            let Some(matched) = self.query.match_table(self.world, table) else {
                continue;
            };
            let Some((offset, count)) = enabled_run(table, 0, &matched.toggles) else {
                // Matched but no row enabled: nothing to visit, still observed.
                if self.query.monitor.is_some() {
                    let watermark = self.query.watermark(self.world, table, &matched);
                    self.observed.push((table_id, watermark));
                }
                continue;
            };
            self.current = Some(Current {
                table: table_id,
                matched,
                offset,
                count,
                skipped: false,
                written: 0,
            });
            return true;
        }

        self.finish();
        false
    }

    fn leave_table(&mut self) {
        let Some(current) = self.current.take() else {
            return;
        };
        if self.query.monitor.is_none() {
            return;
        }
        if current.skipped {
            self.skipped.push(current.table);
        } else if let Some(table) = self.world.tables.get(current.table) {
            let watermark = self.query.watermark(self.world, table, &current.matched);
            self.observed.push((current.table, watermark));
        }
    }

    fn finish(&mut self) {
        self.done = true;
        let width = self.query.watermark_width();
        if let Some(monitor) = &mut self.query.monitor {
            monitor.commit(std::mem::take(&mut self.observed), &self.skipped, width);
            trace!(tables = monitor.len(), "query monitor updated");
        }
    }

    /// Number of rows in the current run.
    #[must_use]
    pub fn count(&self) -> usize {
        self.current.as_ref().map_or(0, |c| c.count)
    }

    /// First row of the current run in its table.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.current.as_ref().map_or(0, |c| c.offset)
    }

    #[must_use]
    pub fn table_id(&self) -> Option<TableId> {
        self.current.as_ref().map(|c| c.table)
    }

    /// Entities of the current run.
    #[must_use]
    pub fn entities(&self) -> &[Entity] {
        let Some(current) = &self.current else {
            return &[];
        };
        self.world
            .tables
            .get(current.table)
            .map_or(&[][..], |t| &t.entities()[current.offset..current.offset + current.count])
    }

    fn field_match(&self, index: usize) -> Option<&FieldMatch> {
        self.current.as_ref()?.matched.fields.get(index)
    }

    /// Id matched by a field: the concrete id for wildcard terms.
    #[must_use]
    pub fn field_id(&self, index: usize) -> Option<Id> {
        self.field_match(index).map(|m| m.id)
    }

    /// Entity a field's data comes from, `None` when it is the matched table.
    #[must_use]
    pub fn field_src(&self, index: usize) -> Option<Entity> {
        self.field_match(index).and_then(|m| m.src)
    }

    /// Whether a field's data comes from the matched table itself.
    #[must_use]
    pub fn is_self(&self, index: usize) -> bool {
        self.field_match(index).is_some_and(|m| m.set && m.src.is_none())
    }

    /// Whether an optional or `Not` field matched.
    #[must_use]
    pub fn is_set(&self, index: usize) -> bool {
        self.field_match(index).is_some_and(|m| m.set)
    }

    /// Location of the data of a field and the number of values there: the
    /// run length for self fields, one for fields sourced from another
    /// entity.
    fn field_location(&self, index: usize) -> Option<(TableId, usize, usize, usize)> {
        let current = self.current.as_ref()?;
        let matched = current.matched.fields.get(index)?;
        if !matched.set {
            return None;
        }
        let column = matched.column?;
        match matched.src {
            None => Some((current.table, column, current.offset, current.count)),
            Some(src) => {
                let record = self.world.entities.lookup(src).ok()?;
                Some((record.table?, column, record.row as usize, 1))
            }
        }
    }

    fn field_info(&self, index: usize) -> Option<&TypeInfo> {
        let (table, column, ..) = self.field_location(index)?;
        Some(self.world.tables.get(table)?.column(column)?.info())
    }

    /// Raw pointer to a field's data and the number of values.
    #[must_use]
    pub fn field_ptr(&self, index: usize) -> Option<(NonNull<u8>, usize)> {
        let (table, column, row, count) = self.field_location(index)?;
        Some((self.world.tables.get(table)?.ptr(column, row)?, count))
    }

    /// Read a field as a slice of `T`. `None` if the field is not set,
    /// carries no data or stores another type.
    #[must_use]
    pub fn field<T: Component>(&self, index: usize) -> Option<&[T]> {
        if !self.field_info(index)?.is::<T>() {
            return None;
        }
        let (ptr, count) = self.field_ptr(index)?;
        // SAFETY: the column stores `count` initialized `T`s from `ptr`, and
        // the world is deferred so no structural change moves them.
        Some(unsafe { std::slice::from_raw_parts(ptr.as_ptr().cast::<T>(), count) })
    }

    /// Write a field as a slice of `T`. Counts as a write for change
    /// detection. `None` for read-only fields.
    pub fn field_mut<T: Component>(&mut self, index: usize) -> Option<&mut [T]> {
        if !self.field_info(index)?.is::<T>() {
            return None;
        }
        let (ptr, count) = self.field_ptr_mut(index)?;
        // SAFETY: as in `field`; `&mut self` keeps the slice unique.
        Some(unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr().cast::<T>(), count) })
    }

    /// Raw mutable access to a field's data. Counts as a write for change
    /// detection. `None` for read-only fields.
    pub fn field_ptr_mut(&mut self, index: usize) -> Option<(NonNull<u8>, usize)> {
        let matched = *self.field_match(index)?;
        if self.query.terms[matched.term].inout == InOut::In {
            return None;
        }
        let (table, column, row, count) = self.field_location(index)?;
        let current = self.current.as_mut()?;
        let bit = 1u64 << index;
        let first_write = current.written & bit == 0;
        current.written |= bit;

        let table = self.world.tables.get_mut(table)?;
        if first_write {
            table.mark_column_dirty(column);
        }
        Some((table.ptr(column, row)?, count))
    }

    /// Leave the current table without counting it as observed: a change
    /// detecting query keeps reporting it as changed.
    pub fn skip(&mut self) {
        if let Some(current) = &mut self.current {
            current.skipped = true;
        }
    }

    /// Whether the current table changed since this query last observed it.
    /// Always `true` without change detection.
    #[must_use]
    pub fn changed(&self) -> bool {
        let (Some(monitor), Some(current)) = (&self.query.monitor, &self.current) else {
            return true;
        };
        self.world.tables.get(current.table).is_none_or(|table| {
            let watermark = self.query.watermark(self.world, table, &current.matched);
            monitor.is_table_changed(current.table, &watermark)
        })
    }

    /// The world, in deferred mode. Its `defer_end` cannot close the scope
    /// this iterator holds.
    pub fn world(&mut self) -> &mut World {
        self.world
    }
}

impl Drop for QueryIter<'_, '_> {
    fn drop(&mut self) {
        self.world.end_iteration();
    }
}

impl fmt::Debug for QueryIter<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryIter")
            .field("table", &self.table_id())
            .field("offset", &self.offset())
            .field("count", &self.count())
            .finish()
    }
}
