// Allow unsafe code in ECS - necessary for type-erased column storage
#![allow(unsafe_code)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_safety_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::manual_let_else)]
#![allow(clippy::ptr_as_ptr)]
#![allow(clippy::ref_as_ptr)]
#![allow(clippy::cast_ptr_alignment)]
#![allow(clippy::float_cmp)]

//! Arche ECS - archetype storage engine for an Entity Component System
//!
//! Entities with the same set of ids share a table; adding or removing an id
//! moves the entity's row to the neighbouring table along a cached graph edge.
//!
//! # Key Concepts
//!
//! - **Entity**: 32-bit index plus 16-bit generation, recycled on delete
//! - **Id**: an entity, a pair `(relationship, target)`, or either with flags
//! - **Type**: the sorted set of ids an entity has
//! - **Table**: rows of all entities with one type, one column per data id
//! - **Id index**: id or wildcard pattern → tables containing it
//! - **Query**: terms matched per table, with `up` traversal over
//!   relationships such as `IsA`
//!
//! # Deferred Mode
//!
//! While a query iterator is alive, structural changes (add, remove, delete,
//! first set of a component) are queued and applied when it is dropped:
//!
//! ```
//! use arche_ecs::World;
//!
//! #[derive(Debug, Clone, Copy, PartialEq)]
//! struct Position(f32, f32);
//! #[derive(Debug, Clone, Copy, PartialEq)]
//! struct Moving;
//!
//! let mut world = World::new();
//! let e = world.spawn(Position(0.0, 0.0));
//!
//! let mut query = world.query().with::<Position>().build().unwrap();
//! query.each(&mut world, |world, entity| {
//!     world.set(entity, Moving).unwrap();
//! });
//! assert!(world.has_component::<Moving>(e));
//! ```

mod bitset;
mod block;
mod change;
mod command;
mod component;
mod config;
mod entity;
mod entity_index;
mod error;
mod graph;
mod id;
mod id_index;
mod query;
mod storage;
mod table;
mod world;

pub use block::{BlockAllocator, BlockId};
pub use change::{QueryMonitor, Watermark};
pub use component::{
    Component, ComponentDesc, ComponentRegistry, CopyFn, CtorFn, DtorFn, MoveFn, TypeHooks, TypeInfo,
};
pub use config::WorldConfig;
pub use entity::{Entity, EntityIndexRaw, Generation};
pub use entity_index::{EntityIndex, EntityRecord};
pub use error::{EcsError, EcsResult};
pub use graph::{EdgeKind, GraphEdge, TableGraph};
pub use id::{Id, IdFlags, Type};
pub use id_index::{IdIndex, IdRecord, TableRecord};
pub use query::{InOut, Query, QueryBuilder, QueryIter, Term, TermOper, TermSrc};
pub use storage::Column;
pub use table::{Table, TableFlags, TableId};
pub use world::World;

pub(crate) type HashMap<K, V> = hashbrown::HashMap<K, V, rustc_hash::FxBuildHasher>;
pub(crate) type HashSet<K> = hashbrown::HashSet<K, rustc_hash::FxBuildHasher>;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        Component, ComponentDesc, EcsError, EcsResult, Entity, Id, IdFlags, InOut, Query, TermSrc,
        TypeHooks, World, WorldConfig,
    };
}
