//! Error types.

use thiserror::Error;

use crate::{Entity, Id};

/// Error returned by world, table and query operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EcsError {
    /// Null id or entity, wrong byte length, malformed query. Nothing was
    /// changed.
    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),

    /// The entity was deleted or never existed.
    #[error("entity not alive: {0}")]
    NotAlive(Entity),

    /// Typed access with a Rust type that does not match the registered one.
    #[error("type mismatch for {id:?}: expected {expected}, found {actual}")]
    TypeMismatch {
        id: Id,
        expected: &'static str,
        actual: &'static str,
    },

    /// A typed query term names a type that was never registered.
    #[error("component type not registered: {0}")]
    UnregisteredType(&'static str),

    /// The operation needs a lifecycle hook the component does not have.
    #[error("{id:?} has no {hook} hook")]
    MissingHook { id: Id, hook: &'static str },
}

/// Result type for ECS operations.
pub type EcsResult<T> = Result<T, EcsError>;
