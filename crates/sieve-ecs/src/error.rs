//! Error types for entity, query and engine operations.

use thiserror::Error;

use crate::entity::EntityId;

/// Errors surfaced by the reactive index.
///
/// Every variant is a programmer error; nothing is retried or corrected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EcsError {
    /// Engine-scoped state was accessed through a system context that is no
    /// longer attached to an engine.
    #[error("system is not attached to an engine")]
    NotAttached,

    /// The value cannot be stored on an entity.
    #[error("invalid component: {0}")]
    InvalidComponent(&'static str),

    /// The explicit resolve type is neither the component's own type nor a
    /// registered ancestor of it.
    #[error("component `{component}` cannot be resolved as `{resolve}`")]
    ResolveMismatch {
        component: &'static str,
        resolve: &'static str,
    },

    /// The instance is already part of the entity's linked list.
    #[error("component `{component}` is already linked on entity {entity}")]
    DuplicateAppend {
        component: &'static str,
        entity: EntityId,
    },
}

/// Result type for reactive index operations.
pub type EcsResult<T> = Result<T, EcsError>;
