#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::redundant_pub_crate)]
#![allow(clippy::float_cmp)]

//! Sieve ECS - a reactive component index.
//!
//! Entities are open-ended bags of typed components and tags. Queries are
//! live subsets of entities defined by opaque predicates, kept up to date
//! incrementally as entities change, without re-scanning the population.
//!
//! # Key Concepts
//!
//! - **Entity**: a shared handle to a set of components and tags
//! - **Component**: any `'static` value; one per type unless the type is
//!   registered as *linked*, in which case an entity holds an ordered list
//! - **Query**: predicate + membership list + added/removed signals
//! - **Snapshot**: the entity as it was just before the change that moved it
//!   in or out of a query
//! - **Engine**: owns entities, queries and systems; routes every entity
//!   change to every attached query
//!
//! # Data Flow
//!
//! ```text
//! entity.add(..) -> entity signal -> engine router -> query.entity_component_added
//!                                                   -> query signal -> your handler
//! ```
//!
//! # Example
//!
//! ```ignore
//! use sieve_ecs::prelude::*;
//!
//! struct Health(u32);
//! struct Dead;
//!
//! let engine = Engine::new();
//! let alive = Query::builder().with::<Health>().without::<Dead>().build();
//! engine.add_query(&alive);
//!
//! let goblin = Entity::new();
//! goblin.add(Health(7));
//! engine.add_entity(&goblin);
//! assert!(alive.has(&goblin));
//!
//! goblin.add(Dead);
//! assert!(!alive.has(&goblin));
//! ```

mod bus;
mod component;
mod config;
mod engine;
mod entity;
mod error;
mod key;
mod linked;
mod query;
mod snapshot;
mod system;

pub use bus::{MessageBus, MessageHandler, Topic};
pub use component::{
    Component, ComponentId, ComponentInfo, ComponentRef, ComponentRegistry, Shared, component_id,
    component_info, lookup, register_ancestor, register_linked,
};
pub use config::EngineConfig;
pub use engine::Engine;
pub use entity::{ComponentIter, Entity, EntityId, StructuralChange};
pub use error::{EcsError, EcsResult};
pub use key::{ComponentKey, Item, Tag};
pub use linked::{LinkedComponentList, LinkedIter};
pub use query::{Predicate, Query, QueryBuilder, QueryTerm, TermAccess};
pub use sieve_signal::{Handler, Priority, Signal};
pub use snapshot::EntitySnapshot;
pub use system::{System, SystemContext};

pub(crate) type FxHashMap<K, V> = hashbrown::HashMap<K, V, rustc_hash::FxBuildHasher>;
pub(crate) type FxHashSet<T> = hashbrown::HashSet<T, rustc_hash::FxBuildHasher>;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        Component, ComponentKey, EcsError, EcsResult, Engine, EngineConfig, Entity,
        EntitySnapshot, Handler, Priority, Query, QueryBuilder, Shared, StructuralChange, System,
        SystemContext, Tag, Topic, register_ancestor, register_linked,
    };
}
