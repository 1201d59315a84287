//! Live queries: predicate-defined entity sets maintained incrementally.
//!
//! A [`Query`] pairs an opaque predicate with the ordered list of entities
//! that currently satisfy it. Because the predicate is a black box, the
//! query cannot diff component data; instead, on every single-field change
//! it re-evaluates the predicate against the two states bracketing the
//! change and infers the membership transition from the pair.
//!
//! # Basic Usage
//!
//! ```ignore
//! let moving = Query::builder()
//!     .with::<Position>()
//!     .with::<Velocity>()
//!     .without_tag("frozen")
//!     .build();
//!
//! engine.add_query(&moving);
//!
//! for entity in moving.iter() {
//!     // ...
//! }
//! ```
//!
//! # Notifications
//!
//! `on_entity_added` and `on_entity_removed` carry an [`EntitySnapshot`]:
//! `current()` is the live entity and `previous()` its state before the
//! triggering change. The snapshot is only filled in when a handler is
//! connected.

use std::{
    cell::{Cell, RefCell},
    fmt,
    rc::Rc,
};

use sieve_signal::Signal;
use tracing::trace;

use crate::{
    FxHashSet,
    component::{Component, ComponentId, component_id},
    entity::{Entity, EntityId},
    key::{ComponentKey, Item, Tag},
    snapshot::EntitySnapshot,
};

/// A membership test. Must be a pure function of the entity's state.
pub type Predicate = Box<dyn Fn(&Entity) -> bool>;

struct QueryInner {
    predicate: Predicate,
    /// Members in the order they were admitted.
    entities: RefCell<Vec<Entity>>,
    members: RefCell<FxHashSet<EntityId>>,
    /// Scratch entity for evaluating the state on the other side of a change.
    shadow: Entity,
    snapshot: EntitySnapshot,
    entity_added: Signal<EntitySnapshot>,
    entity_removed: Signal<EntitySnapshot>,
    /// Engine this query is attached to.
    attached: Cell<Option<u64>>,
}

/// A live, incrementally maintained set of entities.
///
/// Cloning the handle shares the query.
#[derive(Clone)]
pub struct Query(Rc<QueryInner>);

impl Query {
    /// Create a detached query with empty membership.
    pub fn new(predicate: impl Fn(&Entity) -> bool + 'static) -> Self {
        Self(Rc::new(QueryInner {
            predicate: Box::new(predicate),
            entities: RefCell::new(Vec::new()),
            members: RefCell::new(FxHashSet::default()),
            shadow: Entity::new(),
            snapshot: EntitySnapshot::new(),
            entity_added: Signal::new(),
            entity_removed: Signal::new(),
            attached: Cell::new(None),
        }))
    }

    /// Start building a query from component and tag terms.
    #[must_use]
    pub fn builder() -> QueryBuilder {
        QueryBuilder::new()
    }

    /// Check if both handles refer to the same query.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    // ==================== Signals ====================

    /// Fires when an entity joins the query.
    #[must_use]
    pub fn on_entity_added(&self) -> &Signal<EntitySnapshot> {
        &self.0.entity_added
    }

    /// Fires when an entity leaves the query.
    #[must_use]
    pub fn on_entity_removed(&self) -> &Signal<EntitySnapshot> {
        &self.0.entity_removed
    }

    pub(crate) fn set_signal_recursion_limit(&self, limit: Option<u32>) {
        self.0.entity_added.set_recursion_limit(limit);
        self.0.entity_removed.set_recursion_limit(limit);
    }

    // ==================== Attachment ====================

    /// Check if the query is attached to an engine.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.0.attached.get().is_some()
    }

    pub(crate) fn attached_to(&self) -> Option<u64> {
        self.0.attached.get()
    }

    pub(crate) fn set_attached(&self, engine: Option<u64>) {
        self.0.attached.set(engine);
    }

    // ==================== Membership maintenance ====================

    /// Evaluate the predicate on `entity`'s current state.
    #[must_use]
    pub fn matches(&self, entity: &Entity) -> bool {
        (self.0.predicate)(entity)
    }

    /// Silently admit every entity that currently passes.
    pub fn match_entities(&self, entities: &[Entity]) {
        for entity in entities {
            if !self.has(entity) && self.matches(entity) {
                self.admit(entity);
            }
        }
    }

    /// An entity joined the engine.
    pub fn entity_added(&self, entity: &Entity) {
        self.validate_entity(entity);
    }

    /// An entity left the engine; evict it if it is a member.
    pub fn entity_removed(&self, entity: &Entity) {
        if self.evict(entity) {
            self.notify(&self.0.entity_removed, entity, None);
        }
    }

    /// `item` was just added to `entity`.
    pub fn entity_component_added(&self, entity: &Entity, item: &Item) {
        let shadow = &self.0.shadow;
        shadow.load_state_from(entity);
        shadow.apply_silently(item, true);
        let passes = self.matches(shadow);
        shadow.reset_silently();

        let member = self.has(entity);
        if !member && passes {
            self.admit(entity);
            self.notify(&self.0.entity_added, entity, Some((item, false)));
        } else if member && !passes {
            self.evict(entity);
            self.notify(&self.0.entity_removed, entity, Some((item, false)));
        }
    }

    /// `item` was just removed from `entity`.
    pub fn entity_component_removed(&self, entity: &Entity, item: &Item) {
        let shadow = &self.0.shadow;
        shadow.load_state_from(entity);
        shadow.apply_silently(item, true);
        let before = self.matches(shadow);
        shadow.reset_silently();
        let after = self.matches(entity);

        let member = self.has(entity);
        if member && before && !after {
            self.evict(entity);
            self.notify(&self.0.entity_removed, entity, Some((item, true)));
        } else if !member && after && !before {
            self.admit(entity);
            self.notify(&self.0.entity_added, entity, Some((item, true)));
        }
    }

    /// Re-evaluate `entity` on its current state alone.
    pub fn validate_entity(&self, entity: &Entity) {
        let passes = self.matches(entity);
        let member = self.has(entity);
        if passes && !member {
            self.admit(entity);
            self.notify(&self.0.entity_added, entity, None);
        } else if !passes && member {
            self.evict(entity);
            self.notify(&self.0.entity_removed, entity, None);
        }
    }

    fn admit(&self, entity: &Entity) {
        if self.0.members.borrow_mut().insert(entity.id()) {
            trace!(entity = entity.id(), "entity admitted");
            self.0.entities.borrow_mut().push(entity.clone());
        }
    }

    fn evict(&self, entity: &Entity) -> bool {
        if !self.0.members.borrow_mut().remove(&entity.id()) {
            return false;
        }
        let mut entities = self.0.entities.borrow_mut();
        if let Some(idx) = entities.iter().position(|e| e.id() == entity.id()) {
            entities.remove(idx);
        }
        trace!(entity = entity.id(), "entity evicted");
        true
    }

    fn notify(&self, signal: &Signal<EntitySnapshot>, entity: &Entity, patch: Option<(&Item, bool)>) {
        if signal.has_handlers() {
            self.0.snapshot.capture(entity, patch);
            signal.emit(&self.0.snapshot);
        }
    }

    // ==================== Reading ====================

    /// A copy of the members, in admission order.
    #[must_use]
    pub fn entities(&self) -> Vec<Entity> {
        self.0.entities.borrow().clone()
    }

    /// Iterate over a copy of the members.
    ///
    /// Membership changes during the walk do not affect it.
    #[must_use]
    pub fn iter(&self) -> std::vec::IntoIter<Entity> {
        self.entities().into_iter()
    }

    #[must_use]
    pub fn first(&self) -> Option<Entity> {
        self.0.entities.borrow().first().cloned()
    }

    #[must_use]
    pub fn last(&self) -> Option<Entity> {
        self.0.entities.borrow().last().cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.entities.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.entities.borrow().is_empty()
    }

    /// Check membership by id.
    #[must_use]
    pub fn has(&self, entity: &Entity) -> bool {
        self.0.members.borrow().contains(&entity.id())
    }

    /// Check membership by scanning the member list.
    #[must_use]
    pub fn includes(&self, entity: &Entity) -> bool {
        self.0.entities.borrow().iter().any(|e| e == entity)
    }

    pub fn find(&self, mut predicate: impl FnMut(&Entity) -> bool) -> Option<Entity> {
        self.iter().find(|entity| predicate(entity))
    }

    pub fn filter(&self, mut predicate: impl FnMut(&Entity) -> bool) -> Vec<Entity> {
        self.iter().filter(|entity| predicate(entity)).collect()
    }

    pub fn map<R>(&self, f: impl FnMut(Entity) -> R) -> Vec<R> {
        self.iter().map(f).collect()
    }

    pub fn for_each(&self, f: impl FnMut(Entity)) {
        self.iter().for_each(f);
    }

    pub fn count_by(&self, mut predicate: impl FnMut(&Entity) -> bool) -> usize {
        self.iter().filter(|entity| predicate(entity)).count()
    }

    /// The first member whose `T` component satisfies `predicate`.
    pub fn first_by<T: Component>(&self, mut predicate: impl FnMut(&T) -> bool) -> Option<Entity> {
        self.iter().find(|entity| {
            entity
                .get::<T>()
                .is_some_and(|component| predicate(&component.borrow()))
        })
    }

    /// Silently empty the membership.
    pub fn clear(&self) {
        self.0.entities.borrow_mut().clear();
        self.0.members.borrow_mut().clear();
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("len", &self.len())
            .field("attached", &self.0.attached.get())
            .finish_non_exhaustive()
    }
}

impl IntoIterator for &Query {
    type Item = Entity;
    type IntoIter = std::vec::IntoIter<Entity>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

// ============================================================================
// QueryBuilder
// ============================================================================

/// How a key takes part in a query.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TermAccess {
    /// Entity must have the key.
    With,
    /// Entity must NOT have the key.
    Without,
}

/// A single term in a query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryTerm {
    pub key: ComponentKey,
    pub access: TermAccess,
}

/// Builds a predicate from component and tag terms.
#[derive(Clone, Debug, Default)]
pub struct QueryBuilder {
    terms: Vec<QueryTerm>,
    /// Groups of which at least one key must be present.
    any: Vec<Vec<ComponentKey>>,
}

impl QueryBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn term(mut self, key: ComponentKey, access: TermAccess) -> Self {
        self.terms.push(QueryTerm { key, access });
        self
    }

    /// Entity must have component `T`.
    #[must_use]
    pub fn with<T: Component>(self) -> Self {
        self.term(ComponentKey::of::<T>(), TermAccess::With)
    }

    /// Entity must have a component stored under `id`.
    #[must_use]
    pub fn with_id(self, id: ComponentId) -> Self {
        self.term(ComponentKey::Type(id), TermAccess::With)
    }

    /// Entity must NOT have component `T`.
    #[must_use]
    pub fn without<T: Component>(self) -> Self {
        self.term(ComponentKey::Type(component_id::<T>()), TermAccess::Without)
    }

    /// Entity must carry `tag`.
    #[must_use]
    pub fn tag(self, tag: impl Into<Tag>) -> Self {
        self.term(ComponentKey::Tag(tag.into()), TermAccess::With)
    }

    /// Entity must NOT carry `tag`.
    #[must_use]
    pub fn without_tag(self, tag: impl Into<Tag>) -> Self {
        self.term(ComponentKey::Tag(tag.into()), TermAccess::Without)
    }

    /// Entity must have at least one of `keys`.
    #[must_use]
    pub fn any(mut self, keys: impl IntoIterator<Item = ComponentKey>) -> Self {
        self.any.push(keys.into_iter().collect());
        self
    }

    /// Get the plain terms added so far.
    #[must_use]
    pub fn terms(&self) -> &[QueryTerm] {
        &self.terms
    }

    /// Evaluate the terms against `entity`.
    #[must_use]
    pub fn test(&self, entity: &Entity) -> bool {
        self.terms.iter().all(|term| {
            let present = entity.has_key(&term.key);
            match term.access {
                TermAccess::With => present,
                TermAccess::Without => !present,
            }
        }) && self.any.iter().all(|group| entity.has_any(group))
    }

    /// Build a detached query.
    #[must_use]
    pub fn build(self) -> Query {
        Query::new(move |entity| self.test(entity))
    }
}
