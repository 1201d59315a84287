//! Entities: open-ended bags of components and tags.
//!
//! An [`Entity`] is a cheap shared handle. Every structural mutation (a
//! component or tag added or removed) fires exactly one signal per instance
//! changed, synchronously, before the mutating call returns. Mutating a
//! component's fields through its [`Shared`] handle is not structural; call
//! [`Entity::invalidate`] afterwards if a query depends on those fields.

use std::{
    cell::RefCell,
    fmt,
    rc::Rc,
    sync::atomic::{AtomicU64, Ordering},
};

use sieve_signal::Signal;
use tracing::trace;

use crate::{
    FxHashMap, FxHashSet,
    component::{
        self, Component, ComponentId, ComponentRef, Shared, component_id, component_name, lookup,
    },
    error::{EcsError, EcsResult},
    key::{ComponentKey, Item, Tag},
    linked::{LinkedComponentList, LinkedIter},
};

/// Numeric entity identity. Assigned once, never reused.
pub type EntityId = u64;

static NEXT_ENTITY_ID: AtomicU64 = AtomicU64::new(1);

/// Payload of the component added/removed signals.
#[derive(Clone, Debug)]
pub struct StructuralChange {
    /// The entity that changed.
    pub entity: Entity,
    /// The single field that was added or removed.
    pub item: Item,
}

/// Storage behind an entity handle.
///
/// Linked types live only in `linked`; their visible component is the list
/// head, so the slot and the head can never disagree.
#[derive(Clone, Default)]
pub(crate) struct EntityState {
    components: FxHashMap<ComponentId, ComponentRef>,
    linked: FxHashMap<ComponentId, Rc<LinkedComponentList>>,
    tags: FxHashSet<Tag>,
}

struct EntityInner {
    id: EntityId,
    state: RefCell<EntityState>,
    component_added: Signal<StructuralChange>,
    component_removed: Signal<StructuralChange>,
    invalidation_requested: Signal<Entity>,
}

/// A shared handle to one entity.
///
/// Cloning the handle does not clone the entity. Equality and hashing are
/// by [`EntityId`].
#[derive(Clone)]
pub struct Entity(Rc<EntityInner>);

impl Default for Entity {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for Entity {}

impl std::hash::Hash for Entity {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity({})", self.0.id)
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.id)
    }
}

impl Entity {
    /// Create an empty entity with a fresh id.
    #[must_use]
    pub fn new() -> Self {
        Self(Rc::new(EntityInner {
            id: NEXT_ENTITY_ID.fetch_add(1, Ordering::Relaxed),
            state: RefCell::new(EntityState::default()),
            component_added: Signal::new(),
            component_removed: Signal::new(),
            invalidation_requested: Signal::new(),
        }))
    }

    /// Get the entity's id.
    #[must_use]
    pub fn id(&self) -> EntityId {
        self.0.id
    }

    /// Check if both handles refer to the same entity.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    // ==================== Signals ====================

    /// Fires after a component instance or tag was added.
    #[must_use]
    pub fn on_component_added(&self) -> &Signal<StructuralChange> {
        &self.0.component_added
    }

    /// Fires after a component instance or tag was removed.
    #[must_use]
    pub fn on_component_removed(&self) -> &Signal<StructuralChange> {
        &self.0.component_removed
    }

    /// Fires when [`Entity::invalidate`] asks queries to re-validate.
    #[must_use]
    pub fn on_invalidation_requested(&self) -> &Signal<Entity> {
        &self.0.invalidation_requested
    }

    pub(crate) fn set_signal_recursion_limit(&self, limit: Option<u32>) {
        self.0.component_added.set_recursion_limit(limit);
        self.0.component_removed.set_recursion_limit(limit);
        self.0.invalidation_requested.set_recursion_limit(limit);
    }

    fn emit_added(&self, item: Item) {
        trace!(entity = self.id(), key = ?item.key(), "component added");
        if self.0.component_added.has_handlers() {
            self.0.component_added.emit(&StructuralChange {
                entity: self.clone(),
                item,
            });
        }
    }

    fn emit_removed(&self, item: Item) {
        trace!(entity = self.id(), key = ?item.key(), "component removed");
        if self.0.component_removed.has_handlers() {
            self.0.component_removed.emit(&StructuralChange {
                entity: self.clone(),
                item,
            });
        }
    }

    // ==================== Adding ====================

    /// Add a component under its own type.
    ///
    /// An existing instance of a non-linked type is replaced: the removed
    /// signal fires for the old instance, then the added signal for the new
    /// one. On a linked type the instance is appended instead.
    pub fn add<T: Component>(&self, component: T) -> Shared<T> {
        let shared = Rc::new(RefCell::new(component));
        self.put(
            component_id::<T>(),
            ComponentRef::from_shared(Rc::clone(&shared)),
        );
        shared
    }

    /// Add a component stored under `R`'s type.
    ///
    /// `R` must be `T` itself or a registered ancestor of `T`.
    pub fn add_as<T: Component, R: Component>(&self, component: T) -> EcsResult<Shared<T>> {
        let id = resolve(component_id::<T>(), Some(component_id::<R>()))?;
        let shared = Rc::new(RefCell::new(component));
        self.put(id, ComponentRef::from_shared(Rc::clone(&shared)));
        Ok(shared)
    }

    /// Add an existing instance under its own type.
    ///
    /// Re-adding the instance already stored is a no-op.
    pub fn add_ref(&self, instance: impl Into<ComponentRef>) {
        let instance = instance.into();
        self.put(instance.id(), instance);
    }

    /// Add an existing instance under `resolve`.
    pub fn add_ref_as(&self, instance: impl Into<ComponentRef>, resolve: ComponentId) -> EcsResult<()> {
        let instance = instance.into();
        let id = self::resolve(instance.id(), Some(resolve))?;
        self.put(id, instance);
        Ok(())
    }

    /// Set a tag. Returns `true` if it was not set before.
    pub fn add_tag(&self, tag: impl Into<Tag>) -> EcsResult<bool> {
        let tag = tag.into();
        if tag.is_empty_str() {
            return Err(EcsError::InvalidComponent("empty tag"));
        }

        let inserted = self.0.state.borrow_mut().tags.insert(tag.clone());
        if inserted {
            self.emit_added(Item::Tag(tag));
        }
        Ok(inserted)
    }

    /// Append a component to the tail of its type's list.
    ///
    /// On a non-linked type this is [`Entity::add`].
    pub fn append<T: Component>(&self, component: T) -> Shared<T> {
        // A fresh instance is never a duplicate.
        self.add(component)
    }

    /// Append a component under `R`'s type.
    pub fn append_as<T: Component, R: Component>(&self, component: T) -> EcsResult<Shared<T>> {
        self.add_as::<T, R>(component)
    }

    /// Append an existing instance.
    ///
    /// Fails with [`EcsError::DuplicateAppend`] if the instance is already in
    /// the list.
    pub fn append_ref(&self, instance: impl Into<ComponentRef>) -> EcsResult<()> {
        let instance = instance.into();
        let id = instance.id();
        if !component::is_linked(id) {
            self.put(id, instance);
            return Ok(());
        }

        let list = self.linked_or_insert(id);
        if !list.add(instance.clone()) {
            return Err(EcsError::DuplicateAppend {
                component: component_name(id),
                entity: self.id(),
            });
        }
        self.emit_added(Item::Component { id, instance });
        Ok(())
    }

    fn linked_or_insert(&self, id: ComponentId) -> Rc<LinkedComponentList> {
        let mut state = self.0.state.borrow_mut();
        Rc::clone(state.linked.entry(id).or_default())
    }

    fn put(&self, id: ComponentId, instance: ComponentRef) {
        if component::is_linked(id) {
            let list = self.linked_or_insert(id);
            if list.add(instance.clone()) {
                self.emit_added(Item::Component { id, instance });
            }
            return;
        }

        let replaced = {
            let mut state = self.0.state.borrow_mut();
            if state
                .components
                .get(&id)
                .is_some_and(|existing| existing.ptr_eq(&instance))
            {
                return;
            }
            state.components.remove(&id)
        };

        // The old instance is gone before its removed signal fires.
        if let Some(old) = replaced {
            self.emit_removed(Item::Component { id, instance: old });
        }
        self.0
            .state
            .borrow_mut()
            .components
            .insert(id, instance.clone());
        self.emit_added(Item::Component { id, instance });
    }

    // ==================== Removing ====================

    /// Remove every instance stored under `T`.
    ///
    /// Returns the removed instance, or the former head for linked types.
    pub fn remove<T: Component>(&self) -> Option<ComponentRef> {
        self.remove_id(lookup::<T>()?)
    }

    /// Remove every instance stored under `id`.
    ///
    /// Linked lists are drained head first, firing the removed signal once
    /// per instance.
    pub fn remove_id(&self, id: ComponentId) -> Option<ComponentRef> {
        let list = self.0.state.borrow().linked.get(&id).cloned();
        let Some(list) = list else {
            let removed = self.0.state.borrow_mut().components.remove(&id)?;
            self.emit_removed(Item::Component {
                id,
                instance: removed.clone(),
            });
            return Some(removed);
        };

        let first = list.head();
        while let Some(head) = list.head() {
            self.unlink(id, &list, &head);
        }
        first
    }

    /// Remove only the head instance stored under `T`.
    pub fn withdraw<T: Component>(&self) -> Option<ComponentRef> {
        self.withdraw_id(lookup::<T>()?)
    }

    /// Remove only the head instance stored under `id`.
    pub fn withdraw_id(&self, id: ComponentId) -> Option<ComponentRef> {
        let list = self.0.state.borrow().linked.get(&id).cloned();
        let Some(list) = list else {
            return self.remove_id(id);
        };

        let head = list.head()?;
        self.unlink(id, &list, &head);
        Some(head)
    }

    /// Remove one specific instance, wherever it sits.
    ///
    /// Every id the instance may be stored under is checked. Linked lists are
    /// searched by identity; a non-linked slot holds at most one instance, so
    /// picking there removes whatever occupies it. Returns `true` if
    /// something was removed.
    pub fn pick(&self, instance: &ComponentRef) -> bool {
        for id in component::resolution_chain(instance.id()) {
            let list = self.0.state.borrow().linked.get(&id).cloned();
            if let Some(list) = list {
                if list.contains(instance) {
                    self.unlink(id, &list, instance);
                    return true;
                }
                continue;
            }

            let found = self.0.state.borrow_mut().components.remove(&id);
            if let Some(removed) = found {
                self.emit_removed(Item::Component {
                    id,
                    instance: removed,
                });
                return true;
            }
        }
        false
    }

    fn unlink(&self, id: ComponentId, list: &Rc<LinkedComponentList>, instance: &ComponentRef) {
        if !list.remove(instance) {
            return;
        }
        if list.is_empty() {
            let mut state = self.0.state.borrow_mut();
            if state
                .linked
                .get(&id)
                .is_some_and(|current| Rc::ptr_eq(current, list))
            {
                state.linked.remove(&id);
            }
        }
        self.emit_removed(Item::Component {
            id,
            instance: instance.clone(),
        });
    }

    /// Clear a tag. Returns `true` if it was set.
    pub fn remove_tag(&self, tag: impl Into<Tag>) -> bool {
        let tag = tag.into();
        let removed = self.0.state.borrow_mut().tags.remove(&tag);
        if removed {
            self.emit_removed(Item::Tag(tag));
        }
        removed
    }

    /// Remove whatever `key` names. Returns `true` if anything was removed.
    pub fn remove_key(&self, key: &ComponentKey) -> bool {
        match key {
            ComponentKey::Type(id) => self.remove_id(*id).is_some(),
            ComponentKey::Tag(tag) => self.remove_tag(tag.clone()),
        }
    }

    /// Remove every component instance and tag, firing removed for each.
    pub fn clear(&self) {
        let (ids, tags) = {
            let state = self.0.state.borrow();
            let mut ids: Vec<ComponentId> = state
                .components
                .keys()
                .chain(state.linked.keys())
                .copied()
                .collect();
            ids.sort_unstable();
            let tags: Vec<Tag> = state.tags.iter().cloned().collect();
            (ids, tags)
        };

        for id in ids {
            self.remove_id(id);
        }
        for tag in tags {
            self.remove_tag(tag);
        }
    }

    // ==================== Presence ====================

    /// Check for a component stored under `T`. Never registers `T`.
    #[must_use]
    pub fn has<T: Component>(&self) -> bool {
        lookup::<T>().is_some_and(|id| self.has_id(id))
    }

    #[must_use]
    pub fn has_id(&self, id: ComponentId) -> bool {
        let state = self.0.state.borrow();
        state.components.contains_key(&id)
            || state.linked.get(&id).is_some_and(|list| !list.is_empty())
    }

    #[must_use]
    pub fn has_tag(&self, tag: impl Into<Tag>) -> bool {
        self.0.state.borrow().tags.contains(&tag.into())
    }

    #[must_use]
    pub fn has_key(&self, key: &ComponentKey) -> bool {
        match key {
            ComponentKey::Type(id) => self.has_id(*id),
            ComponentKey::Tag(tag) => self.0.state.borrow().tags.contains(tag),
        }
    }

    /// Check if at least one key is present. `false` for an empty slice.
    #[must_use]
    pub fn has_any(&self, keys: &[ComponentKey]) -> bool {
        keys.iter().any(|key| self.has_key(key))
    }

    /// Check if every key is present. `true` for an empty slice.
    #[must_use]
    pub fn has_all(&self, keys: &[ComponentKey]) -> bool {
        keys.iter().all(|key| self.has_key(key))
    }

    // ==================== Access ====================

    /// Get the instance stored under `T`, or the head for linked types.
    ///
    /// Returns `None` when the stored instance is of a different concrete
    /// type (stored with [`Entity::add_as`]); use [`Entity::get_ref`] then.
    #[must_use]
    pub fn get<T: Component>(&self) -> Option<Shared<T>> {
        self.get_ref(lookup::<T>()?)?.downcast::<T>()
    }

    /// Get the erased instance stored under `id`, or the head.
    #[must_use]
    pub fn get_ref(&self, id: ComponentId) -> Option<ComponentRef> {
        let state = self.0.state.borrow();
        match state.linked.get(&id) {
            Some(list) => list.head(),
            None => state.components.get(&id).cloned(),
        }
    }

    /// Walk every instance stored under `id`.
    ///
    /// Non-linked types yield at most one instance.
    #[must_use]
    pub fn iter_ref(&self, id: ComponentId) -> ComponentIter {
        let state = self.0.state.borrow();
        let inner = match state.linked.get(&id) {
            Some(list) => IterInner::Linked(list.iter()),
            None => IterInner::Single(state.components.get(&id).cloned()),
        };
        ComponentIter(inner)
    }

    /// Walk every instance of `T` stored under `T`.
    pub fn iterate<T: Component>(&self) -> impl Iterator<Item = Shared<T>> + use<T> {
        let iter = match lookup::<T>() {
            Some(id) => self.iter_ref(id),
            None => ComponentIter(IterInner::Single(None)),
        };
        iter.filter_map(|instance| instance.downcast::<T>())
    }

    /// Collect every instance of `T`.
    #[must_use]
    pub fn get_all<T: Component>(&self) -> Vec<Shared<T>> {
        self.iterate::<T>().collect()
    }

    /// Find the first instance of `T` matching `predicate`.
    pub fn find<T: Component>(&self, mut predicate: impl FnMut(&T) -> bool) -> Option<Shared<T>> {
        self.iterate::<T>()
            .find(|shared| predicate(&shared.borrow()))
    }

    /// Count the instances stored under `T`.
    #[must_use]
    pub fn length_of<T: Component>(&self) -> usize {
        lookup::<T>().map_or(0, |id| self.iter_ref(id).count())
    }

    /// The visible component of every occupied slot, ordered by id.
    #[must_use]
    pub fn components(&self) -> Vec<(ComponentId, ComponentRef)> {
        let state = self.0.state.borrow();
        let mut out: Vec<(ComponentId, ComponentRef)> = state
            .components
            .iter()
            .map(|(&id, instance)| (id, instance.clone()))
            .chain(
                state
                    .linked
                    .iter()
                    .filter_map(|(&id, list)| Some((id, list.head()?))),
            )
            .collect();
        out.sort_unstable_by_key(|(id, _)| *id);
        out
    }

    /// Every tag currently set.
    #[must_use]
    pub fn tags(&self) -> Vec<Tag> {
        self.0.state.borrow().tags.iter().cloned().collect()
    }

    /// The linked list stored under `id`, if any.
    #[must_use]
    pub fn linked_list(&self, id: ComponentId) -> Option<Rc<LinkedComponentList>> {
        self.0.state.borrow().linked.get(&id).cloned()
    }

    // ==================== State transfer ====================

    /// Ask attached queries to re-evaluate this entity.
    ///
    /// Needed after mutating component fields in place.
    pub fn invalidate(&self) {
        if self.0.invalidation_requested.has_handlers() {
            self.0.invalidation_requested.emit(self);
        }
    }

    /// Replace this entity's state with `other`'s.
    ///
    /// Component instances and linked lists are shared, not cloned. No
    /// added/removed signals fire; invalidation is requested instead.
    pub fn copy_from(&self, other: &Entity) {
        if self.ptr_eq(other) {
            return;
        }
        self.load_state_from(other);
        self.invalidate();
    }

    /// Silently overwrite this entity's state with `other`'s.
    pub(crate) fn load_state_from(&self, other: &Entity) {
        let state = other.0.state.borrow().clone();
        *self.0.state.borrow_mut() = state;
    }

    /// Silently drop every component and tag.
    pub(crate) fn reset_silently(&self) {
        *self.0.state.borrow_mut() = EntityState::default();
    }

    /// Silently set (`present`) or clear one field.
    ///
    /// Linked lists are copied before being changed, so a list shared with a
    /// live entity is never touched.
    pub(crate) fn apply_silently(&self, item: &Item, present: bool) {
        let mut state = self.0.state.borrow_mut();
        match item {
            Item::Component { id, instance } if component::is_linked(*id) => {
                let list = state
                    .linked
                    .get(id)
                    .map_or_else(LinkedComponentList::new, |list| list.duplicate());
                if present {
                    // A removed linked instance is re-applied where removals
                    // start: at the head.
                    list.push_front(instance.clone());
                } else {
                    list.remove(instance);
                }
                if list.is_empty() {
                    state.linked.remove(id);
                } else {
                    state.linked.insert(*id, Rc::new(list));
                }
            }
            Item::Component { id, instance } => {
                if present {
                    state.components.insert(*id, instance.clone());
                } else if state
                    .components
                    .get(id)
                    .is_some_and(|existing| existing.ptr_eq(instance))
                {
                    state.components.remove(id);
                }
            }
            Item::Tag(tag) => {
                if present {
                    state.tags.insert(tag.clone());
                } else {
                    state.tags.remove(tag);
                }
            }
        }
    }
}

fn resolve(own: ComponentId, resolve: Option<ComponentId>) -> EcsResult<ComponentId> {
    match resolve {
        None => Ok(own),
        Some(target) if component::resolves_as(own, target) => Ok(target),
        Some(target) => Err(EcsError::ResolveMismatch {
            component: component_name(own),
            resolve: component_name(target),
        }),
    }
}

/// Iterator over the instances stored under one id.
pub struct ComponentIter(IterInner);

enum IterInner {
    Single(Option<ComponentRef>),
    Linked(LinkedIter),
}

impl Iterator for ComponentIter {
    type Item = ComponentRef;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.0 {
            IterInner::Single(slot) => slot.take(),
            IterInner::Linked(iter) => iter.next(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use sieve_signal::Handler;

    use super::*;
    use crate::component::{register_ancestor, register_linked};

    struct Health(u32);
    struct Armor(u32);

    #[derive(Debug, PartialEq, Eq)]
    struct Buff(&'static str);

    /// Records `+name` / `-name` for every structural change.
    fn record(entity: &Entity) -> Rc<RefCell<Vec<String>>> {
        let log = Rc::new(RefCell::new(Vec::new()));

        let added: Handler<StructuralChange> = {
            let log = Rc::clone(&log);
            Rc::new(move |change: &StructuralChange| {
                log.borrow_mut().push(format!("+{}", describe(&change.item)));
            })
        };
        let removed: Handler<StructuralChange> = {
            let log = Rc::clone(&log);
            Rc::new(move |change: &StructuralChange| {
                log.borrow_mut().push(format!("-{}", describe(&change.item)));
            })
        };
        entity.on_component_added().connect(added, 0);
        entity.on_component_removed().connect(removed, 0);
        log
    }

    fn describe(item: &Item) -> String {
        match item {
            Item::Component { instance, .. } => {
                if let Some(buff) = instance.downcast::<Buff>() {
                    return buff.borrow().0.to_owned();
                }
                if let Some(health) = instance.downcast::<Health>() {
                    return format!("hp{}", health.borrow().0);
                }
                instance.type_name().to_owned()
            }
            Item::Tag(tag) => tag.to_string(),
        }
    }

    #[test]
    fn test_ids_are_unique_and_increasing() {
        let a = Entity::new();
        let b = Entity::new();
        assert!(b.id() > a.id());
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn test_add_and_get() {
        let entity = Entity::new();
        let health = entity.add(Health(10));

        assert!(entity.has::<Health>());
        assert!(!entity.has::<Armor>());
        assert_eq!(entity.get::<Health>().unwrap().borrow().0, 10);

        health.borrow_mut().0 = 7;
        assert_eq!(entity.get::<Health>().unwrap().borrow().0, 7);
    }

    #[test]
    fn test_replace_fires_removed_then_added() {
        let entity = Entity::new();
        let log = record(&entity);

        entity.add(Health(1));
        entity.add(Health(2));

        assert_eq!(*log.borrow(), ["+hp1", "-hp1", "+hp2"]);
        assert_eq!(entity.get::<Health>().unwrap().borrow().0, 2);
    }

    #[test]
    fn test_replaced_component_is_gone_while_removed_fires() {
        let entity = Entity::new();
        entity.add(Health(1));

        let seen = Rc::new(RefCell::new(Vec::new()));
        let handler: Handler<StructuralChange> = {
            let seen = Rc::clone(&seen);
            Rc::new(move |change: &StructuralChange| {
                seen.borrow_mut().push(change.entity.has::<Health>());
            })
        };
        entity.on_component_removed().connect(handler, 0);

        entity.add(Health(2));
        assert_eq!(*seen.borrow(), [false]);
        assert_eq!(entity.get::<Health>().unwrap().borrow().0, 2);
    }

    #[test]
    fn test_readd_same_instance_is_noop() {
        let entity = Entity::new();
        let health = entity.add(Health(1));
        let log = record(&entity);

        entity.add_ref(Rc::clone(&health));
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_has_never_registers() {
        struct NeverAdded;

        let entity = Entity::new();
        assert!(!entity.has::<NeverAdded>());
        assert!(lookup::<NeverAdded>().is_none());
        assert!(entity.remove::<NeverAdded>().is_none());
        assert_eq!(entity.length_of::<NeverAdded>(), 0);
    }

    #[test]
    fn test_tags() {
        let entity = Entity::new();
        let log = record(&entity);

        assert_eq!(entity.add_tag("enemy"), Ok(true));
        assert_eq!(entity.add_tag("enemy"), Ok(false));
        assert_eq!(entity.add_tag(3_i64), Ok(true));
        assert!(entity.has_tag("enemy"));
        assert!(entity.has_tag(3_i64));
        assert!(!entity.has_tag("3"));

        assert!(entity.remove_tag("enemy"));
        assert!(!entity.remove_tag("enemy"));
        assert_eq!(*log.borrow(), ["+\"enemy\"", "+3", "-\"enemy\""]);
        assert_eq!(entity.tags(), [Tag::Int(3)]);
    }

    #[test]
    fn test_empty_tag_is_rejected() {
        let entity = Entity::new();
        assert_eq!(
            entity.add_tag(""),
            Err(EcsError::InvalidComponent("empty tag"))
        );
        assert!(entity.tags().is_empty());
    }

    #[test]
    fn test_has_any_and_has_all() {
        let entity = Entity::new();
        entity.add(Health(1));
        entity.add_tag("boss").unwrap();

        let health = ComponentKey::of::<Health>();
        let armor = ComponentKey::of::<Armor>();
        let boss = ComponentKey::tag("boss");

        assert!(entity.has_all(&[health.clone(), boss.clone()]));
        assert!(!entity.has_all(&[health.clone(), armor.clone()]));
        assert!(entity.has_any(&[armor.clone(), boss]));
        assert!(!entity.has_any(&[armor]));
        assert!(entity.has_all(&[]));
        assert!(!entity.has_any(&[]));
        assert!(entity.has_key(&health));
    }

    #[test]
    fn test_linked_append_and_fifo_withdraw() {
        let id = register_linked::<Buff>();
        let entity = Entity::new();
        let log = record(&entity);

        entity.add(Buff("a"));
        entity.append(Buff("b"));
        entity.append(Buff("c"));

        assert_eq!(entity.length_of::<Buff>(), 3);
        assert_eq!(*entity.get::<Buff>().unwrap().borrow(), Buff("a"));

        let order: Vec<_> = entity.iterate::<Buff>().map(|b| b.borrow().0).collect();
        assert_eq!(order, ["a", "b", "c"]);

        let first = entity.withdraw::<Buff>().unwrap();
        assert_eq!(*first.downcast::<Buff>().unwrap().borrow(), Buff("a"));
        assert_eq!(*entity.get::<Buff>().unwrap().borrow(), Buff("b"));
        assert!(entity.get_ref(id).is_some());

        assert_eq!(*log.borrow(), ["+a", "+b", "+c", "-a"]);
    }

    #[test]
    fn test_linked_remove_drains_head_first() {
        #[derive(Debug)]
        struct Stack(u8);
        register_linked::<Stack>();

        let entity = Entity::new();
        for n in 0..3 {
            entity.append(Stack(n));
        }

        let removed = Rc::new(RefCell::new(Vec::new()));
        let handler: Handler<StructuralChange> = {
            let removed = Rc::clone(&removed);
            Rc::new(move |change: &StructuralChange| {
                let instance = change.item.instance().unwrap();
                removed
                    .borrow_mut()
                    .push(instance.downcast::<Stack>().unwrap().borrow().0);
            })
        };
        entity.on_component_removed().connect(handler, 0);

        let head = entity.remove::<Stack>().unwrap();
        assert_eq!(head.downcast::<Stack>().unwrap().borrow().0, 0);
        assert_eq!(*removed.borrow(), [0, 1, 2]);
        assert!(!entity.has::<Stack>());
        assert!(entity.linked_list(component_id::<Stack>()).is_none());
    }

    #[test]
    fn test_duplicate_append_fails() {
        struct Link;
        register_linked::<Link>();

        let entity = Entity::new();
        let shared = entity.append(Link);

        let err = entity.append_ref(Rc::clone(&shared)).unwrap_err();
        assert_eq!(err, EcsError::DuplicateAppend {
            component: component_name(component_id::<Link>()),
            entity: entity.id(),
        });
        // Plain add of the same instance is a silent no-op.
        entity.add_ref(shared);
        assert_eq!(entity.length_of::<Link>(), 1);
    }

    #[test]
    fn test_pick_removes_specific_instance() {
        struct Charm(u8);
        register_linked::<Charm>();

        let entity = Entity::new();
        let a = ComponentRef::new(Charm(1));
        let b = ComponentRef::new(Charm(2));
        let c = ComponentRef::new(Charm(3));
        for charm in [&a, &b, &c] {
            entity.append_ref(charm.clone()).unwrap();
        }

        assert!(entity.pick(&b));
        assert!(!entity.pick(&b));
        let left: Vec<_> = entity.iterate::<Charm>().map(|c| c.borrow().0).collect();
        assert_eq!(left, [1, 3]);

        // Non-linked types degenerate to remove.
        let health = ComponentRef::new(Health(5));
        entity.add_ref(health.clone());
        assert!(entity.pick(&ComponentRef::new(Health(5))));
        assert!(!entity.has::<Health>());
        assert!(!entity.pick(&health));
    }

    #[test]
    fn test_add_as_ancestor() {
        struct Shape;
        struct Square(u32);
        let shape = register_ancestor::<Square, Shape>();

        let entity = Entity::new();
        entity.add_as::<Square, Shape>(Square(4)).unwrap();

        assert!(entity.has::<Shape>());
        assert!(!entity.has::<Square>());
        // Stored instance is a Square, not a Shape.
        assert!(entity.get::<Shape>().is_none());
        let stored = entity.get_ref(shape).unwrap();
        assert_eq!(stored.downcast::<Square>().unwrap().borrow().0, 4);

        assert!(entity.pick(&stored));
        assert!(!entity.has::<Shape>());
    }

    #[test]
    fn test_add_as_unrelated_type_fails() {
        #[derive(Debug)]
        struct Wheel;
        struct Engine;

        let entity = Entity::new();
        let err = entity.add_as::<Wheel, Engine>(Wheel).unwrap_err();
        assert!(matches!(err, EcsError::ResolveMismatch { .. }));
        assert!(!entity.has::<Wheel>());
        assert!(!entity.has::<Engine>());
    }

    #[test]
    fn test_copy_from_shares_linked_lists_and_requests_invalidation() {
        #[derive(Debug)]
        struct Note(u8);
        let note = register_linked::<Note>();

        let source = Entity::new();
        source.add(Health(3));
        source.append(Note(1));
        source.add_tag("copied").unwrap();

        let target = Entity::new();
        let log = record(&target);
        let invalidated = Rc::new(Cell::new(0));
        let handler: Handler<Entity> = {
            let invalidated = Rc::clone(&invalidated);
            Rc::new(move |_: &Entity| invalidated.set(invalidated.get() + 1))
        };
        target.on_invalidation_requested().connect(handler, 0);

        target.copy_from(&source);

        assert!(log.borrow().is_empty());
        assert_eq!(invalidated.get(), 1);
        assert!(target.has::<Health>());
        assert!(target.has_tag("copied"));
        assert!(Rc::ptr_eq(
            &target.linked_list(note).unwrap(),
            &source.linked_list(note).unwrap()
        ));

        // Shared: appending through the source is visible on the target.
        source.append(Note(2));
        assert_eq!(target.length_of::<Note>(), 2);
    }

    #[test]
    fn test_clear_removes_everything() {
        let entity = Entity::new();
        entity.add(Health(1));
        entity.add(Armor(2));
        entity.add_tag("x").unwrap();
        let log = record(&entity);

        entity.clear();

        assert_eq!(log.borrow().len(), 3);
        assert!(entity.components().is_empty());
        assert!(entity.tags().is_empty());
    }

    #[test]
    fn test_find_and_get_all() {
        #[derive(Debug)]
        struct Item2(u8);
        register_linked::<Item2>();

        let entity = Entity::new();
        for n in [4, 8, 15] {
            entity.append(Item2(n));
        }

        let found = entity.find::<Item2>(|item| item.0 > 5).unwrap();
        assert_eq!(found.borrow().0, 8);
        assert!(entity.find::<Item2>(|item| item.0 > 100).is_none());
        assert_eq!(entity.get_all::<Item2>().len(), 3);
    }

    #[test]
    fn test_handler_may_mutate_entity() {
        let entity = Entity::new();
        let handler: Handler<StructuralChange> = Rc::new(|change: &StructuralChange| {
            if change.item.instance().is_some_and(|c| c.is::<Health>()) {
                change.entity.add(Armor(1));
            }
        });
        entity.on_component_added().connect(handler, 0);

        entity.add(Health(1));
        assert!(entity.has::<Armor>());
    }

    #[test]
    fn test_apply_silently_leaves_shared_list_alone() {
        #[derive(Debug)]
        struct Mark(u8);
        let mark = register_linked::<Mark>();

        let live = Entity::new();
        live.append(Mark(1));
        let instance = live.get_ref(mark).unwrap();

        let scratch = Entity::new();
        scratch.load_state_from(&live);
        scratch.apply_silently(
            &Item::Component {
                id: mark,
                instance,
            },
            false,
        );

        assert!(!scratch.has_id(mark));
        assert!(live.has_id(mark));
        assert_eq!(live.length_of::<Mark>(), 1);
    }
}
