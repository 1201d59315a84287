//! Engine - owns entities, queries and systems and routes changes between them.
//!
//! Adding an entity connects its structural signals to the engine's router.
//! The router fans every change out to each attached query, which updates
//! its membership incrementally. Systems are driven in priority order by
//! [`Engine::update`] and its siblings.
//!
//! The shared configuration entity is created with the engine and stays in
//! it for the engine's whole life; use it for global state.
//!
//! ```ignore
//! let engine = Engine::new();
//! engine.shared_config().add(TickRate(20));
//!
//! let players = Query::builder().tag("player").build();
//! engine.add_query(&players);
//!
//! let steve = Entity::new();
//! steve.add_tag("player")?;
//! engine.add_entity(&steve);
//! assert!(players.has(&steve));
//! ```

use std::{
    any::Any,
    cell::RefCell,
    fmt,
    rc::{Rc, Weak},
    sync::atomic::{AtomicU64, Ordering},
};

use sieve_signal::{Handler, Priority, Signal};
use tracing::{debug, trace};

use crate::{
    FxHashMap,
    bus::{MessageBus, MessageHandler, Topic},
    config::EngineConfig,
    entity::{Entity, EntityId, StructuralChange},
    query::Query,
    system::{System, SystemContext, SystemEntry},
};

static NEXT_ENGINE_ID: AtomicU64 = AtomicU64::new(1);

/// Handlers the engine connects to every entity it owns.
struct Router {
    component_added: Handler<StructuralChange>,
    component_removed: Handler<StructuralChange>,
    invalidation_requested: Handler<Entity>,
}

impl Router {
    fn new(engine: &Weak<EngineInner>) -> Self {
        let component_added: Handler<StructuralChange> = {
            let engine = engine.clone();
            Rc::new(move |change: &StructuralChange| {
                if let Some(engine) = engine.upgrade() {
                    Engine(engine).route(&change.entity, |query| {
                        query.entity_component_added(&change.entity, &change.item);
                    });
                }
            })
        };
        let component_removed: Handler<StructuralChange> = {
            let engine = engine.clone();
            Rc::new(move |change: &StructuralChange| {
                if let Some(engine) = engine.upgrade() {
                    Engine(engine).route(&change.entity, |query| {
                        query.entity_component_removed(&change.entity, &change.item);
                    });
                }
            })
        };
        let invalidation_requested: Handler<Entity> = {
            let engine = engine.clone();
            Rc::new(move |entity: &Entity| {
                if let Some(engine) = engine.upgrade() {
                    Engine(engine).route(entity, |query| query.validate_entity(entity));
                }
            })
        };
        Self {
            component_added,
            component_removed,
            invalidation_requested,
        }
    }

    fn connect(&self, entity: &Entity) {
        entity
            .on_component_added()
            .connect(Rc::clone(&self.component_added), Priority::LAST);
        entity
            .on_component_removed()
            .connect(Rc::clone(&self.component_removed), Priority::LAST);
        entity
            .on_invalidation_requested()
            .connect(Rc::clone(&self.invalidation_requested), Priority::FIRST);
    }

    fn disconnect(&self, entity: &Entity) {
        entity.on_component_added().disconnect(&self.component_added);
        entity
            .on_component_removed()
            .disconnect(&self.component_removed);
        entity
            .on_invalidation_requested()
            .disconnect(&self.invalidation_requested);
    }
}

pub(crate) struct EngineInner {
    id: u64,
    config: EngineConfig,
    weak: Weak<EngineInner>,
    /// Entities in the order they were added.
    entities: RefCell<Vec<Entity>>,
    index: RefCell<FxHashMap<EntityId, Entity>>,
    queries: RefCell<Vec<Query>>,
    /// Sorted by priority, ties in insertion order.
    systems: RefCell<Vec<SystemEntry>>,
    /// Removed systems whose removal hook waits for them to be unborrowed.
    pending_removals: RefCell<Vec<SystemEntry>>,
    bus: RefCell<MessageBus>,
    shared_config: Entity,
    router: Router,
    entity_added: Signal<Entity>,
    entity_removed: Signal<Entity>,
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        for entity in self.entities.get_mut().iter() {
            self.router.disconnect(entity);
        }
        for query in self.queries.get_mut().iter() {
            query.set_attached(None);
        }
        for entry in self.systems.get_mut().iter() {
            entry.ctx.detach();
        }
    }
}

/// The reactive index: entities, the queries over them, and the systems
/// reading those queries.
///
/// Cloning the handle shares the engine.
#[derive(Clone)]
pub struct Engine(Rc<EngineInner>);

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// Create an engine with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Create an engine with the given settings.
    #[must_use]
    pub fn with_config(config: EngineConfig) -> Self {
        let inner = Rc::new_cyclic(|weak| EngineInner {
            id: NEXT_ENGINE_ID.fetch_add(1, Ordering::Relaxed),
            config,
            weak: weak.clone(),
            entities: RefCell::new(Vec::with_capacity(config.entity_capacity)),
            index: RefCell::new(FxHashMap::with_capacity_and_hasher(
                config.entity_capacity,
                Default::default(),
            )),
            queries: RefCell::new(Vec::with_capacity(config.query_capacity)),
            systems: RefCell::new(Vec::with_capacity(config.system_capacity)),
            pending_removals: RefCell::new(Vec::new()),
            bus: RefCell::new(MessageBus::new()),
            shared_config: Entity::new(),
            router: Router::new(weak),
            entity_added: Signal::new(),
            entity_removed: Signal::new(),
        });

        inner.entity_added.set_recursion_limit(config.signal_recursion_limit);
        inner
            .entity_removed
            .set_recursion_limit(config.signal_recursion_limit);

        let engine = Self(inner);
        let shared_config = engine.shared_config();
        engine.add_entity(&shared_config);
        debug!(engine = engine.0.id, "engine created");
        engine
    }

    pub(crate) fn from_inner(inner: Rc<EngineInner>) -> Self {
        Self(inner)
    }

    /// Check if both handles refer to the same engine.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// The settings this engine was built with.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.0.config
    }

    /// The shared configuration entity. It can never be removed.
    #[must_use]
    pub fn shared_config(&self) -> Entity {
        self.0.shared_config.clone()
    }

    /// Fires after an entity joined the engine.
    #[must_use]
    pub fn on_entity_added(&self) -> &Signal<Entity> {
        &self.0.entity_added
    }

    /// Fires after an entity left the engine.
    #[must_use]
    pub fn on_entity_removed(&self) -> &Signal<Entity> {
        &self.0.entity_removed
    }

    /// Run `f` for every query attached here, while `entity` is still here.
    fn route(&self, entity: &Entity, f: impl Fn(&Query)) {
        let queries = self.0.queries.borrow().clone();
        for query in &queries {
            if !self.contains(entity) {
                return;
            }
            if query.attached_to() == Some(self.0.id) {
                f(query);
            }
        }
    }

    // ==================== Entities ====================

    /// Add an entity. Returns `false` if it is already here.
    ///
    /// Every attached query evaluates the entity, then `on_entity_added`
    /// fires.
    pub fn add_entity(&self, entity: &Entity) -> bool {
        if self.contains(entity) {
            return false;
        }

        if let Some(limit) = self.0.config.signal_recursion_limit {
            entity.set_signal_recursion_limit(Some(limit));
        }
        self.0.entities.borrow_mut().push(entity.clone());
        self.0.index.borrow_mut().insert(entity.id(), entity.clone());
        self.0.router.connect(entity);
        trace!(entity = entity.id(), "entity added");

        self.route(entity, |query| query.entity_added(entity));

        if self.0.entity_added.has_handlers() {
            self.0.entity_added.emit(entity);
        }
        true
    }

    /// Add several entities. Returns how many were new.
    pub fn add_entities(&self, entities: &[Entity]) -> usize {
        entities
            .iter()
            .filter(|entity| self.add_entity(entity))
            .count()
    }

    /// Remove an entity. Returns `false` if it was not here or is the shared
    /// configuration entity.
    ///
    /// The entity lives on, disconnected; queries evict it first, then
    /// `on_entity_removed` fires.
    pub fn remove_entity(&self, entity: &Entity) -> bool {
        if entity.ptr_eq(&self.0.shared_config) {
            return false;
        }
        if self.0.index.borrow_mut().remove(&entity.id()).is_none() {
            return false;
        }
        {
            let mut entities = self.0.entities.borrow_mut();
            if let Some(idx) = entities.iter().position(|e| e == entity) {
                entities.remove(idx);
            }
        }
        self.0.router.disconnect(entity);
        if self.0.config.signal_recursion_limit.is_some() {
            entity.set_signal_recursion_limit(None);
        }
        trace!(entity = entity.id(), "entity removed");

        let queries = self.0.queries.borrow().clone();
        for query in &queries {
            if query.attached_to() == Some(self.0.id) {
                query.entity_removed(entity);
            }
        }

        if self.0.entity_removed.has_handlers() {
            self.0.entity_removed.emit(entity);
        }
        true
    }

    /// Remove several entities. Returns how many were removed.
    pub fn remove_entities(&self, entities: &[Entity]) -> usize {
        entities
            .iter()
            .filter(|entity| self.remove_entity(entity))
            .count()
    }

    /// Remove every entity except the shared configuration entity.
    pub fn remove_all_entities(&self) {
        for entity in self.entities() {
            self.remove_entity(&entity);
        }
    }

    #[must_use]
    pub fn contains(&self, entity: &Entity) -> bool {
        self.0
            .index
            .borrow()
            .get(&entity.id())
            .is_some_and(|owned| owned.ptr_eq(entity))
    }

    #[must_use]
    pub fn get_entity_by_id(&self, id: EntityId) -> Option<Entity> {
        self.0.index.borrow().get(&id).cloned()
    }

    /// A copy of every entity, in the order they were added.
    #[must_use]
    pub fn entities(&self) -> Vec<Entity> {
        self.0.entities.borrow().clone()
    }

    /// Number of entities, the shared configuration entity included.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.0.entities.borrow().len()
    }

    // ==================== Queries ====================

    /// Attach a query and match it against every entity, silently.
    ///
    /// Returns `false` if the query is already attached to any engine.
    pub fn add_query(&self, query: &Query) -> bool {
        if query.is_attached() {
            return false;
        }

        query.set_attached(Some(self.0.id));
        if let Some(limit) = self.0.config.signal_recursion_limit {
            query.set_signal_recursion_limit(Some(limit));
        }
        self.0.queries.borrow_mut().push(query.clone());
        query.match_entities(&self.entities());
        debug!(engine = self.0.id, matched = query.len(), "query added");
        true
    }

    /// Detach a query and clear its membership.
    pub fn remove_query(&self, query: &Query) -> bool {
        if query.attached_to() != Some(self.0.id) {
            return false;
        }
        self.0.queries.borrow_mut().retain(|q| !q.ptr_eq(query));
        query.set_attached(None);
        if self.0.config.signal_recursion_limit.is_some() {
            query.set_signal_recursion_limit(None);
        }
        query.clear();
        debug!(engine = self.0.id, "query removed");
        true
    }

    pub fn remove_all_queries(&self) {
        for query in self.queries() {
            self.remove_query(&query);
        }
    }

    /// A copy of the attached queries.
    #[must_use]
    pub fn queries(&self) -> Vec<Query> {
        self.0.queries.borrow().clone()
    }

    // ==================== Systems ====================

    /// Add a system and run its `on_added_to_engine` hook.
    ///
    /// Returns the handle used to reach or remove the system later.
    pub fn add_system<S: System>(&self, system: S) -> Rc<RefCell<S>> {
        let priority = system.priority();
        let handle = Rc::new(RefCell::new(system));
        let entry = SystemEntry::new(&handle, priority, self.0.weak.clone());

        {
            let mut systems = self.0.systems.borrow_mut();
            let at = systems.partition_point(|e| e.priority <= priority);
            systems.insert(at, entry.clone());
        }
        debug!(system = entry.name, priority, "system added");

        if let Ok(mut system) = entry.system.try_borrow_mut() {
            system.on_added_to_engine(&entry.ctx);
        }
        self.flush_pending_removals();
        handle
    }

    /// Remove a system and run its `on_removed_from_engine` hook.
    ///
    /// If the system is running right now (it removed itself), the hook runs
    /// once its current hook returns.
    pub fn remove_system<S: System>(&self, system: &Rc<RefCell<S>>) -> bool {
        self.remove_system_ptr(Rc::as_ptr(system).cast())
    }

    fn remove_system_ptr(&self, ptr: *const ()) -> bool {
        let entry = {
            let mut systems = self.0.systems.borrow_mut();
            let Some(idx) = systems.iter().position(|e| e.is(ptr)) else {
                return false;
            };
            systems.remove(idx)
        };
        entry.ctx.leave();
        debug!(system = entry.name, "system removed");

        if entry.system.try_borrow_mut().is_ok() {
            Self::finish_removal(&entry);
        } else {
            self.0.pending_removals.borrow_mut().push(entry);
        }
        true
    }

    fn finish_removal(entry: &SystemEntry) {
        if let Ok(mut system) = entry.system.try_borrow_mut() {
            system.on_removed_from_engine(&entry.ctx);
        }
        entry.ctx.detach();
    }

    fn flush_pending_removals(&self) {
        let pending = std::mem::take(&mut *self.0.pending_removals.borrow_mut());
        for entry in pending {
            if entry.system.try_borrow_mut().is_ok() {
                Self::finish_removal(&entry);
            } else {
                self.0.pending_removals.borrow_mut().push(entry);
            }
        }
    }

    pub fn remove_all_systems(&self) {
        let systems = self.0.systems.borrow().clone();
        for entry in systems.iter().rev() {
            self.remove_system_ptr(Rc::as_ptr(&entry.any).cast());
        }
    }

    /// Find the first system of type `S`.
    #[must_use]
    pub fn get_system<S: System>(&self) -> Option<Rc<RefCell<S>>> {
        self.0
            .systems
            .borrow()
            .iter()
            .find_map(|entry| entry.downcast::<S>())
    }

    #[must_use]
    pub fn systems_len(&self) -> usize {
        self.0.systems.borrow().len()
    }

    /// Run one hook on every system, over a copy of the system list.
    fn run_systems(&self, mut hook: impl FnMut(&mut dyn System, &SystemContext)) {
        let systems = self.0.systems.borrow().clone();
        for entry in &systems {
            if !entry.ctx.is_in_engine() {
                continue;
            }
            // Already running further up the stack.
            let Ok(mut system) = entry.system.try_borrow_mut() else {
                continue;
            };
            hook(&mut *system, &entry.ctx);
            drop(system);
            self.flush_pending_removals();
        }
    }

    pub fn update(&self, dt: f64, frame_delta: f64) {
        self.run_systems(|system, ctx| system.update(ctx, dt, frame_delta));
    }

    pub fn fixed_update(&self, dt: f64) {
        self.run_systems(|system, ctx| system.fixed_update(ctx, dt));
    }

    pub fn late_update(&self, dt: f64, frame_delta: f64) {
        self.run_systems(|system, ctx| system.late_update(ctx, dt, frame_delta));
    }

    pub fn render_update(&self, dt: f64, frame_delta: f64) {
        self.run_systems(|system, ctx| system.render_update(ctx, dt, frame_delta));
    }

    // ==================== Messages ====================

    /// Subscribe `handler` to `topic`. Returns `false` if already subscribed.
    pub fn subscribe(&self, topic: Topic, handler: MessageHandler) -> bool {
        self.0.bus.borrow_mut().subscribe(topic, handler)
    }

    pub fn unsubscribe(&self, topic: &Topic, handler: &MessageHandler) -> bool {
        self.0.bus.borrow_mut().unsubscribe(topic, handler)
    }

    /// Deliver `message` to every matching subscriber, in subscription
    /// order. Returns the number of handlers called.
    pub fn dispatch<M: Any>(&self, message: &M) -> usize {
        let message: &dyn Any = message;
        let handlers = self.0.bus.borrow().handlers_for(message);
        trace!(
            message = std::any::type_name::<M>(),
            handlers = handlers.len(),
            "dispatch"
        );
        for handler in &handlers {
            handler(message);
        }
        handlers.len()
    }

    // ==================== Teardown ====================

    /// Remove every system, query and entity. Subscriptions and the shared
    /// configuration entity stay.
    pub fn clear(&self) {
        self.remove_all_systems();
        self.remove_all_queries();
        self.remove_all_entities();
        debug!(engine = self.0.id, "engine cleared");
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("id", &self.0.id)
            .field("entities", &self.entity_count())
            .field("queries", &self.0.queries.borrow().len())
            .field("systems", &self.systems_len())
            .finish_non_exhaustive()
    }
}
