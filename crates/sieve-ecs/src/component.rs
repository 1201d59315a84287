//! Component type registration and type-erased component handles.
//!
//! Components are plain Rust values attached to entities. Each component
//! type gets a small integer [`ComponentId`] the first time it is used; the
//! mapping lives in a single process-wide [`ComponentRegistry`] and is never
//! reset, so ids stay stable for the lifetime of the process.
//!
//! Two registry flags change how entities store a type:
//!
//! - **linked** types keep every appended instance in a
//!   [`LinkedComponentList`](crate::LinkedComponentList) instead of a single
//!   slot;
//! - **ancestors** let a concrete type be stored under another type's id
//!   (see [`Entity::add_as`](crate::Entity::add_as)).

use std::{
    any::{Any, TypeId},
    cell::RefCell,
    fmt,
    rc::Rc,
    sync::LazyLock,
};

use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use smallvec::SmallVec;

use crate::FxHashMap;

/// Marker trait for types that can be used as components.
///
/// # Example
///
/// ```ignore
/// struct Position { x: f32, y: f32 }
///
/// let entity = Entity::new();
/// entity.add(Position { x: 0.0, y: 0.0 })?;
/// ```
pub trait Component: 'static {}

// Blanket implementation for all suitable types
impl<T: 'static> Component for T {}

/// Shared, mutable access to a component instance.
///
/// Field mutation through this handle is not tracked; call
/// [`Entity::invalidate`](crate::Entity::invalidate) when a query predicate
/// depends on the mutated fields.
pub type Shared<T> = Rc<RefCell<T>>;

/// Unique identifier for a component type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(u32);

impl ComponentId {
    /// Create a component ID from a raw value.
    #[must_use]
    pub const fn from_raw(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw ID value.
    #[must_use]
    pub const fn as_raw(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentId({})", self.0)
    }
}

/// Runtime information about a component type.
#[derive(Clone)]
pub struct ComponentInfo {
    /// Unique ID for this component type.
    id: ComponentId,
    /// Type name for debugging.
    name: &'static str,
    /// Rust TypeId for type checking.
    type_id: TypeId,
    /// Whether entities keep every instance of this type in a linked list.
    linked: bool,
    /// Types this component may be stored as.
    ancestors: SmallVec<[ComponentId; 2]>,
}

impl ComponentInfo {
    fn of<T: Component>(id: ComponentId) -> Self {
        Self {
            id,
            name: std::any::type_name::<T>(),
            type_id: TypeId::of::<T>(),
            linked: false,
            ancestors: SmallVec::new(),
        }
    }

    /// Get the component ID.
    #[must_use]
    pub const fn id(&self) -> ComponentId {
        self.id
    }

    /// Get the component type name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Check if entities store this type as a linked list.
    #[must_use]
    pub const fn is_linked(&self) -> bool {
        self.linked
    }

    /// Get the directly registered ancestors.
    #[must_use]
    pub fn ancestors(&self) -> &[ComponentId] {
        &self.ancestors
    }

    /// Check if this info is for the given type.
    #[must_use]
    pub fn is<T: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }
}

impl fmt::Debug for ComponentInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentInfo")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("linked", &self.linked)
            .field("ancestors", &self.ancestors)
            .finish()
    }
}

/// Registry for component types.
///
/// Maps Rust types to `ComponentId`s and stores metadata about each type.
/// The process-wide instance is reached through [`ComponentRegistry::global`]
/// and the free functions of this module; standalone instances are useful in
/// tests.
#[derive(Default)]
pub struct ComponentRegistry {
    /// Map from TypeId to ComponentId.
    type_to_id: FxHashMap<TypeId, ComponentId>,
    /// Component info indexed by ComponentId.
    infos: Vec<ComponentInfo>,
}

static REGISTRY: LazyLock<RwLock<ComponentRegistry>> =
    LazyLock::new(|| RwLock::new(ComponentRegistry::new()));

impl ComponentRegistry {
    /// Create a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry used by entities.
    #[must_use]
    pub fn global() -> &'static RwLock<Self> {
        &REGISTRY
    }

    /// Register a component type and return its ID.
    ///
    /// If the type is already registered, returns the existing ID.
    pub fn register<T: Component>(&mut self) -> ComponentId {
        let type_id = TypeId::of::<T>();

        if let Some(&id) = self.type_to_id.get(&type_id) {
            return id;
        }

        let id = ComponentId(self.infos.len() as u32);
        self.type_to_id.insert(type_id, id);
        self.infos.push(ComponentInfo::of::<T>(id));
        id
    }

    /// Register a component type with linked (multi-instance) semantics.
    ///
    /// Call this before the first instance is attached anywhere; entities
    /// already holding a single instance are not converted.
    pub fn register_linked<T: Component>(&mut self) -> ComponentId {
        let id = self.register::<T>();
        self.infos[id.as_raw() as usize].linked = true;
        id
    }

    /// Declare that `T` may be stored under `A`'s id.
    pub fn register_ancestor<T: Component, A: Component>(&mut self) -> ComponentId {
        let id = self.register::<T>();
        let ancestor = self.register::<A>();
        if id != ancestor {
            let info = &mut self.infos[id.as_raw() as usize];
            if !info.ancestors.contains(&ancestor) {
                info.ancestors.push(ancestor);
            }
        }
        ancestor
    }

    /// Get the component ID for a type, if registered.
    #[must_use]
    pub fn get_id<T: Component>(&self) -> Option<ComponentId> {
        self.type_to_id.get(&TypeId::of::<T>()).copied()
    }

    /// Get the component ID for a TypeId, if registered.
    #[must_use]
    pub fn get_id_by_type_id(&self, type_id: TypeId) -> Option<ComponentId> {
        self.type_to_id.get(&type_id).copied()
    }

    /// Get component info by ID.
    #[must_use]
    pub fn get_info(&self, id: ComponentId) -> Option<&ComponentInfo> {
        self.infos.get(id.as_raw() as usize)
    }

    /// Check if a type id is registered as linked.
    #[must_use]
    pub fn is_linked(&self, id: ComponentId) -> bool {
        self.get_info(id).is_some_and(ComponentInfo::is_linked)
    }

    /// Every id a component of type `id` can be stored under: the id itself
    /// followed by its ancestors, transitively, without repeats.
    #[must_use]
    pub fn resolution_chain(&self, id: ComponentId) -> SmallVec<[ComponentId; 4]> {
        let mut chain: SmallVec<[ComponentId; 4]> = SmallVec::new();
        chain.push(id);

        let mut idx = 0;
        while idx < chain.len() {
            if let Some(info) = self.get_info(chain[idx]) {
                for &ancestor in &info.ancestors {
                    if !chain.contains(&ancestor) {
                        chain.push(ancestor);
                    }
                }
            }
            idx += 1;
        }
        chain
    }

    /// Check if a component of type `id` can be stored under `target`.
    #[must_use]
    pub fn resolves_as(&self, id: ComponentId, target: ComponentId) -> bool {
        id == target || self.resolution_chain(id).contains(&target)
    }

    /// Get the number of registered components.
    #[must_use]
    pub fn len(&self) -> usize {
        self.type_to_id.len()
    }

    /// Check if the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.type_to_id.is_empty()
    }

    /// Iterate over all registered component infos.
    pub fn iter(&self) -> impl Iterator<Item = &ComponentInfo> {
        self.infos.iter()
    }
}

impl fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("count", &self.len())
            .field("components", &self.infos)
            .finish()
    }
}

// ==================== Process-wide registry ====================

/// Get the id of `T`, registering it on first use.
pub fn component_id<T: Component>() -> ComponentId {
    let registry = REGISTRY.upgradable_read();
    if let Some(id) = registry.get_id::<T>() {
        return id;
    }
    RwLockUpgradableReadGuard::upgrade(registry).register::<T>()
}

/// Get the id of `T` without registering it.
#[must_use]
pub fn lookup<T: Component>() -> Option<ComponentId> {
    REGISTRY.read().get_id::<T>()
}

/// Opt `T` into linked semantics.
pub fn register_linked<T: Component>() -> ComponentId {
    REGISTRY.write().register_linked::<T>()
}

/// Declare that `T` may be stored under `A`'s id. Returns `A`'s id.
pub fn register_ancestor<T: Component, A: Component>() -> ComponentId {
    REGISTRY.write().register_ancestor::<T, A>()
}

/// Get a copy of the registered info for `id`.
#[must_use]
pub fn component_info(id: ComponentId) -> Option<ComponentInfo> {
    REGISTRY.read().get_info(id).cloned()
}

pub(crate) fn is_linked(id: ComponentId) -> bool {
    REGISTRY.read().is_linked(id)
}

pub(crate) fn resolves_as(id: ComponentId, target: ComponentId) -> bool {
    REGISTRY.read().resolves_as(id, target)
}

/// Check if a value of type `ty` counts as an instance of type `target`,
/// either the same type or a registered descendant. Never registers.
pub(crate) fn type_resolves_as(ty: TypeId, target: TypeId) -> bool {
    if ty == target {
        return true;
    }
    let registry = REGISTRY.read();
    match (
        registry.get_id_by_type_id(ty),
        registry.get_id_by_type_id(target),
    ) {
        (Some(id), Some(target)) => registry.resolves_as(id, target),
        _ => false,
    }
}

pub(crate) fn resolution_chain(id: ComponentId) -> SmallVec<[ComponentId; 4]> {
    REGISTRY.read().resolution_chain(id)
}

pub(crate) fn component_name(id: ComponentId) -> &'static str {
    REGISTRY
        .read()
        .get_info(id)
        .map_or("<unregistered>", ComponentInfo::name)
}

// ==================== Type-erased instances ====================

/// A type-erased handle to one component instance.
///
/// Cloning the handle shares the instance. Two handles are the same
/// instance when [`ComponentRef::ptr_eq`] holds; that identity is what
/// linked lists and [`Entity::pick`](crate::Entity::pick) compare.
#[derive(Clone)]
pub struct ComponentRef {
    value: Rc<dyn Any>,
    id: ComponentId,
    name: &'static str,
}

impl ComponentRef {
    /// Wrap a new component instance.
    pub fn new<T: Component>(component: T) -> Self {
        Self::from_shared(Rc::new(RefCell::new(component)))
    }

    /// Erase an existing shared instance, keeping its identity.
    pub fn from_shared<T: Component>(shared: Shared<T>) -> Self {
        Self {
            value: shared,
            id: component_id::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// The id of the instance's concrete type.
    #[must_use]
    pub const fn id(&self) -> ComponentId {
        self.id
    }

    /// The concrete type name.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        self.name
    }

    /// Check the concrete type.
    #[must_use]
    pub fn is<T: Component>(&self) -> bool {
        self.value.is::<RefCell<T>>()
    }

    /// Recover the typed handle.
    #[must_use]
    pub fn downcast<T: Component>(&self) -> Option<Shared<T>> {
        Rc::clone(&self.value).downcast::<RefCell<T>>().ok()
    }

    /// Check if both handles point at the same instance.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.value, &other.value)
    }
}

impl fmt::Debug for ComponentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentRef")
            .field("id", &self.id)
            .field("type", &self.name)
            .field("ptr", &Rc::as_ptr(&self.value).cast::<()>())
            .finish()
    }
}

impl<T: Component> From<Shared<T>> for ComponentRef {
    fn from(shared: Shared<T>) -> Self {
        Self::from_shared(shared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Position {
        x: f32,
        y: f32,
    }

    struct Velocity {
        x: f32,
        y: f32,
    }

    struct Shape;
    struct Circle;
    struct Curve;

    #[test]
    fn test_component_registration() {
        let mut registry = ComponentRegistry::new();

        let pos_id = registry.register::<Position>();
        let vel_id = registry.register::<Velocity>();

        assert_ne!(pos_id, vel_id);
        assert_eq!(registry.get_id::<Position>(), Some(pos_id));
        assert_eq!(registry.get_id::<Velocity>(), Some(vel_id));
    }

    #[test]
    fn test_idempotent_registration() {
        let mut registry = ComponentRegistry::new();

        let id1 = registry.register::<Position>();
        let id2 = registry.register::<Position>();

        assert_eq!(id1, id2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_linked_flag() {
        let mut registry = ComponentRegistry::new();

        let pos = registry.register::<Position>();
        let vel = registry.register_linked::<Velocity>();

        assert!(!registry.is_linked(pos));
        assert!(registry.is_linked(vel));
        assert!(registry.get_info(vel).unwrap().is_linked());
        // Unknown ids are simply not linked.
        assert!(!registry.is_linked(ComponentId::from_raw(999)));
    }

    #[test]
    fn test_transitive_ancestors() {
        let mut registry = ComponentRegistry::new();

        let shape = registry.register_ancestor::<Curve, Shape>();
        let curve = registry.register_ancestor::<Circle, Curve>();
        let circle = registry.get_id::<Circle>().unwrap();

        assert!(registry.resolves_as(circle, circle));
        assert!(registry.resolves_as(circle, curve));
        assert!(registry.resolves_as(circle, shape));
        assert!(!registry.resolves_as(shape, circle));
        assert_eq!(registry.resolution_chain(circle).as_slice(), [
            circle, curve, shape
        ]);
    }

    #[test]
    fn test_global_ids_are_stable() {
        struct OnlyHere;

        assert_eq!(lookup::<OnlyHere>(), None);
        let id = component_id::<OnlyHere>();
        assert_eq!(component_id::<OnlyHere>(), id);
        assert_eq!(lookup::<OnlyHere>(), Some(id));
        assert!(component_info(id).unwrap().is::<OnlyHere>());
    }

    #[test]
    fn test_component_ref_identity_and_downcast() {
        let a = ComponentRef::new(Position { x: 1.0, y: 2.0 });
        let b = a.clone();
        let c = ComponentRef::new(Position { x: 1.0, y: 2.0 });

        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&c));
        assert!(a.is::<Position>());
        assert!(!a.is::<Velocity>());
        assert!(a.downcast::<Velocity>().is_none());

        let shared = a.downcast::<Position>().unwrap();
        shared.borrow_mut().x = 5.0;
        assert_eq!(b.downcast::<Position>().unwrap().borrow().x, 5.0);
        assert_eq!(c.downcast::<Position>().unwrap().borrow().y, 2.0);
        assert_eq!(a.id(), component_id::<Position>());
    }
}
