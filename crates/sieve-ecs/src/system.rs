//! Systems: per-frame logic driven by the engine.
//!
//! A system is any `'static` type implementing [`System`]. The engine keeps
//! systems sorted by [`System::priority`] (lower first, ties in insertion
//! order) and calls the matching hook on each of them from
//! [`Engine::update`](crate::Engine::update) and friends.
//!
//! # Example
//!
//! ```ignore
//! struct Gravity {
//!     falling: Query,
//! }
//!
//! impl System for Gravity {
//!     fn on_added_to_engine(&mut self, ctx: &SystemContext) {
//!         if let Ok(engine) = ctx.engine() {
//!             engine.add_query(&self.falling);
//!         }
//!     }
//!
//!     fn update(&mut self, _ctx: &SystemContext, dt: f64, _frame_delta: f64) {
//!         for entity in &self.falling {
//!             if let Some(velocity) = entity.get::<Velocity>() {
//!                 velocity.borrow_mut().y -= 9.81 * dt;
//!             }
//!         }
//!     }
//! }
//!
//! let gravity = engine.add_system(Gravity { falling });
//! ```

use std::{
    any::Any,
    cell::{Cell, RefCell},
    fmt,
    rc::{Rc, Weak},
};

use crate::{
    engine::{Engine, EngineInner},
    entity::Entity,
    error::{EcsError, EcsResult},
};

/// Logic run by the engine every frame.
///
/// Every hook has an empty default.
pub trait System: 'static {
    /// Sort key. Lower values run first.
    fn priority(&self) -> i32 {
        0
    }

    fn on_added_to_engine(&mut self, _ctx: &SystemContext) {}

    /// Runs after the system left the engine. The context still reaches the
    /// engine during this call and is detached right after.
    fn on_removed_from_engine(&mut self, _ctx: &SystemContext) {}

    fn update(&mut self, _ctx: &SystemContext, _dt: f64, _frame_delta: f64) {}

    fn fixed_update(&mut self, _ctx: &SystemContext, _dt: f64) {}

    fn late_update(&mut self, _ctx: &SystemContext, _dt: f64, _frame_delta: f64) {}

    fn render_update(&mut self, _ctx: &SystemContext, _dt: f64, _frame_delta: f64) {}
}

struct ContextInner {
    engine: RefCell<Weak<EngineInner>>,
    /// Cleared as soon as the system leaves the engine's list.
    in_engine: Cell<bool>,
}

/// A system's link back to the engine that runs it.
///
/// Cloning shares the link. Once the system is removed, engine-scoped calls
/// fail with [`EcsError::NotAttached`].
#[derive(Clone)]
pub struct SystemContext(Rc<ContextInner>);

impl SystemContext {
    pub(crate) fn new(engine: Weak<EngineInner>) -> Self {
        Self(Rc::new(ContextInner {
            engine: RefCell::new(engine),
            in_engine: Cell::new(true),
        }))
    }

    /// The engine running this system.
    pub fn engine(&self) -> EcsResult<Engine> {
        self.0
            .engine
            .borrow()
            .upgrade()
            .map(Engine::from_inner)
            .ok_or(EcsError::NotAttached)
    }

    /// The engine's shared configuration entity.
    pub fn shared_config(&self) -> EcsResult<Entity> {
        Ok(self.engine()?.shared_config())
    }

    /// Dispatch `message` on the engine's bus. Returns the number of
    /// handlers reached.
    pub fn dispatch<M: Any>(&self, message: &M) -> EcsResult<usize> {
        Ok(self.engine()?.dispatch(message))
    }

    /// Check if the system is still in the engine's list.
    #[must_use]
    pub fn is_in_engine(&self) -> bool {
        self.0.in_engine.get()
    }

    pub(crate) fn leave(&self) {
        self.0.in_engine.set(false);
    }

    pub(crate) fn detach(&self) {
        self.0.in_engine.set(false);
        *self.0.engine.borrow_mut() = Weak::new();
    }
}

impl fmt::Debug for SystemContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemContext")
            .field("in_engine", &self.is_in_engine())
            .field("attached", &(self.0.engine.borrow().strong_count() > 0))
            .finish()
    }
}

/// One registered system.
#[derive(Clone)]
pub(crate) struct SystemEntry {
    pub(crate) system: Rc<RefCell<dyn System>>,
    /// Same allocation as `system`, for downcasting and identity.
    pub(crate) any: Rc<dyn Any>,
    pub(crate) priority: i32,
    pub(crate) name: &'static str,
    pub(crate) ctx: SystemContext,
}

impl SystemEntry {
    pub(crate) fn new<S: System>(handle: &Rc<RefCell<S>>, priority: i32, engine: Weak<EngineInner>) -> Self {
        let system: Rc<RefCell<dyn System>> = handle.clone();
        let any: Rc<dyn Any> = handle.clone();
        Self {
            system,
            any,
            priority,
            name: std::any::type_name::<S>(),
            ctx: SystemContext::new(engine),
        }
    }

    /// Check if this entry holds the system behind `ptr`.
    pub(crate) fn is(&self, ptr: *const ()) -> bool {
        Rc::as_ptr(&self.any).cast::<()>() == ptr
    }

    pub(crate) fn downcast<S: System>(&self) -> Option<Rc<RefCell<S>>> {
        Rc::clone(&self.any).downcast::<RefCell<S>>().ok()
    }
}

impl fmt::Debug for SystemEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemEntry")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}
