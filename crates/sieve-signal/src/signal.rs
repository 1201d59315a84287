//! Priority-ordered multicast signal.

use std::{
    cell::{Cell, RefCell},
    fmt,
    rc::Rc,
};

use smallvec::SmallVec;

use crate::error::{SignalError, SignalResult};

/// A connected callback. Identity is the `Rc` allocation, so keep a clone
/// around to disconnect it later.
pub type Handler<A> = Rc<dyn Fn(&A)>;

/// Dispatch priority. Lower values run first.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Priority(pub i32);

impl Priority {
    /// Runs before every other handler.
    pub const FIRST: Self = Self(i32::MIN);
    /// The priority used when none is given.
    pub const DEFAULT: Self = Self(0);
    /// Runs after every other handler.
    pub const LAST: Self = Self(i32::MAX);

    /// Get the raw priority value.
    #[must_use]
    pub const fn get(self) -> i32 {
        self.0
    }
}

impl From<i32> for Priority {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

impl fmt::Debug for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Priority({})", self.0)
    }
}

/// One connected handler.
struct Slot<A> {
    handler: Handler<A>,
    priority: Priority,
    /// Connection sequence number, breaks priority ties.
    order: u64,
}

/// A synchronous multicast signal carrying `&A` to every handler.
///
/// Handlers are kept sorted by `(priority, connection order)`. Emission runs
/// over a copy of the handler list, so handlers may connect or disconnect
/// (themselves included) while a dispatch is in flight; such changes take
/// effect from the next emission.
///
/// A panicking handler aborts the rest of the dispatch and the panic reaches
/// the caller of [`Signal::emit`].
pub struct Signal<A> {
    slots: RefCell<SmallVec<[Slot<A>; 4]>>,
    next_order: Cell<u64>,
    /// Number of emissions of this signal currently on the stack.
    depth: Cell<u32>,
    recursion_limit: Cell<Option<u32>>,
}

impl<A> Default for Signal<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> Signal<A> {
    /// Create a signal with no handlers and no recursion limit.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: RefCell::new(SmallVec::new()),
            next_order: Cell::new(0),
            depth: Cell::new(0),
            recursion_limit: Cell::new(None),
        }
    }

    /// Connect a handler at the given priority.
    ///
    /// Connecting a handler that is already connected only updates its
    /// priority; the list is re-sorted only if the relative order changed.
    /// The handler keeps its original connection order for tie breaking.
    pub fn connect(&self, handler: Handler<A>, priority: impl Into<Priority>) {
        let priority = priority.into();
        let mut slots = self.slots.borrow_mut();

        if let Some(slot) = slots
            .iter_mut()
            .find(|slot| Rc::ptr_eq(&slot.handler, &handler))
        {
            if slot.priority == priority {
                return;
            }
            slot.priority = priority;
            if !slots.is_sorted_by_key(|slot| (slot.priority, slot.order)) {
                slots.sort_by_key(|slot| (slot.priority, slot.order));
            }
            return;
        }

        let order = self.next_order.get();
        self.next_order.set(order + 1);

        let at = slots.partition_point(|slot| slot.priority <= priority);
        slots.insert(
            at,
            Slot {
                handler,
                priority,
                order,
            },
        );
    }

    /// Disconnect a handler by identity.
    ///
    /// Returns `true` if the handler was connected.
    pub fn disconnect(&self, handler: &Handler<A>) -> bool {
        let mut slots = self.slots.borrow_mut();
        let Some(idx) = slots
            .iter()
            .position(|slot| Rc::ptr_eq(&slot.handler, handler))
        else {
            return false;
        };
        slots.remove(idx);
        true
    }

    /// Disconnect every handler.
    pub fn disconnect_all(&self) {
        self.slots.borrow_mut().clear();
    }

    /// Check whether a specific handler is connected.
    #[must_use]
    pub fn is_connected(&self, handler: &Handler<A>) -> bool {
        self.slots
            .borrow()
            .iter()
            .any(|slot| Rc::ptr_eq(&slot.handler, handler))
    }

    /// Get the priority a handler is connected at.
    #[must_use]
    pub fn priority_of(&self, handler: &Handler<A>) -> Option<Priority> {
        self.slots
            .borrow()
            .iter()
            .find(|slot| Rc::ptr_eq(&slot.handler, handler))
            .map(|slot| slot.priority)
    }

    /// Check if at least one handler is connected.
    ///
    /// Emitters use this to skip building a payload nobody will read.
    #[must_use]
    pub fn has_handlers(&self) -> bool {
        !self.slots.borrow().is_empty()
    }

    /// Get the number of connected handlers.
    #[must_use]
    pub fn handlers_amount(&self) -> usize {
        self.slots.borrow().len()
    }

    /// Limit how deeply emissions of this signal may nest.
    ///
    /// `None` (the default) leaves recursion unbounded.
    pub fn set_recursion_limit(&self, limit: Option<u32>) {
        self.recursion_limit.set(limit);
    }

    /// Get the configured recursion limit.
    #[must_use]
    pub fn recursion_limit(&self) -> Option<u32> {
        self.recursion_limit.get()
    }

    /// Invoke every handler with `args`, in priority order.
    ///
    /// # Panics
    ///
    /// Panics if a recursion limit is set and this emission would nest deeper
    /// than it, or if a handler panics.
    pub fn emit(&self, args: &A) {
        if let Err(err) = self.try_emit(args) {
            panic!("{err}");
        }
    }

    /// Invoke every handler with `args`, failing instead of panicking when
    /// the recursion limit is hit.
    pub fn try_emit(&self, args: &A) -> SignalResult<()> {
        let depth = self.depth.get();
        if let Some(limit) = self.recursion_limit.get() {
            if depth >= limit {
                return Err(SignalError::RecursionLimit { limit });
            }
        }

        let handlers: SmallVec<[Handler<A>; 8]> = self
            .slots
            .borrow()
            .iter()
            .map(|slot| Rc::clone(&slot.handler))
            .collect();

        if handlers.is_empty() {
            return Ok(());
        }

        let _guard = DepthGuard::enter(&self.depth);
        for handler in handlers {
            handler(args);
        }
        Ok(())
    }
}

impl<A> fmt::Debug for Signal<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("handlers", &self.handlers_amount())
            .field("depth", &self.depth.get())
            .field("recursion_limit", &self.recursion_limit.get())
            .finish()
    }
}

/// Tracks emission depth; restores it on unwind too.
struct DepthGuard<'a> {
    depth: &'a Cell<u32>,
}

impl<'a> DepthGuard<'a> {
    fn enter(depth: &'a Cell<u32>) -> Self {
        depth.set(depth.get() + 1);
        Self { depth }
    }
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.depth.set(self.depth.get() - 1);
    }
}
