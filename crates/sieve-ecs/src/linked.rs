//! Multi-instance storage for linked component types.
//!
//! A type registered with [`register_linked`](crate::register_linked) may
//! occur on an entity any number of times. The instances live in a singly
//! linked list bound to the (entity, type) slot; the entity's visible
//! component for that type is always the list head.

use std::{cell::RefCell, fmt, rc::Rc};

use crate::component::ComponentRef;

struct Node {
    value: ComponentRef,
    next: RefCell<Option<Rc<Node>>>,
}

/// Ordered list of instances of one linked component type.
///
/// Instances are compared by identity ([`ComponentRef::ptr_eq`]); the same
/// instance is never stored twice. After
/// [`Entity::copy_from`](crate::Entity::copy_from) two entities share one
/// list, so mutation through either is visible through both.
#[derive(Default)]
pub struct LinkedComponentList {
    head: RefCell<Option<Rc<Node>>>,
}

impl LinkedComponentList {
    /// Create an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `component` at the tail.
    ///
    /// Returns `false` and leaves the list unchanged if the same instance is
    /// already present.
    pub fn add(&self, component: ComponentRef) -> bool {
        let mut tail: Option<Rc<Node>> = None;
        let mut cursor = self.head.borrow().clone();
        while let Some(node) = cursor {
            if node.value.ptr_eq(&component) {
                return false;
            }
            cursor = node.next.borrow().clone();
            tail = Some(node);
        }

        let node = Some(Rc::new(Node {
            value: component,
            next: RefCell::new(None),
        }));
        match tail {
            Some(tail) => *tail.next.borrow_mut() = node,
            None => *self.head.borrow_mut() = node,
        }
        true
    }

    /// Insert `component` before the current head.
    pub(crate) fn push_front(&self, component: ComponentRef) -> bool {
        if self.contains(&component) {
            return false;
        }
        let mut head = self.head.borrow_mut();
        let node = Rc::new(Node {
            value: component,
            next: RefCell::new(head.take()),
        });
        *head = Some(node);
        true
    }

    /// Unlink `component`, wherever it is.
    ///
    /// The removed node keeps its `next` pointer, so an iterator parked on it
    /// still reaches the rest of the list.
    pub fn remove(&self, component: &ComponentRef) -> bool {
        let head = self.head.borrow().clone();
        let Some(head) = head else {
            return false;
        };

        if head.value.ptr_eq(component) {
            *self.head.borrow_mut() = head.next.borrow().clone();
            return true;
        }

        let mut prev = head;
        loop {
            let next = prev.next.borrow().clone();
            let Some(node) = next else {
                return false;
            };
            if node.value.ptr_eq(component) {
                *prev.next.borrow_mut() = node.next.borrow().clone();
                return true;
            }
            prev = node;
        }
    }

    /// The first instance.
    #[must_use]
    pub fn head(&self) -> Option<ComponentRef> {
        self.head.borrow().as_ref().map(|node| node.value.clone())
    }

    /// Walk the list from the current head.
    ///
    /// The walk follows each node's `next` pointer as it advances, so nodes
    /// appended during the walk are visited and nodes unlinked ahead of the
    /// cursor are skipped.
    #[must_use]
    pub fn iter(&self) -> LinkedIter {
        LinkedIter {
            first: self.head.borrow().clone(),
            current: None,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.head.borrow().is_none()
    }

    /// Check if `component` is in the list.
    #[must_use]
    pub fn contains(&self, component: &ComponentRef) -> bool {
        self.iter().any(|value| value.ptr_eq(component))
    }

    /// The first instance matching `predicate`.
    pub fn find(&self, mut predicate: impl FnMut(&ComponentRef) -> bool) -> Option<ComponentRef> {
        self.iter().find(|value| predicate(value))
    }

    /// A new list with fresh nodes holding the same instances.
    pub(crate) fn duplicate(&self) -> Self {
        let copy = Self::new();
        for value in self.iter() {
            copy.add(value);
        }
        copy
    }
}

impl Drop for LinkedComponentList {
    fn drop(&mut self) {
        // Unlink iteratively; recursive drop overflows on long lists.
        let mut cursor = self.head.get_mut().take();
        while let Some(node) = cursor {
            cursor = match Rc::try_unwrap(node) {
                Ok(node) => node.next.into_inner(),
                Err(_) => None,
            };
        }
    }
}

impl fmt::Debug for LinkedComponentList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// Iterator over a [`LinkedComponentList`].
pub struct LinkedIter {
    first: Option<Rc<Node>>,
    /// Node yielded last; its `next` is read only when advancing.
    current: Option<Rc<Node>>,
}

impl Iterator for LinkedIter {
    type Item = ComponentRef;

    fn next(&mut self) -> Option<Self::Item> {
        let node = match self.current.take() {
            Some(current) => {
                let next = current.next.borrow().clone();
                next?
            }
            None => self.first.take()?,
        };
        let value = node.value.clone();
        self.current = Some(node);
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Waypoint(u32);

    fn waypoint(n: u32) -> ComponentRef {
        ComponentRef::new(Waypoint(n))
    }

    fn values(list: &LinkedComponentList) -> Vec<u32> {
        list.iter()
            .map(|c| c.downcast::<Waypoint>().unwrap().borrow().0)
            .collect()
    }

    #[test]
    fn test_append_order() {
        let list = LinkedComponentList::new();
        assert!(list.is_empty());

        for n in 1..=3 {
            assert!(list.add(waypoint(n)));
        }

        assert_eq!(values(&list), [1, 2, 3]);
        assert_eq!(list.len(), 3);
        assert!(!list.is_empty());
    }

    #[test]
    fn test_duplicate_rejected() {
        let list = LinkedComponentList::new();
        let a = waypoint(1);

        assert!(list.add(a.clone()));
        assert!(!list.add(a.clone()));
        // Equal contents, different instance.
        assert!(list.add(waypoint(1)));
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_remove_head_middle_tail() {
        let list = LinkedComponentList::new();
        let refs: Vec<_> = (1..=4).map(waypoint).collect();
        for r in &refs {
            list.add(r.clone());
        }

        assert!(list.remove(&refs[0]));
        assert_eq!(values(&list), [2, 3, 4]);
        assert!(list.head().unwrap().ptr_eq(&refs[1]));

        assert!(list.remove(&refs[2]));
        assert_eq!(values(&list), [2, 4]);

        assert!(list.remove(&refs[3]));
        assert_eq!(values(&list), [2]);

        assert!(!list.remove(&refs[3]));
        assert!(list.remove(&refs[1]));
        assert!(list.is_empty());
        assert!(list.head().is_none());
    }

    #[test]
    fn test_iter_survives_removal_of_current() {
        let list = LinkedComponentList::new();
        let refs: Vec<_> = (1..=3).map(waypoint).collect();
        for r in &refs {
            list.add(r.clone());
        }

        let mut seen = Vec::new();
        for value in list.iter() {
            seen.push(value.downcast::<Waypoint>().unwrap().borrow().0);
            list.remove(&value);
        }

        assert_eq!(seen, [1, 2, 3]);
        assert!(list.is_empty());
    }

    #[test]
    fn test_iter_sees_appends() {
        let list = LinkedComponentList::new();
        list.add(waypoint(1));

        let mut seen = Vec::new();
        for value in list.iter() {
            let n = value.downcast::<Waypoint>().unwrap().borrow().0;
            seen.push(n);
            if n < 3 {
                list.add(waypoint(n + 1));
            }
        }

        assert_eq!(seen, [1, 2, 3]);
    }

    #[test]
    fn test_contains_and_find() {
        let list = LinkedComponentList::new();
        let a = waypoint(10);
        list.add(a.clone());
        list.add(waypoint(20));

        assert!(list.contains(&a));
        assert!(!list.contains(&waypoint(10)));

        let found = list
            .find(|c| c.downcast::<Waypoint>().unwrap().borrow().0 > 15)
            .unwrap();
        assert_eq!(found.downcast::<Waypoint>().unwrap().borrow().0, 20);
        assert!(list.find(|_| false).is_none());
    }

    #[test]
    fn test_duplicate_is_independent() {
        let list = LinkedComponentList::new();
        let a = waypoint(1);
        list.add(a.clone());
        list.add(waypoint(2));

        let copy = list.duplicate();
        copy.remove(&a);

        assert_eq!(values(&list), [1, 2]);
        assert_eq!(values(&copy), [2]);
    }

    #[test]
    fn test_push_front() {
        let list = LinkedComponentList::new();
        let b = waypoint(2);
        list.add(b.clone());
        assert!(list.push_front(waypoint(1)));
        assert!(!list.push_front(b));
        assert_eq!(values(&list), [1, 2]);
    }

    #[test]
    fn test_long_list_drop() {
        let list = LinkedComponentList::new();
        for n in 0..10_000 {
            list.add(waypoint(n));
        }
        drop(list);
    }
}
