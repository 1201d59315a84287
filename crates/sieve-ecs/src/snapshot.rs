//! Before/after view of an entity around one structural change.

use std::{cell::RefCell, fmt};

use crate::{entity::Entity, key::Item};

/// The live entity paired with its state just before the last change.
///
/// A query owns one snapshot and reuses it for every notification, so
/// `previous` only describes the most recent single-field delta. Read it
/// inside the handler; do not keep it around.
pub struct EntitySnapshot {
    current: RefCell<Entity>,
    /// Scratch entity with its own id; never attached anywhere.
    previous: Entity,
}

impl Default for EntitySnapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl EntitySnapshot {
    #[must_use]
    pub fn new() -> Self {
        let previous = Entity::new();
        Self {
            current: RefCell::new(previous.clone()),
            previous,
        }
    }

    /// The live entity.
    #[must_use]
    pub fn current(&self) -> Entity {
        self.current.borrow().clone()
    }

    /// The entity's state before the change that triggered this
    /// notification.
    #[must_use]
    pub fn previous(&self) -> &Entity {
        &self.previous
    }

    /// Point the snapshot at `entity` and rebuild `previous`.
    ///
    /// `patch` is the changed item and whether it was present before the
    /// change. Without a patch, `previous` equals the current state.
    pub(crate) fn capture(&self, entity: &Entity, patch: Option<(&Item, bool)>) {
        *self.current.borrow_mut() = entity.clone();
        self.previous.load_state_from(entity);
        if let Some((item, present)) = patch {
            self.previous.apply_silently(item, present);
        }
    }
}

impl fmt::Debug for EntitySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntitySnapshot")
            .field("current", &*self.current.borrow())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ComponentRef;

    struct Shield;

    #[test]
    fn test_capture_without_patch_mirrors_current() {
        let entity = Entity::new();
        entity.add(Shield);
        entity.add_tag("hero").unwrap();

        let snapshot = EntitySnapshot::new();
        snapshot.capture(&entity, None);

        assert_eq!(snapshot.current(), entity);
        assert!(snapshot.previous().has::<Shield>());
        assert!(snapshot.previous().has_tag("hero"));
        assert_ne!(snapshot.previous().id(), entity.id());
    }

    #[test]
    fn test_capture_patch_excludes_added_item() {
        let entity = Entity::new();
        let shield = entity.add(Shield);

        let snapshot = EntitySnapshot::new();
        let item = Item::Component {
            id: ComponentRef::from_shared(shield.clone()).id(),
            instance: ComponentRef::from_shared(shield),
        };
        snapshot.capture(&entity, Some((&item, false)));

        assert!(entity.has::<Shield>());
        assert!(!snapshot.previous().has::<Shield>());
    }

    #[test]
    fn test_capture_patch_restores_removed_tag() {
        let entity = Entity::new();

        let snapshot = EntitySnapshot::new();
        snapshot.capture(&entity, Some((&Item::Tag("gone".into()), true)));
        assert!(snapshot.previous().has_tag("gone"));
        assert!(!entity.has_tag("gone"));

        // Reuse drops the earlier patch.
        snapshot.capture(&entity, None);
        assert!(!snapshot.previous().has_tag("gone"));
    }
}
