//! Keys naming what an entity carries: component types and tags.

use std::fmt;

use crate::component::{Component, ComponentId, ComponentRef, component_id};

/// A string or integer marker set on an entity.
///
/// Tags carry no data; an entity either has a tag or it doesn't.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum Tag {
    Str(String),
    Int(i64),
}

impl Tag {
    /// Check if this is the empty string tag, which entities reject.
    #[must_use]
    pub fn is_empty_str(&self) -> bool {
        matches!(self, Self::Str(s) if s.is_empty())
    }
}

impl From<&str> for Tag {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

impl From<String> for Tag {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for Tag {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Tag {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Int(i) => write!(f, "{i}"),
        }
    }
}

/// Identifies one slot of an entity: a component type or a tag.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum ComponentKey {
    Type(ComponentId),
    Tag(Tag),
}

impl ComponentKey {
    /// Key for component type `T`. Registers `T` if needed.
    #[must_use]
    pub fn of<T: Component>() -> Self {
        Self::Type(component_id::<T>())
    }

    /// Key for a tag.
    #[must_use]
    pub fn tag(tag: impl Into<Tag>) -> Self {
        Self::Tag(tag.into())
    }
}

impl From<ComponentId> for ComponentKey {
    fn from(id: ComponentId) -> Self {
        Self::Type(id)
    }
}

impl From<Tag> for ComponentKey {
    fn from(tag: Tag) -> Self {
        Self::Tag(tag)
    }
}

impl From<&str> for ComponentKey {
    fn from(tag: &str) -> Self {
        Self::Tag(tag.into())
    }
}

impl From<i64> for ComponentKey {
    fn from(tag: i64) -> Self {
        Self::Tag(tag.into())
    }
}

/// The single field a structural change touched.
#[derive(Clone, Debug)]
pub enum Item {
    /// A component instance, stored under `id` (its own id or a resolve id).
    Component { id: ComponentId, instance: ComponentRef },
    Tag(Tag),
}

impl Item {
    /// The slot this item occupies.
    #[must_use]
    pub fn key(&self) -> ComponentKey {
        match self {
            Self::Component { id, .. } => ComponentKey::Type(*id),
            Self::Tag(tag) => ComponentKey::Tag(tag.clone()),
        }
    }

    /// The component instance, if this is a component.
    #[must_use]
    pub const fn instance(&self) -> Option<&ComponentRef> {
        match self {
            Self::Component { instance, .. } => Some(instance),
            Self::Tag(_) => None,
        }
    }

    /// The tag, if this is a tag.
    #[must_use]
    pub const fn as_tag(&self) -> Option<&Tag> {
        match self {
            Self::Component { .. } => None,
            Self::Tag(tag) => Some(tag),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_conversions() {
        assert_eq!(Tag::from("enemy"), Tag::Str("enemy".to_owned()));
        assert_eq!(Tag::from(String::from("enemy")), Tag::from("enemy"));
        assert_eq!(Tag::from(7_i32), Tag::Int(7));
        assert_eq!(Tag::from(7_i64), Tag::from(7_i32));
        assert_ne!(Tag::from("7"), Tag::from(7_i64));
        assert!(Tag::from("").is_empty_str());
        assert!(!Tag::from(0_i64).is_empty_str());
    }

    #[test]
    fn test_tag_display() {
        assert_eq!(Tag::from("a").to_string(), "\"a\"");
        assert_eq!(Tag::from(-3_i64).to_string(), "-3");
    }

    #[test]
    fn test_item_key() {
        struct Marker;

        let instance = ComponentRef::new(Marker);
        let id = instance.id();
        let item = Item::Component { id, instance };
        assert_eq!(item.key(), ComponentKey::of::<Marker>());
        assert!(item.instance().is_some());
        assert!(item.as_tag().is_none());

        let item = Item::Tag("boss".into());
        assert_eq!(item.key(), ComponentKey::from("boss"));
        assert_eq!(item.as_tag(), Some(&Tag::from("boss")));
    }
}
