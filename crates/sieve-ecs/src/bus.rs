//! Topic-based message bus owned by the engine.
//!
//! Handlers subscribe to a [`Topic`]: either a message type (matched by
//! instance-of, so a type registered with
//! [`register_ancestor`](crate::register_ancestor) also reaches its
//! ancestor's topic) or a tag value (matched by equality against messages that are
//! themselves a tag, a string or an integer).

use std::{
    any::{Any, TypeId},
    fmt,
    rc::Rc,
};

use smallvec::SmallVec;

use crate::{component, key::Tag};

/// Type-erased message handler. Identity is the `Rc` allocation.
pub type MessageHandler = Rc<dyn Fn(&dyn Any)>;

/// What a subscription listens for.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Every message of one type.
    Type(TypeId, &'static str),
    /// Messages equal to a tag value.
    Value(Tag),
}

impl Topic {
    /// Topic for messages of type `M`.
    #[must_use]
    pub fn of<M: Any>() -> Self {
        Self::Type(TypeId::of::<M>(), std::any::type_name::<M>())
    }

    /// Topic for messages equal to `value`.
    #[must_use]
    pub fn value(value: impl Into<Tag>) -> Self {
        Self::Value(value.into())
    }

    /// Check if `message` belongs to this topic.
    #[must_use]
    pub fn matches(&self, message: &dyn Any) -> bool {
        match self {
            Self::Type(type_id, _) => component::type_resolves_as(message.type_id(), *type_id),
            Self::Value(tag) => as_tag(message).is_some_and(|value| value == *tag),
        }
    }
}

impl fmt::Debug for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Type(_, name) => write!(f, "Topic::Type({name})"),
            Self::Value(tag) => write!(f, "Topic::Value({tag})"),
        }
    }
}

fn as_tag(message: &dyn Any) -> Option<Tag> {
    if let Some(tag) = message.downcast_ref::<Tag>() {
        return Some(tag.clone());
    }
    if let Some(s) = message.downcast_ref::<String>() {
        return Some(Tag::Str(s.clone()));
    }
    if let Some(s) = message.downcast_ref::<&'static str>() {
        return Some(Tag::from(*s));
    }
    if let Some(i) = message.downcast_ref::<i64>() {
        return Some(Tag::Int(*i));
    }
    message.downcast_ref::<i32>().map(|i| Tag::from(*i))
}

struct Subscription {
    topic: Topic,
    handler: MessageHandler,
}

/// Subscriptions in the order they were made.
#[derive(Default)]
pub struct MessageBus {
    subscriptions: Vec<Subscription>,
}

impl MessageBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `handler` to `topic`.
    ///
    /// Returns `false` if that exact handler already listens on the topic.
    pub fn subscribe(&mut self, topic: Topic, handler: MessageHandler) -> bool {
        if self
            .subscriptions
            .iter()
            .any(|sub| sub.topic == topic && Rc::ptr_eq(&sub.handler, &handler))
        {
            return false;
        }
        self.subscriptions.push(Subscription { topic, handler });
        true
    }

    /// Remove one subscription. Returns `true` if it existed.
    pub fn unsubscribe(&mut self, topic: &Topic, handler: &MessageHandler) -> bool {
        let Some(idx) = self
            .subscriptions
            .iter()
            .position(|sub| sub.topic == *topic && Rc::ptr_eq(&sub.handler, handler))
        else {
            return false;
        };
        self.subscriptions.remove(idx);
        true
    }

    /// The handlers `message` should be delivered to, in subscription order.
    #[must_use]
    pub fn handlers_for(&self, message: &dyn Any) -> SmallVec<[MessageHandler; 4]> {
        self.subscriptions
            .iter()
            .filter(|sub| sub.topic.matches(message))
            .map(|sub| Rc::clone(&sub.handler))
            .collect()
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    pub fn clear(&mut self) {
        self.subscriptions.clear();
    }
}

impl fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.subscriptions.iter().map(|sub| &sub.topic))
            .finish()
    }
}
