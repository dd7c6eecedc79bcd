//! Event types emitted by live collections.

use std::sync::Arc;

/// Change notification for one item of a collection.
#[derive(Debug)]
pub enum CollectionEvent<T> {
    /// A key was seen for the first time.
    Created(Arc<T>),
    /// An item was removed.
    Deleted(Arc<T>),
    /// An item's backing payload was replaced.
    Updated { item: Arc<T>, previous: Arc<T> },
}

impl<T> Clone for CollectionEvent<T> {
    fn clone(&self) -> Self {
        match self {
            CollectionEvent::Created(item) => CollectionEvent::Created(Arc::clone(item)),
            CollectionEvent::Deleted(item) => CollectionEvent::Deleted(Arc::clone(item)),
            CollectionEvent::Updated { item, previous } => CollectionEvent::Updated {
                item: Arc::clone(item),
                previous: Arc::clone(previous),
            },
        }
    }
}

impl<T> CollectionEvent<T> {
    pub fn kind(&self) -> EventKind {
        match self {
            CollectionEvent::Created(_) => EventKind::Create,
            CollectionEvent::Deleted(_) => EventKind::Delete,
            CollectionEvent::Updated { .. } => EventKind::Update,
        }
    }

    /// The item the event is about (the new value for updates).
    pub fn item(&self) -> &Arc<T> {
        match self {
            CollectionEvent::Created(item)
            | CollectionEvent::Deleted(item)
            | CollectionEvent::Updated { item, .. } => item,
        }
    }
}

/// Canonical event kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    Create,
    Delete,
    Update,
}
