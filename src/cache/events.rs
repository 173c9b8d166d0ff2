//! Entity change notifications.

use uuid::Uuid;

use crate::domain::entities::{EntityFamily, EntityRef};

/// Monotonic invalidation counter of a cache backend.
///
/// Read before a response is produced and checked again when it is stored,
/// so a body produced across an invalidation of one of its tags is dropped.
pub type Epoch = u64;

/// How an entity was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SaveKind {
    Created,
    Updated,
    Deleted,
}

/// A committed write to one entity, delivered synchronously to the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidationEvent {
    /// Correlates the log lines of one invalidation pass.
    pub id: Uuid,
    pub entity: EntityRef,
    pub kind: SaveKind,
    /// Attribute names whose value changed; empty when unknown.
    pub changed: Vec<String>,
}

impl InvalidationEvent {
    pub fn new(entity: EntityRef, kind: SaveKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            entity,
            kind,
            changed: Vec::new(),
        }
    }

    pub fn updated(entity: EntityRef, changed: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let mut event = Self::new(entity, SaveKind::Updated);
        event.changed = changed.into_iter().map(Into::into).collect();
        event
    }

    pub fn family(&self) -> EntityFamily {
        self.entity.family
    }
}
