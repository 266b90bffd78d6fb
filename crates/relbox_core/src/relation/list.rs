//! Backing list and pending-change containers for [`crate::ToMany`].

use relbox_store::Ref;
use std::collections::HashSet;
use std::sync::Arc;

/// Identity key for an entity instance.
///
/// Change tracking is keyed by object identity, not by id: freshly created
/// targets have no id yet, and two loads of the same stored row are
/// distinct instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ObjKey(usize);

impl ObjKey {
    pub(crate) fn of<T>(entity: &Ref<T>) -> Self {
        Self(Arc::as_ptr(entity) as usize)
    }
}

/// How the visible list of a [`crate::ToMany`] is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListStrategy {
    /// Cheap snapshots for iteration; mutations copy when the list is
    /// shared. The default.
    #[default]
    CopyOnWrite,
    /// A plain vector; snapshots clone the whole list.
    Plain,
}

/// The visible list, stored per the chosen [`ListStrategy`].
pub(crate) enum TrackedList<T> {
    Plain(Vec<Ref<T>>),
    CopyOnWrite(Arc<Vec<Ref<T>>>),
}

impl<T> TrackedList<T> {
    pub(crate) fn new(strategy: ListStrategy, items: Vec<Ref<T>>) -> Self {
        match strategy {
            ListStrategy::Plain => Self::Plain(items),
            ListStrategy::CopyOnWrite => Self::CopyOnWrite(Arc::new(items)),
        }
    }

    /// Re-stores the current items under `strategy`.
    pub(crate) fn convert(&mut self, strategy: ListStrategy) {
        match (&*self, strategy) {
            (Self::Plain(_), ListStrategy::CopyOnWrite) => {
                if let Self::Plain(items) = std::mem::replace(self, Self::Plain(Vec::new())) {
                    *self = Self::CopyOnWrite(Arc::new(items));
                }
            }
            (Self::CopyOnWrite(_), ListStrategy::Plain) => {
                if let Self::CopyOnWrite(items) = std::mem::replace(self, Self::Plain(Vec::new())) {
                    *self = Self::Plain(Arc::try_unwrap(items).unwrap_or_else(|shared| (*shared).clone()));
                }
            }
            _ => {}
        }
    }

    fn items(&self) -> &[Ref<T>] {
        match self {
            Self::Plain(items) => items,
            Self::CopyOnWrite(items) => items,
        }
    }

    fn items_mut(&mut self) -> &mut Vec<Ref<T>> {
        match self {
            Self::Plain(items) => items,
            Self::CopyOnWrite(items) => Arc::make_mut(items),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.items().len()
    }

    pub(crate) fn get(&self, index: usize) -> Option<Ref<T>> {
        self.items().get(index).cloned()
    }

    pub(crate) fn push(&mut self, item: Ref<T>) {
        self.items_mut().push(item);
    }

    /// Inserts at `index`. Panics if `index > len`, like `Vec::insert`.
    pub(crate) fn insert(&mut self, index: usize, item: Ref<T>) {
        self.items_mut().insert(index, item);
    }

    /// Removes and returns the item at `index`. Panics if out of bounds,
    /// like `Vec::remove`.
    pub(crate) fn remove(&mut self, index: usize) -> Ref<T> {
        self.items_mut().remove(index)
    }

    /// Replaces the item at `index`, returning the old one. Panics if out
    /// of bounds.
    pub(crate) fn set(&mut self, index: usize, item: Ref<T>) -> Ref<T> {
        std::mem::replace(&mut self.items_mut()[index], item)
    }

    pub(crate) fn clear(&mut self) {
        match self {
            Self::Plain(items) => items.clear(),
            // Drop the shared snapshot instead of copying it just to empty it.
            Self::CopyOnWrite(items) => *items = Arc::new(Vec::new()),
        }
    }

    /// A shared snapshot of the current items. Free for copy-on-write
    /// lists, a full clone for plain ones.
    pub(crate) fn snapshot(&self) -> Arc<Vec<Ref<T>>> {
        match self {
            Self::Plain(items) => Arc::new(items.clone()),
            Self::CopyOnWrite(items) => Arc::clone(items),
        }
    }

    /// Index of the first item with the given identity.
    pub(crate) fn position(&self, key: ObjKey) -> Option<usize> {
        self.items().iter().position(|item| ObjKey::of(item) == key)
    }

    pub(crate) fn sort_by_key<K: Ord>(&mut self, mut key: impl FnMut(&Ref<T>) -> K) {
        self.items_mut().sort_by_key(|item| key(item));
    }

    pub(crate) fn sort_by(&mut self, compare: impl FnMut(&Ref<T>, &Ref<T>) -> std::cmp::Ordering) {
        self.items_mut().sort_by(compare);
    }
}

/// A set of entities in insertion order, deduplicated by identity.
pub(crate) struct PendingSet<T> {
    members: HashSet<ObjKey>,
    order: Vec<Ref<T>>,
}

impl<T> PendingSet<T> {
    pub(crate) fn new() -> Self {
        Self {
            members: HashSet::new(),
            order: Vec::new(),
        }
    }

    /// Adds the entity if not already present. Returns true if added.
    pub(crate) fn insert(&mut self, entity: &Ref<T>) -> bool {
        if self.members.insert(ObjKey::of(entity)) {
            self.order.push(Ref::clone(entity));
            true
        } else {
            false
        }
    }

    /// Removes the entity with the given identity. Returns true if it was
    /// present.
    pub(crate) fn remove(&mut self, key: ObjKey) -> bool {
        if self.members.remove(&key) {
            if let Some(index) = self.order.iter().position(|item| ObjKey::of(item) == key) {
                self.order.remove(index);
            }
            true
        } else {
            false
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.members.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Iterates members in insertion order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = &Ref<T>> {
        self.order.iter()
    }

    pub(crate) fn clear(&mut self) {
        self.members.clear();
        self.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn obj_key_tracks_identity_not_value() {
        let a = Arc::new(7u32);
        let b = Arc::new(7u32);
        assert_eq!(ObjKey::of(&a), ObjKey::of(&Arc::clone(&a)));
        assert_ne!(ObjKey::of(&a), ObjKey::of(&b));
    }

    #[test]
    fn pending_set_deduplicates_and_keeps_order() {
        let (a, b) = (Arc::new(1u32), Arc::new(2u32));
        let mut set = PendingSet::new();
        assert!(set.insert(&a));
        assert!(set.insert(&b));
        assert!(!set.insert(&a));
        assert_eq!(set.len(), 2);
        let order: Vec<u32> = set.iter().map(|item| **item).collect();
        assert_eq!(order, vec![1, 2]);
        assert!(set.remove(ObjKey::of(&a)));
        assert!(!set.remove(ObjKey::of(&a)));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn cow_snapshot_is_isolated_from_later_mutation() {
        let mut list = TrackedList::new(ListStrategy::CopyOnWrite, vec![Arc::new(1u32)]);
        let snapshot = list.snapshot();
        list.push(Arc::new(2));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn convert_round_trip_preserves_items() {
        let mut list = TrackedList::new(ListStrategy::Plain, vec![Arc::new(1u32), Arc::new(2)]);
        list.convert(ListStrategy::CopyOnWrite);
        list.convert(ListStrategy::Plain);
        assert_eq!(list.len(), 2);
        assert_eq!(*list.get(0).unwrap(), 1);
    }
}
