//! Typed entity boxes.

use crate::entity::{Entity, Ref};
use crate::error::StoreResult;
use crate::id::ObjId;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Participant in the store-wide transaction scope.
///
/// `begin` takes a snapshot of the committed state, `rollback` restores it,
/// `commit` discards it.
pub(crate) trait TxnParticipant: Send + Sync {
    fn begin(&self);
    fn commit(&self);
    fn rollback(&self);
}

/// A box holding all persisted instances of one entity type.
///
/// Entries are keyed by id in a `BTreeMap`, so scans return ascending id
/// order — the "natural" order relation loads rely on.
pub(crate) struct EntityBox<T: Entity> {
    entries: RwLock<BTreeMap<u64, Ref<T>>>,
    saved: Mutex<Option<BTreeMap<u64, Ref<T>>>>,
    next_id: AtomicU64,
}

impl<T: Entity> EntityBox<T> {
    pub(crate) fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            saved: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// Persists an entity, assigning the next sequential id if it has none.
    ///
    /// An entity that already carries an id is upserted at that id; the
    /// sequence is kept ahead of it so later assignments never collide.
    pub(crate) fn put(&self, obj: &Ref<T>) -> StoreResult<ObjId> {
        let mut entries = self.entries.write();
        let id = obj.id().get();
        let id = if id.is_unassigned() {
            let assigned = ObjId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
            obj.id().assign(assigned);
            assigned
        } else {
            self.next_id.fetch_max(id.as_u64() + 1, Ordering::SeqCst);
            id
        };
        entries.insert(id.as_u64(), Ref::clone(obj));
        Ok(id)
    }

    pub(crate) fn get(&self, id: ObjId) -> Option<Ref<T>> {
        self.entries.read().get(&id.as_u64()).cloned()
    }

    pub(crate) fn delete(&self, id: ObjId) -> bool {
        self.entries.write().remove(&id.as_u64()).is_some()
    }

    pub(crate) fn count(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns all entities in ascending id order.
    pub(crate) fn scan_all(&self) -> Vec<Ref<T>> {
        self.entries.read().values().cloned().collect()
    }
}

impl<T: Entity> TxnParticipant for EntityBox<T> {
    fn begin(&self) {
        *self.saved.lock() = Some(self.entries.read().clone());
    }

    fn commit(&self) {
        *self.saved.lock() = None;
    }

    fn rollback(&self) {
        if let Some(saved) = self.saved.lock().take() {
            *self.entries.write() = saved;
        }
    }
}
