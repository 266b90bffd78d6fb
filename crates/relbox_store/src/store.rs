//! The store: boxes, link tables, and the transaction scope.

use crate::boxes::{EntityBox, TxnParticipant};
use crate::entity::{Entity, Ref};
use crate::error::{StoreError, StoreResult};
use crate::id::ObjId;
use crate::links::{LinkTables, RelationId};
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use std::any::{Any, TypeId};
use std::cell::Cell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Fail point value meaning "disabled".
const NO_FAILPOINT: usize = usize::MAX;

/// An in-memory entity store with boxes, link tables and transactions.
///
/// ## Transactions
///
/// The store is single-writer: [`Store::run_in_txn`] holds a reentrant
/// lock for the duration of the work, so a nested call on the same thread
/// joins the enclosing transaction while other threads block. Commit and
/// rollback happen only at the outermost level; rollback restores box
/// contents and link tables from snapshots taken at begin.
///
/// Rollback does not undo in-memory mutations of entity fields: an id
/// assigned during an aborted transaction stays assigned (id sequences are
/// never rewound), and relation fields already updated on shared entity
/// instances keep their values.
///
/// # Example
///
/// ```rust,ignore
/// let store = Store::new();
/// store.register::<Order>()?;
/// let order = Ref::new(Order::new("o-1"));
/// let id = store.put(&order)?;
/// assert_eq!(store.get::<Order>(id)?.unwrap().id().get(), id);
/// ```
pub struct Store {
    /// Typed box lookup by entity type.
    boxes: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
    /// The same boxes as transaction participants.
    participants: RwLock<Vec<Arc<dyn TxnParticipant>>>,
    /// All standalone link tables.
    links: Mutex<LinkTables>,
    /// Transaction nesting depth of the current writer thread.
    txn_depth: ReentrantMutex<Cell<u32>>,
    /// Writes remaining until an injected failure; `NO_FAILPOINT` disables.
    fail_after_writes: AtomicUsize,
}

impl Store {
    /// Creates a new, empty store.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            boxes: RwLock::new(HashMap::new()),
            participants: RwLock::new(Vec::new()),
            links: Mutex::new(LinkTables::default()),
            txn_depth: ReentrantMutex::new(Cell::new(0)),
            fail_after_writes: AtomicUsize::new(NO_FAILPOINT),
        })
    }

    /// Registers a box for the entity type `T`.
    ///
    /// Registering the same type twice is an error.
    pub fn register<T: Entity>(&self) -> StoreResult<()> {
        let mut boxes = self.boxes.write();
        if boxes.contains_key(&TypeId::of::<T>()) {
            return Err(StoreError::invalid_operation(format!(
                "box for {} already registered",
                T::NAME
            )));
        }
        let entity_box: Arc<EntityBox<T>> = Arc::new(EntityBox::new());
        self.participants.write().push(entity_box.clone());
        boxes.insert(TypeId::of::<T>(), entity_box);
        Ok(())
    }

    fn box_of<T: Entity>(&self) -> StoreResult<Arc<EntityBox<T>>> {
        let boxes = self.boxes.read();
        let any = boxes
            .get(&TypeId::of::<T>())
            .ok_or(StoreError::BoxNotRegistered { name: T::NAME })?;
        Arc::clone(any)
            .downcast::<EntityBox<T>>()
            .map_err(|_| StoreError::BoxNotRegistered { name: T::NAME })
    }

    /// Persists an entity, assigning an id if it has none yet.
    pub fn put<T: Entity>(&self, obj: &Ref<T>) -> StoreResult<ObjId> {
        self.run_in_txn(|| {
            self.check_write()?;
            self.box_of::<T>()?.put(obj)
        })
    }

    /// Point lookup by id. Returns `None` if the entity does not exist.
    pub fn get<T: Entity>(&self, id: ObjId) -> StoreResult<Option<Ref<T>>> {
        Ok(self.box_of::<T>()?.get(id))
    }

    /// Deletes an entity by id. Returns whether it existed.
    pub fn delete<T: Entity>(&self, id: ObjId) -> StoreResult<bool> {
        self.run_in_txn(|| {
            self.check_write()?;
            Ok(self.box_of::<T>()?.delete(id))
        })
    }

    /// Returns the number of entities in the box for `T`.
    pub fn count<T: Entity>(&self) -> StoreResult<usize> {
        Ok(self.box_of::<T>()?.count())
    }

    /// Returns all entities of type `T` in ascending id order.
    ///
    /// **Warning**: this is a full scan; relation loads use it for
    /// foreign-key backlink queries.
    pub fn scan_all<T: Entity>(&self) -> StoreResult<Vec<Ref<T>>> {
        Ok(self.box_of::<T>()?.scan_all())
    }

    /// Target ids linked to `source` in the given link table, ascending.
    pub fn related_ids(&self, relation: RelationId, source: ObjId) -> Vec<ObjId> {
        self.links.lock().related(relation, source)
    }

    /// Source ids whose link row contains `target`, ascending.
    pub fn backlink_source_ids(&self, relation: RelationId, target: ObjId) -> Vec<ObjId> {
        self.links.lock().backlinks(relation, target)
    }

    /// Returns whether the link table contains the given pair.
    pub fn contains_link(&self, relation: RelationId, source: ObjId, target: ObjId) -> bool {
        self.links.lock().contains(relation, source, target)
    }

    /// Adds or removes link rows for a source. Idempotent.
    pub fn modify_links(
        &self,
        relation: RelationId,
        source: ObjId,
        targets: &[ObjId],
        remove: bool,
    ) -> StoreResult<()> {
        self.run_in_txn(|| {
            self.check_write()?;
            self.links.lock().modify(relation, source, targets, remove);
            Ok(())
        })
    }

    /// Executes `work` inside a transaction.
    ///
    /// A nested call on the same thread joins the enclosing transaction;
    /// the outermost level commits on `Ok` and rolls back on `Err`. If
    /// `work` panics the transaction rolls back and the store stays
    /// usable; the panic propagates.
    pub fn run_in_txn<R, E>(&self, work: impl FnOnce() -> Result<R, E>) -> Result<R, E>
    where
        E: From<StoreError>,
    {
        let depth = self.txn_depth.lock();
        let level = depth.get();
        if level == 0 {
            self.begin();
        }
        depth.set(level + 1);
        let mut scope = TxnScope {
            store: self,
            depth: &*depth,
            level,
            completed: false,
        };
        // `scope` restores the depth on every exit path. If `work` unwinds,
        // its Drop also rolls back at the outermost level so the next
        // transaction does not inherit a stale snapshot.
        let result = work();
        scope.completed = true;
        drop(scope);
        if level == 0 {
            if result.is_ok() {
                self.commit();
            } else {
                tracing::debug!("rolling back aborted transaction");
                self.rollback();
            }
        }
        result
    }

    /// Arranges for writes to fail after `writes` more have succeeded.
    ///
    /// Testing aid for transaction abort scenarios; `writes == 0` fails the
    /// very next write.
    pub fn set_fail_after_writes(&self, writes: usize) {
        self.fail_after_writes.store(writes, Ordering::SeqCst);
    }

    /// Clears a previously set fail point.
    pub fn clear_failpoint(&self) {
        self.fail_after_writes.store(NO_FAILPOINT, Ordering::SeqCst);
    }

    fn check_write(&self) -> StoreResult<()> {
        let remaining = self.fail_after_writes.load(Ordering::SeqCst);
        if remaining == NO_FAILPOINT {
            return Ok(());
        }
        if remaining == 0 {
            return Err(StoreError::InjectedFailure);
        }
        self.fail_after_writes.store(remaining - 1, Ordering::SeqCst);
        Ok(())
    }

    fn begin(&self) {
        for participant in self.participants.read().iter() {
            participant.begin();
        }
        self.links.lock().begin();
    }

    fn commit(&self) {
        for participant in self.participants.read().iter() {
            participant.commit();
        }
        self.links.lock().commit();
    }

    fn rollback(&self) {
        for participant in self.participants.read().iter() {
            participant.rollback();
        }
        self.links.lock().rollback();
    }
}

/// Restores the transaction depth when a [`Store::run_in_txn`] level exits,
/// rolling back at the outermost level if the work never completed (i.e.
/// it panicked).
struct TxnScope<'a> {
    store: &'a Store,
    depth: &'a Cell<u32>,
    level: u32,
    completed: bool,
}

impl Drop for TxnScope<'_> {
    fn drop(&mut self) {
        self.depth.set(self.level);
        if !self.completed && self.level == 0 {
            tracing::debug!("rolling back unwound transaction");
            self.store.rollback();
        }
    }
}
