//! Multi-valued relations with in-memory change tracking.

use crate::error::{RelResult, RelationError};
use crate::relation::info::{RelationInfo, RelationKind};
use crate::relation::list::{ListStrategy, ObjKey, PendingSet, TrackedList};
use crate::relation::{driver, Attachment, PendingRelation, RelatedEntity};
use parking_lot::Mutex;
use relbox_store::{ObjId, Ref, Store};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, OnceLock};

/// Ordering applied to the list whenever it is loaded from the store.
pub type Comparator<T> = Box<dyn Fn(&T, &T) -> Ordering + Send + Sync>;

/// Everything guarded by the single relation lock.
struct ToManyState<T> {
    /// The visible list; `None` until first loaded.
    list: Option<TrackedList<T>>,
    /// Occurrence count per entity identity, covering the whole list.
    counts: HashMap<ObjKey, usize>,
    pending_adds: PendingSet<T>,
    pending_removes: PendingSet<T>,
    /// Flush staging: targets to persist before link maintenance.
    to_persist: Vec<Ref<T>>,
    /// Flush staging: targets to delete from their box.
    to_delete: Vec<Ref<T>>,
    strategy: ListStrategy,
    comparator: Option<Comparator<T>>,
}

impl<T> ToManyState<T> {
    /// The visible list, materializing an empty one if needed.
    ///
    /// Callers must have run the load path first; this only papers over the
    /// `Option` without a second store query.
    fn list_mut(&mut self) -> &mut TrackedList<T> {
        let strategy = self.strategy;
        self.list
            .get_or_insert_with(|| TrackedList::new(strategy, Vec::new()))
    }
}

/// A multi-valued relation from a source entity to target entities.
///
/// The visible list is loaded lazily on first read. Mutations are plain
/// list edits plus change tracking: adds and removes accumulate in pending
/// sets until [`ToMany::apply_changes_to_db`] (or the put-path driver)
/// reconciles them with the store in one transaction. A remove that undoes
/// a pending add cancels it instead of recording both, and vice versa, so a
/// no-op editing session flushes nothing.
///
/// Duplicates are tracked by occurrence count: the same instance may appear
/// several times in the list but produces at most one link row, and is only
/// marked for removal when its last occurrence goes away.
pub struct ToMany<S: RelatedEntity, T: RelatedEntity> {
    info: &'static RelationInfo<S, T>,
    state: Mutex<ToManyState<T>>,
    attachment: OnceLock<Attachment<S>>,
    /// Whether flushed removals also delete the target entity from its box.
    remove_from_target_box: AtomicBool,
}

impl<S: RelatedEntity, T: RelatedEntity> ToMany<S, T> {
    /// Creates an unattached field with an unloaded list.
    #[must_use]
    pub fn new(info: &'static RelationInfo<S, T>) -> Self {
        Self {
            info,
            state: Mutex::new(ToManyState {
                list: None,
                counts: HashMap::new(),
                pending_adds: PendingSet::new(),
                pending_removes: PendingSet::new(),
                to_persist: Vec::new(),
                to_delete: Vec::new(),
                strategy: ListStrategy::default(),
                comparator: None,
            }),
            attachment: OnceLock::new(),
            remove_from_target_box: AtomicBool::new(false),
        }
    }

    /// Wires this field to its owning entity and store.
    ///
    /// Idempotent; the first attachment wins.
    pub fn attach(&self, owner: &Ref<S>, store: &Arc<Store>) {
        let _ = self.attachment.set(Attachment::new(owner, store));
    }

    fn attachment(&self) -> RelResult<(Ref<S>, Arc<Store>)> {
        self.attachment
            .get()
            .ok_or(RelationError::Detached {
                entity: self.info.source().name(),
            })?
            .resolve(self.info.source().name())
    }

    /// Returns static metadata for this relation.
    #[must_use]
    pub fn info(&self) -> &'static RelationInfo<S, T> {
        self.info
    }

    /// Replaces the ordering applied on load. Takes effect the next time
    /// the list is (re)loaded.
    pub fn set_comparator(&self, comparator: Option<Comparator<T>>) {
        self.state.lock().comparator = comparator;
    }

    /// Switches the backing list representation, converting in place if the
    /// list is already loaded.
    pub fn set_list_strategy(&self, strategy: ListStrategy) {
        let mut state = self.state.lock();
        state.strategy = strategy;
        if let Some(list) = &mut state.list {
            list.convert(strategy);
        }
    }

    /// Controls whether flushed removals also delete targets from their
    /// box. Off by default: removal only severs the relation.
    pub fn set_remove_from_target_box(&self, remove: bool) {
        self.remove_from_target_box
            .store(remove, AtomicOrdering::SeqCst);
    }

    /// True once the list has been loaded (or initialized empty).
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.state.lock().list.is_some()
    }

    /// Number of tracked pending additions.
    #[must_use]
    pub fn add_count(&self) -> usize {
        self.state.lock().pending_adds.len()
    }

    /// Number of tracked pending removals.
    #[must_use]
    pub fn remove_count(&self) -> usize {
        self.state.lock().pending_removes.len()
    }

    /// Whether a flush would write anything.
    #[must_use]
    pub fn has_pending_db_changes(&self) -> bool {
        let state = self.state.lock();
        !state.pending_adds.is_empty() || !state.pending_removes.is_empty()
    }

    /// Discards the loaded list and all tracked changes.
    ///
    /// The next read reloads from the store. Unflushed changes are lost;
    /// this is logged because it is usually a bug in the caller.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        if !state.pending_adds.is_empty() || !state.pending_removes.is_empty() {
            tracing::warn!(
                relation = %self.info,
                adds = state.pending_adds.len(),
                removes = state.pending_removes.len(),
                "reset discards unflushed relation changes"
            );
        }
        state.list = None;
        state.counts.clear();
        state.pending_adds.clear();
        state.pending_removes.clear();
        state.to_persist.clear();
        state.to_delete.clear();
    }

    // ---- load path ----

    /// Loads the list from the store if not present yet.
    ///
    /// A detached field or an owner without an id loads as empty without
    /// querying: nothing can be stored for it yet.
    fn ensure_loaded(&self, state: &mut ToManyState<T>) -> RelResult<()> {
        if state.list.is_some() {
            return Ok(());
        }
        let loaded = match self.attachment.get() {
            None => Vec::new(),
            Some(attachment) => {
                let (owner, store) = attachment.resolve(self.info.source().name())?;
                let owner_id = owner.id().get();
                if owner_id.is_unassigned() {
                    Vec::new()
                } else {
                    self.query_targets(&store, owner_id)?
                }
            }
        };
        let mut list = TrackedList::new(state.strategy, loaded);
        if let Some(compare) = &state.comparator {
            list.sort_by(|a, b| compare(a, b));
        }
        state.counts.clear();
        for index in 0..list.len() {
            if let Some(item) = list.get(index) {
                *state.counts.entry(ObjKey::of(&item)).or_insert(0) += 1;
            }
        }
        tracing::debug!(relation = %self.info, targets = list.len(), "loaded relation list");
        state.list = Some(list);
        Ok(())
    }

    /// Fetches the current targets for a persisted owner, per relation
    /// kind.
    fn query_targets(&self, store: &Arc<Store>, owner_id: ObjId) -> RelResult<Vec<Ref<T>>> {
        let targets = match self.info.kind() {
            RelationKind::Standalone { relation_id } => {
                let mut targets = Vec::new();
                for target_id in store.related_ids(*relation_id, owner_id) {
                    if let Some(target) = store.get::<T>(target_id)? {
                        targets.push(target);
                    }
                }
                targets
            }
            RelationKind::BacklinkToOne { to_one } => store
                .scan_all::<T>()?
                .into_iter()
                .filter(|target| to_one(target).target_id() == owner_id)
                .collect(),
            RelationKind::BacklinkToMany { relation_id, .. } => {
                let mut targets = Vec::new();
                for target_id in store.backlink_source_ids(*relation_id, owner_id) {
                    if let Some(target) = store.get::<T>(target_id)? {
                        targets.push(target);
                    }
                }
                targets
            }
            RelationKind::InlineForeignKey => {
                return Err(RelationError::misconfigured(format!(
                    "relation {} is to-one metadata used on a to-many field",
                    self.info
                )))
            }
        };
        for target in &targets {
            T::attach_relations(target, store);
        }
        Ok(targets)
    }

    // ---- change tracking ----

    /// Records one more occurrence of `target` in the list.
    ///
    /// An add that undoes a pending remove cancels it; the pair nets to no
    /// change.
    fn note_added(state: &mut ToManyState<T>, target: &Ref<T>) {
        let key = ObjKey::of(target);
        *state.counts.entry(key).or_insert(0) += 1;
        if !state.pending_removes.remove(key) {
            state.pending_adds.insert(target);
        }
    }

    /// Records one less occurrence of `target`. Only the last occurrence
    /// marks the target as pending removal.
    fn note_removed(state: &mut ToManyState<T>, target: &Ref<T>) -> RelResult<()> {
        let key = ObjKey::of(target);
        let count = state.counts.get_mut(&key).ok_or_else(|| {
            RelationError::inconsistency("removed a target with no tracked occurrences")
        })?;
        *count -= 1;
        if *count > 0 {
            return Ok(());
        }
        state.counts.remove(&key);
        if !state.pending_adds.remove(key) {
            state.pending_removes.insert(target);
        }
        Ok(())
    }

    // ---- list edits ----

    /// Appends a target and tracks the addition.
    pub fn add(&self, target: Ref<T>) -> RelResult<()> {
        let mut state = self.state.lock();
        self.ensure_loaded(&mut state)?;
        Self::note_added(&mut state, &target);
        state.list_mut().push(target);
        Ok(())
    }

    /// Inserts a target at `index` and tracks the addition.
    ///
    /// # Panics
    ///
    /// Panics if `index > len`, like `Vec::insert`.
    pub fn insert(&self, index: usize, target: Ref<T>) -> RelResult<()> {
        let mut state = self.state.lock();
        self.ensure_loaded(&mut state)?;
        Self::note_added(&mut state, &target);
        state.list_mut().insert(index, target);
        Ok(())
    }

    /// Appends all targets, tracking each addition.
    pub fn add_all(&self, targets: impl IntoIterator<Item = Ref<T>>) -> RelResult<()> {
        let mut state = self.state.lock();
        self.ensure_loaded(&mut state)?;
        for target in targets {
            Self::note_added(&mut state, &target);
            state.list_mut().push(target);
        }
        Ok(())
    }

    /// Removes the first occurrence of `target` (by identity). Returns
    /// whether it was present.
    pub fn remove(&self, target: &Ref<T>) -> RelResult<bool> {
        let mut state = self.state.lock();
        self.ensure_loaded(&mut state)?;
        let key = ObjKey::of(target);
        let Some(index) = state.list_mut().position(key) else {
            return Ok(false);
        };
        let removed = state.list_mut().remove(index);
        Self::note_removed(&mut state, &removed)?;
        Ok(true)
    }

    /// Removes and returns the target at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds, like `Vec::remove`.
    pub fn remove_at(&self, index: usize) -> RelResult<Ref<T>> {
        let mut state = self.state.lock();
        self.ensure_loaded(&mut state)?;
        let removed = state.list_mut().remove(index);
        Self::note_removed(&mut state, &removed)?;
        Ok(removed)
    }

    /// Removes the first target with the given id, if any.
    pub fn remove_by_id(&self, id: ObjId) -> RelResult<Option<Ref<T>>> {
        let mut state = self.state.lock();
        self.ensure_loaded(&mut state)?;
        let mut found = None;
        for index in 0..state.list_mut().len() {
            if let Some(item) = state.list_mut().get(index) {
                if item.id().get() == id {
                    found = Some(index);
                    break;
                }
            }
        }
        let Some(index) = found else {
            return Ok(None);
        };
        let removed = state.list_mut().remove(index);
        Self::note_removed(&mut state, &removed)?;
        Ok(Some(removed))
    }

    /// Removes every listed target. Returns whether anything was removed.
    pub fn remove_all(&self, targets: &[Ref<T>]) -> RelResult<bool> {
        let mut any = false;
        for target in targets {
            any |= self.remove(target)?;
        }
        Ok(any)
    }

    /// Keeps only the targets for which `keep` returns true.
    pub fn retain(&self, mut keep: impl FnMut(&T) -> bool) -> RelResult<()> {
        let mut state = self.state.lock();
        self.ensure_loaded(&mut state)?;
        // Walk backwards so removals do not shift pending indices.
        for index in (0..state.list_mut().len()).rev() {
            let item = match state.list_mut().get(index) {
                Some(item) => item,
                None => continue,
            };
            if !keep(&item) {
                let removed = state.list_mut().remove(index);
                Self::note_removed(&mut state, &removed)?;
            }
        }
        Ok(())
    }

    /// Replaces the target at `index`, returning the old one. Tracks a
    /// removal of the old and an addition of the new.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    pub fn set(&self, index: usize, target: Ref<T>) -> RelResult<Ref<T>> {
        let mut state = self.state.lock();
        self.ensure_loaded(&mut state)?;
        Self::note_added(&mut state, &target);
        let old = state.list_mut().set(index, target);
        Self::note_removed(&mut state, &old)?;
        Ok(old)
    }

    /// Removes all targets, tracking each removal.
    pub fn clear(&self) -> RelResult<()> {
        let mut state = self.state.lock();
        self.ensure_loaded(&mut state)?;
        let snapshot = state.list_mut().snapshot();
        for item in snapshot.iter() {
            Self::note_removed(&mut state, item)?;
        }
        state.list_mut().clear();
        Ok(())
    }

    // ---- reads ----

    /// Number of targets in the list.
    pub fn len(&self) -> RelResult<usize> {
        let mut state = self.state.lock();
        self.ensure_loaded(&mut state)?;
        Ok(state.list_mut().len())
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> RelResult<bool> {
        Ok(self.len()? == 0)
    }

    /// The target at `index`, or `None` if out of bounds.
    pub fn get(&self, index: usize) -> RelResult<Option<Ref<T>>> {
        let mut state = self.state.lock();
        self.ensure_loaded(&mut state)?;
        Ok(state.list_mut().get(index))
    }

    /// Whether `target` (by identity) is in the list.
    pub fn contains(&self, target: &Ref<T>) -> RelResult<bool> {
        let mut state = self.state.lock();
        self.ensure_loaded(&mut state)?;
        Ok(state.counts.contains_key(&ObjKey::of(target)))
    }

    /// Index of the first occurrence of `target` (by identity).
    pub fn index_of(&self, target: &Ref<T>) -> RelResult<Option<usize>> {
        let mut state = self.state.lock();
        self.ensure_loaded(&mut state)?;
        Ok(state.list_mut().position(ObjKey::of(target)))
    }

    /// The first target with the given id, if any.
    pub fn get_by_id(&self, id: ObjId) -> RelResult<Option<Ref<T>>> {
        let snapshot = self.snapshot()?;
        Ok(snapshot.iter().find(|item| item.id().get() == id).cloned())
    }

    /// Index of the first target with the given id.
    pub fn index_of_id(&self, id: ObjId) -> RelResult<Option<usize>> {
        let snapshot = self.snapshot()?;
        Ok(snapshot.iter().position(|item| item.id().get() == id))
    }

    /// Whether `check` holds for at least one target.
    pub fn has_any(&self, mut check: impl FnMut(&T) -> bool) -> RelResult<bool> {
        let snapshot = self.snapshot()?;
        Ok(snapshot.iter().any(|item| check(item)))
    }

    /// Whether `check` holds for every target. False for an empty list.
    pub fn all_match(&self, mut check: impl FnMut(&T) -> bool) -> RelResult<bool> {
        let snapshot = self.snapshot()?;
        Ok(!snapshot.is_empty() && snapshot.iter().all(|item| check(item)))
    }

    /// A snapshot iterator over the current list. Later mutations do not
    /// affect it.
    pub fn iter(&self) -> RelResult<Iter<T>> {
        Ok(Iter {
            items: self.snapshot()?,
            index: 0,
        })
    }

    /// The current targets as a plain vector.
    pub fn to_vec(&self) -> RelResult<Vec<Ref<T>>> {
        Ok(self.snapshot()?.as_slice().to_vec())
    }

    /// The targets in `range` as a vector. Out-of-range indices are
    /// clamped.
    pub fn slice(&self, range: Range<usize>) -> RelResult<Vec<Ref<T>>> {
        let snapshot = self.snapshot()?;
        let start = range.start.min(snapshot.len());
        let end = range.end.min(snapshot.len()).max(start);
        Ok(snapshot[start..end].to_vec())
    }

    fn snapshot(&self) -> RelResult<Arc<Vec<Ref<T>>>> {
        let mut state = self.state.lock();
        self.ensure_loaded(&mut state)?;
        Ok(state.list_mut().snapshot())
    }

    /// Sorts the list by target id, ascending and stable; targets without
    /// an id sort last in their current relative order.
    pub fn sort_by_id(&self) -> RelResult<()> {
        let mut state = self.state.lock();
        self.ensure_loaded(&mut state)?;
        state.list_mut().sort_by_key(|item| {
            let id = item.id().get();
            if id.is_unassigned() {
                u64::MAX
            } else {
                id.as_u64()
            }
        });
        Ok(())
    }

    // ---- flush ----

    /// Reconciles tracked changes with the store in one transaction.
    ///
    /// On success all pending state is cleared. On failure the transaction
    /// rolls back and pending changes are kept, so the call can be retried.
    /// With nothing pending, no transaction is opened at all.
    pub fn apply_changes_to_db(&self) -> RelResult<()> {
        let (owner, store) = self.attachment()?;
        let owner_id = owner.id().get();
        if owner_id.is_unassigned() {
            return Err(RelationError::OwnerNotPersisted {
                entity: self.info.source().name(),
            });
        }
        if !self.has_pending_db_changes() {
            return Ok(());
        }
        // The relation lock is taken inside the transaction scope. A
        // backlink flush reaches into the other side's relation lock, so
        // the order must be transaction first, relation lock second on
        // every path, or two concurrent flushes of linked relations
        // deadlock.
        store.run_in_txn(|| {
            let mut state = self.state.lock();
            if self.prepare(&mut state, &owner, owner_id, &store)? {
                self.apply_prepared(&mut state, &store, owner_id)?;
            }
            tracing::debug!(
                relation = %self.info,
                adds = state.pending_adds.len(),
                removes = state.pending_removes.len(),
                "applied relation changes"
            );
            state.pending_adds.clear();
            state.pending_removes.clear();
            state.to_persist.clear();
            state.to_delete.clear();
            Ok(())
        })
    }

    /// Stages store work from the pending sets. Returns whether any store
    /// writes are needed.
    ///
    /// For backlink relations this is also where the other side is
    /// updated: target-side foreign keys and lists change here, and the
    /// affected targets are queued for persisting.
    fn prepare(
        &self,
        state: &mut ToManyState<T>,
        owner: &Ref<S>,
        owner_id: ObjId,
        store: &Arc<Store>,
    ) -> RelResult<bool> {
        state.to_persist.clear();
        state.to_delete.clear();
        if state.pending_adds.is_empty() && state.pending_removes.is_empty() {
            return Ok(false);
        }
        let remove_from_box = self.remove_from_target_box.load(AtomicOrdering::SeqCst);
        match self.info.kind() {
            RelationKind::Standalone { .. } => {
                for target in state.pending_adds.iter() {
                    if Self::needs_persist(store, target)? {
                        state.to_persist.push(Ref::clone(target));
                    }
                }
                if remove_from_box {
                    for target in state.pending_removes.iter() {
                        state.to_delete.push(Ref::clone(target));
                    }
                }
                // Link rows always change, even with no entity writes.
                Ok(true)
            }
            RelationKind::BacklinkToOne { to_one } => {
                for target in state.pending_adds.iter() {
                    let back = to_one(target);
                    if back.target_id() != owner_id {
                        back.set_target(Some(Ref::clone(owner)));
                        state.to_persist.push(Ref::clone(target));
                    } else if Self::needs_persist(store, target)? {
                        state.to_persist.push(Ref::clone(target));
                    }
                }
                for target in state.pending_removes.iter() {
                    let back = to_one(target);
                    // A target re-pointed at another owner in the meantime
                    // is no longer ours to touch.
                    if back.target_id() != owner_id {
                        continue;
                    }
                    back.set_target(None);
                    if !target.id().get().is_unassigned() {
                        if remove_from_box {
                            state.to_delete.push(Ref::clone(target));
                        } else {
                            state.to_persist.push(Ref::clone(target));
                        }
                    }
                }
                Ok(!state.to_persist.is_empty() || !state.to_delete.is_empty())
            }
            RelationKind::BacklinkToMany { to_many, .. } => {
                for target in state.pending_adds.iter() {
                    let back = to_many(target);
                    if back.index_of_id(owner_id)?.is_none() {
                        back.add(Ref::clone(owner))?;
                        state.to_persist.push(Ref::clone(target));
                    } else if Self::needs_persist(store, target)? {
                        state.to_persist.push(Ref::clone(target));
                    }
                }
                for target in state.pending_removes.iter() {
                    let back = to_many(target);
                    // Only targets whose own list still references the
                    // owner are updated and written.
                    if back.remove_by_id(owner_id)?.is_none() {
                        continue;
                    }
                    if !target.id().get().is_unassigned() {
                        if remove_from_box {
                            state.to_delete.push(Ref::clone(target));
                        } else {
                            state.to_persist.push(Ref::clone(target));
                        }
                    }
                }
                Ok(!state.to_persist.is_empty() || !state.to_delete.is_empty())
            }
            RelationKind::InlineForeignKey => Err(RelationError::misconfigured(format!(
                "relation {} is to-one metadata used on a to-many field",
                self.info
            ))),
        }
    }

    /// Whether an added target must be written: it has no id yet, or its
    /// row is missing because an earlier flush attempt was rolled back
    /// (ids are never rewound, so the instance keeps its id).
    ///
    /// Already stored targets are deliberately not re-put: re-putting
    /// would flush their own relations again, which can loop back into a
    /// flush that is still in progress.
    fn needs_persist(store: &Arc<Store>, target: &Ref<T>) -> RelResult<bool> {
        let id = target.id().get();
        if id.is_unassigned() {
            return Ok(true);
        }
        Ok(store.get::<T>(id)?.is_none())
    }

    /// Runs the staged work inside the caller's transaction: persist and
    /// delete queued targets, then fix up link rows (removes first, then
    /// adds).
    fn apply_prepared(
        &self,
        state: &mut ToManyState<T>,
        store: &Arc<Store>,
        owner_id: ObjId,
    ) -> RelResult<()> {
        for target in &state.to_persist {
            driver::put_with_relations(store, target)?;
        }
        for target in &state.to_delete {
            let id = target.id().get();
            if !id.is_unassigned() {
                store.delete::<T>(id)?;
            }
        }
        if let RelationKind::Standalone { relation_id } = self.info.kind() {
            let remove_ids = Self::link_ids(state.pending_removes.iter())?;
            let add_ids = Self::link_ids(state.pending_adds.iter())?;
            store.modify_links(*relation_id, owner_id, &remove_ids, true)?;
            store.modify_links(*relation_id, owner_id, &add_ids, false)?;
        }
        Ok(())
    }

    /// Ids for link maintenance; every target must have one by now.
    fn link_ids<'a>(targets: impl Iterator<Item = &'a Ref<T>>) -> RelResult<Vec<ObjId>> {
        targets
            .map(|target| {
                let id = target.id().get();
                if id.is_unassigned() {
                    Err(RelationError::inconsistency(
                        "link maintenance reached a target without an id",
                    ))
                } else {
                    Ok(id)
                }
            })
            .collect()
    }
}

impl<S: RelatedEntity, T: RelatedEntity> PendingRelation for ToMany<S, T> {
    fn has_pending_changes(&self) -> bool {
        self.has_pending_db_changes()
    }

    fn apply_in_txn(&self) -> RelResult<()> {
        self.apply_changes_to_db()
    }
}

/// Snapshot iterator over a [`ToMany`] list.
pub struct Iter<T> {
    items: Arc<Vec<Ref<T>>>,
    index: usize,
}

impl<T> Iterator for Iter<T> {
    type Item = Ref<T>;

    fn next(&mut self) -> Option<Ref<T>> {
        let item = self.items.get(self.index).cloned();
        self.index += item.is_some() as usize;
        item
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.items.len().saturating_sub(self.index);
        (remaining, Some(remaining))
    }
}

impl<T> ExactSizeIterator for Iter<T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relation::info::EntityInfo;
    use relbox_store::{Entity, IdCell, RelationId};

    struct Item {
        id: IdCell,
        label: &'static str,
    }

    impl Entity for Item {
        const NAME: &'static str = "Item";

        fn id(&self) -> &IdCell {
            &self.id
        }
    }

    impl RelatedEntity for Item {}

    struct Basket {
        id: IdCell,
        items: ToMany<Basket, Item>,
    }

    impl Entity for Basket {
        const NAME: &'static str = "Basket";

        fn id(&self) -> &IdCell {
            &self.id
        }
    }

    impl RelatedEntity for Basket {
        fn attach_relations(this: &Ref<Self>, store: &Arc<Store>) {
            this.items.attach(this, store);
        }

        fn pending_relations(&self) -> Vec<&dyn PendingRelation> {
            vec![&self.items]
        }
    }

    static BASKET_ITEMS: RelationInfo<Basket, Item> = RelationInfo::standalone(
        EntityInfo::new("Basket"),
        EntityInfo::new("Item"),
        RelationId::new(1),
    );

    fn basket() -> Ref<Basket> {
        Ref::new(Basket {
            id: IdCell::new(),
            items: ToMany::new(&BASKET_ITEMS),
        })
    }

    fn item(label: &'static str) -> Ref<Item> {
        Ref::new(Item {
            id: IdCell::new(),
            label,
        })
    }

    fn item_with_id(label: &'static str, id: u64) -> Ref<Item> {
        Ref::new(Item {
            id: IdCell::with_id(ObjId::new(id)),
            label,
        })
    }

    fn store() -> Arc<Store> {
        let store = Store::new();
        store.register::<Basket>().unwrap();
        store.register::<Item>().unwrap();
        store
    }

    #[test]
    fn fresh_owner_loads_empty_without_store() {
        // No registration at all: a load attempt would fail, proving the
        // unassigned-owner path never queries.
        let store = Store::new();
        let b = basket();
        Basket::attach_relations(&b, &store);
        assert_eq!(b.items.len().unwrap(), 0);
        assert!(b.items.is_resolved());
    }

    #[test]
    fn add_then_remove_cancels_cleanly() {
        let b = basket();
        let a = item("a");
        b.items.add(Ref::clone(&a)).unwrap();
        assert_eq!(b.items.add_count(), 1);

        assert!(b.items.remove(&a).unwrap());
        assert_eq!(b.items.add_count(), 0);
        assert_eq!(b.items.remove_count(), 0);
        assert!(!b.items.has_pending_db_changes());
        assert_eq!(b.items.len().unwrap(), 0);
    }

    #[test]
    fn remove_then_readd_cancels_cleanly() {
        let store = store();
        let b = basket();
        let a = item("a");
        store.put(&b).unwrap();
        let a_id = store.put(&a).unwrap();
        store
            .modify_links(RelationId::new(1), b.id().get(), &[a_id], false)
            .unwrap();
        Basket::attach_relations(&b, &store);

        let loaded = b.items.get(0).unwrap().unwrap();
        assert!(b.items.remove(&loaded).unwrap());
        assert_eq!(b.items.remove_count(), 1);

        b.items.add(loaded).unwrap();
        assert_eq!(b.items.add_count(), 0);
        assert_eq!(b.items.remove_count(), 0);
        assert_eq!(b.items.len().unwrap(), 1);
    }

    #[test]
    fn duplicates_count_occurrences() {
        let b = basket();
        let a = item("a");
        b.items.add(Ref::clone(&a)).unwrap();
        b.items.add(Ref::clone(&a)).unwrap();
        assert_eq!(b.items.len().unwrap(), 2);
        // One identity, one pending add.
        assert_eq!(b.items.add_count(), 1);

        assert!(b.items.remove(&a).unwrap());
        // Still one occurrence left; the add is still pending.
        assert_eq!(b.items.add_count(), 1);
        assert!(b.items.contains(&a).unwrap());

        assert!(b.items.remove(&a).unwrap());
        assert_eq!(b.items.add_count(), 0);
        assert!(!b.items.contains(&a).unwrap());
    }

    #[test]
    fn set_tracks_both_sides() {
        let b = basket();
        let a = item("a");
        let c = item("c");
        b.items.add(Ref::clone(&a)).unwrap();
        let old = b.items.set(0, Ref::clone(&c)).unwrap();
        assert_eq!(old.label, "a");
        // The add of "a" cancelled against its removal; only "c" pends.
        assert_eq!(b.items.add_count(), 1);
        assert_eq!(b.items.remove_count(), 0);
        assert_eq!(b.items.get(0).unwrap().unwrap().label, "c");
    }

    #[test]
    fn clear_tracks_all_removals() {
        let store = store();
        let b = basket();
        store.put(&b).unwrap();
        let (x, y) = (item("x"), item("y"));
        let x_id = store.put(&x).unwrap();
        let y_id = store.put(&y).unwrap();
        store
            .modify_links(RelationId::new(1), b.id().get(), &[x_id, y_id], false)
            .unwrap();
        Basket::attach_relations(&b, &store);

        assert_eq!(b.items.len().unwrap(), 2);
        b.items.clear().unwrap();
        assert_eq!(b.items.len().unwrap(), 0);
        assert_eq!(b.items.remove_count(), 2);
    }

    #[test]
    fn retain_removes_and_tracks() {
        let b = basket();
        b.items.add(item("keep")).unwrap();
        b.items.add(item("drop")).unwrap();
        b.items.add(item("keep")).unwrap();
        b.items.retain(|i| i.label == "keep").unwrap();
        assert_eq!(b.items.len().unwrap(), 2);
        assert_eq!(b.items.add_count(), 2);
    }

    #[test]
    fn sort_by_id_is_stable_with_unassigned_last() {
        let b = basket();
        b.items.add(item_with_id("five", 5)).unwrap();
        b.items.add(item("fresh-1")).unwrap();
        b.items.add(item_with_id("three", 3)).unwrap();
        b.items.add(item("fresh-2")).unwrap();
        b.items.add(item_with_id("one", 1)).unwrap();

        b.items.sort_by_id().unwrap();
        let labels: Vec<&str> = b.items.iter().unwrap().map(|i| i.label).collect();
        assert_eq!(labels, vec!["one", "three", "five", "fresh-1", "fresh-2"]);
    }

    #[test]
    fn comparator_orders_loaded_list() {
        let store = store();
        let b = basket();
        store.put(&b).unwrap();
        let ids: Vec<ObjId> = ["b", "a", "c"]
            .into_iter()
            .map(|label| store.put(&item(label)).unwrap())
            .collect();
        store
            .modify_links(RelationId::new(1), b.id().get(), &ids, false)
            .unwrap();
        Basket::attach_relations(&b, &store);
        b.items
            .set_comparator(Some(Box::new(|a: &Item, b: &Item| a.label.cmp(&b.label))));

        let labels: Vec<&str> = b.items.iter().unwrap().map(|i| i.label).collect();
        assert_eq!(labels, vec!["a", "b", "c"]);
    }

    #[test]
    fn reset_discards_pending_changes() {
        let b = basket();
        b.items.add(item("lost")).unwrap();
        assert!(b.items.has_pending_db_changes());
        b.items.reset();
        assert!(!b.items.has_pending_db_changes());
        assert!(!b.items.is_resolved());
    }

    #[test]
    fn apply_requires_persisted_owner() {
        let store = store();
        let b = basket();
        Basket::attach_relations(&b, &store);
        b.items.add(item("a")).unwrap();
        assert!(matches!(
            b.items.apply_changes_to_db(),
            Err(RelationError::OwnerNotPersisted { entity: "Basket" })
        ));
        // The failed flush keeps the pending add for a retry.
        assert_eq!(b.items.add_count(), 1);
    }

    #[test]
    fn detached_apply_errors() {
        let b = basket();
        b.items.add(item("a")).unwrap();
        assert!(matches!(
            b.items.apply_changes_to_db(),
            Err(RelationError::Detached { entity: "Basket" })
        ));
    }

    #[test]
    fn snapshot_iter_unaffected_by_mutation() {
        let b = basket();
        b.items.add(item("a")).unwrap();
        let iter = b.items.iter().unwrap();
        b.items.add(item("b")).unwrap();
        assert_eq!(iter.count(), 1);
        assert_eq!(b.items.len().unwrap(), 2);
    }

    #[test]
    fn slice_clamps_range() {
        let b = basket();
        b.items.add(item("a")).unwrap();
        b.items.add(item("b")).unwrap();
        let tail = b.items.slice(1..10).unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].label, "b");
    }

    #[test]
    fn all_match_false_on_empty() {
        let b = basket();
        assert!(!b.items.all_match(|_| true).unwrap());
        b.items.add(item("a")).unwrap();
        assert!(b.items.all_match(|i| i.label == "a").unwrap());
        assert!(b.items.has_any(|i| i.label == "a").unwrap());
    }
}
