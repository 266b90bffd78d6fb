//! Single-valued relations.

use crate::error::RelResult;
use crate::relation::info::RelationInfo;
use crate::relation::list::ObjKey;
use crate::relation::{driver, Attachment, PendingRelation, RelatedEntity};
use parking_lot::Mutex;
use relbox_store::{ObjId, Ref, Store};
use std::sync::{Arc, OnceLock};

/// Cached target and the id it was resolved for.
struct ToOneState<T> {
    /// The persisted foreign key.
    target_id: ObjId,
    /// The id `cached` was resolved against, if any resolution happened.
    resolved_id: Option<ObjId>,
    cached: Option<Ref<T>>,
}

/// A single-valued relation from a source entity to a target entity.
///
/// The target is resolved lazily: [`ToOne::get_target`] hits the store only
/// when the cached target does not match the current target id. Setting a
/// fresh (id-less) target defers the foreign key until the target is
/// persisted; the put-path driver resolves it then.
///
/// All methods that touch the store require the field to be attached via
/// [`ToOne::attach`] first.
pub struct ToOne<S: RelatedEntity, T: RelatedEntity> {
    info: &'static RelationInfo<S, T>,
    state: Mutex<ToOneState<T>>,
    attachment: OnceLock<Attachment<S>>,
}

impl<S: RelatedEntity, T: RelatedEntity> ToOne<S, T> {
    /// Creates an unattached field with no target.
    #[must_use]
    pub fn new(info: &'static RelationInfo<S, T>) -> Self {
        Self {
            info,
            state: Mutex::new(ToOneState {
                target_id: ObjId::UNASSIGNED,
                resolved_id: None,
                cached: None,
            }),
            attachment: OnceLock::new(),
        }
    }

    /// Creates an unattached field pointing at an already known target id,
    /// as when materializing a stored entity.
    #[must_use]
    pub fn with_target_id(info: &'static RelationInfo<S, T>, target_id: ObjId) -> Self {
        Self {
            info,
            state: Mutex::new(ToOneState {
                target_id,
                resolved_id: None,
                cached: None,
            }),
            attachment: OnceLock::new(),
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
            .ok_or(crate::RelationError::Detached {
                entity: self.info.source().name(),
            })?
            .resolve(self.info.source().name())
    }

    /// Returns static metadata for this relation.
    #[must_use]
    pub fn info(&self) -> &'static RelationInfo<S, T> {
        self.info
    }

    /// The current foreign key. Unassigned when there is no persisted
    /// target yet.
    #[must_use]
    pub fn target_id(&self) -> ObjId {
        self.state.lock().target_id
    }

    /// Sets the foreign key directly without touching the cached target.
    ///
    /// The next [`ToOne::get_target`] notices the mismatch and re-resolves.
    pub fn set_target_id(&self, target_id: ObjId) {
        self.state.lock().target_id = target_id;
    }

    /// True when the relation points at nothing, neither by id nor by a
    /// cached fresh target.
    #[must_use]
    pub fn is_null(&self) -> bool {
        let state = self.state.lock();
        state.target_id.is_unassigned() && state.cached.is_none()
    }

    /// True when the cached target (or cached absence) matches the current
    /// target id, so [`ToOne::get_target`] would not hit the store.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        let state = self.state.lock();
        state.resolved_id == Some(state.target_id)
    }

    /// The cached target without resolving. `None` when unresolved or when
    /// the relation is null.
    #[must_use]
    pub fn get_cached_target(&self) -> Option<Ref<T>> {
        self.state.lock().cached.clone()
    }

    /// Resolves and returns the target, or `None` when the relation is
    /// null.
    ///
    /// Hits the store only when the cache is stale; a resolved null is
    /// cached too, so repeated calls on a null relation stay cheap.
    pub fn get_target(&self) -> RelResult<Option<Ref<T>>> {
        let target_id = {
            let state = self.state.lock();
            if state.resolved_id == Some(state.target_id) {
                return Ok(state.cached.clone());
            }
            state.target_id
        };
        if target_id.is_unassigned() {
            let mut state = self.state.lock();
            state.cached = None;
            state.resolved_id = Some(ObjId::UNASSIGNED);
            return Ok(None);
        }
        // Resolve outside the lock; lookups may attach further relations.
        let (_, store) = self.attachment()?;
        let found = store.get::<T>(target_id)?;
        if let Some(target) = &found {
            T::attach_relations(target, &store);
        }
        let mut state = self.state.lock();
        state.cached = found.clone();
        state.resolved_id = Some(target_id);
        Ok(found)
    }

    /// Sets the target in memory without persisting anything.
    ///
    /// A persisted target updates the foreign key immediately; a fresh one
    /// leaves it unassigned until the put-path flush assigns it.
    pub fn set_target(&self, target: Option<Ref<T>>) {
        let mut state = self.state.lock();
        match target {
            Some(target) => {
                let id = target.id().get();
                state.target_id = id;
                state.resolved_id = Some(id);
                state.cached = Some(target);
            }
            None => {
                state.target_id = ObjId::UNASSIGNED;
                state.resolved_id = Some(ObjId::UNASSIGNED);
                state.cached = None;
            }
        }
    }

    /// Sets (or clears, with `None`) the target and persists the owner; a
    /// fresh target is persisted too.
    ///
    /// An already persisted target is not re-stored; only the owner's
    /// foreign key is updated.
    pub fn set_and_put_target(&self, target: Option<Ref<T>>) -> RelResult<()> {
        match target {
            Some(target) if target.id().get().is_unassigned() => self.put_both(target),
            target => {
                let (owner, store) = self.attachment()?;
                store.run_in_txn(|| {
                    self.set_target(target);
                    driver::put_with_relations(&store, &owner)?;
                    Ok(())
                })
            }
        }
    }

    /// Sets the target and persists both sides unconditionally.
    ///
    /// `None` clears the relation and persists the owner.
    pub fn set_and_put_target_always(&self, target: Option<Ref<T>>) -> RelResult<()> {
        match target {
            Some(target) => self.put_both(target),
            None => {
                let (owner, store) = self.attachment()?;
                store.run_in_txn(|| {
                    self.set_target(None);
                    driver::put_with_relations(&store, &owner)?;
                    Ok(())
                })
            }
        }
    }

    /// Persists target then owner in one transaction, updating the foreign
    /// key in between.
    fn put_both(&self, target: Ref<T>) -> RelResult<()> {
        let (owner, store) = self.attachment()?;
        store.run_in_txn(|| {
            driver::put_with_relations(&store, &target)?;
            self.set_target(Some(target));
            driver::put_with_relations(&store, &owner)?;
            tracing::debug!(relation = %self.info, "persisted target and owner");
            Ok(())
        })
    }
}

impl<S: RelatedEntity, T: RelatedEntity> PendingRelation for ToOne<S, T> {
    /// A fresh target was set but has no id yet, so the foreign key cannot
    /// be written until the target is persisted.
    fn has_pending_changes(&self) -> bool {
        let state = self.state.lock();
        match &state.cached {
            Some(target) => target.id().get().is_unassigned(),
            None => false,
        }
    }

    /// Persists the cached fresh target and adopts its assigned id as the
    /// foreign key.
    fn apply_in_txn(&self) -> RelResult<()> {
        let target = match self.get_cached_target() {
            Some(target) if target.id().get().is_unassigned() => target,
            _ => return Ok(()),
        };
        let (_, store) = self.attachment()?;
        let id = driver::put_with_relations(&store, &target)?;
        let mut state = self.state.lock();
        // Only adopt the id if the cache still holds the same instance.
        if let Some(cached) = &state.cached {
            if ObjKey::of(cached) == ObjKey::of(&target) {
                state.target_id = id;
                state.resolved_id = Some(id);
            }
        }
        Ok(())
    }
}
