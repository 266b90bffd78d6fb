//! Relations between entities.
//!
//! A relation field ([`ToOne`] or [`ToMany`]) lives inside its owning
//! entity and is described by static [`RelationInfo`] metadata. Fields are
//! wired to a store once via `attach`; the [`put_with_relations`] driver
//! persists an entity and flushes its pending relation changes in a single
//! transaction.

mod driver;
mod info;
mod list;
mod to_many;
mod to_one;

pub use driver::put_with_relations;
pub use info::{EntityInfo, RelationInfo, RelationKind};
pub use list::ListStrategy;
pub use to_many::{Comparator, Iter, ToMany};
pub use to_one::ToOne;

use crate::error::{RelResult, RelationError};
use relbox_store::{Entity, Ref, Store};
use std::sync::{Arc, Weak};

/// An entity type that declares relations.
///
/// This is the seam generated entity code fills in: it enumerates the
/// relation fields for the flush driver and wires their attachment when
/// instances come out of the store. Entities without relations use the
/// defaults.
pub trait RelatedEntity: Entity + Sized {
    /// Attaches all relation fields of `this` to its store.
    ///
    /// Called for entities returned by lookups and loads, and by the put
    /// driver. Must be idempotent; the first attachment wins.
    fn attach_relations(this: &Ref<Self>, store: &Arc<Store>) {
        let _ = (this, store);
    }

    /// The relation fields of this entity, for the put-path flush.
    fn pending_relations(&self) -> Vec<&dyn PendingRelation> {
        Vec::new()
    }
}

/// A relation field whose tracked changes can be flushed to the store.
pub trait PendingRelation: Send + Sync {
    /// Returns whether unflushed changes exist.
    fn has_pending_changes(&self) -> bool;

    /// Applies pending changes, joining the caller's transaction.
    fn apply_in_txn(&self) -> RelResult<()>;
}

/// Owner and store handles captured by `attach`.
///
/// The owner is held weakly: the relation field lives inside the owning
/// entity, and a strong reference would keep the owner alive forever.
pub(crate) struct Attachment<S> {
    pub(crate) owner: Weak<S>,
    pub(crate) store: Arc<Store>,
}

impl<S> Attachment<S> {
    pub(crate) fn new(owner: &Ref<S>, store: &Arc<Store>) -> Self {
        Self {
            owner: Arc::downgrade(owner),
            store: Arc::clone(store),
        }
    }

    /// Upgrades to the owner and store, or fails as detached.
    pub(crate) fn resolve(&self, entity: &'static str) -> RelResult<(Ref<S>, Arc<Store>)> {
        let owner = self
            .owner
            .upgrade()
            .ok_or(RelationError::Detached { entity })?;
        Ok((owner, Arc::clone(&self.store)))
    }
}
