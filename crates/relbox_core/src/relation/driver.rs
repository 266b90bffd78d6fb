//! The put-path driver.

use crate::error::RelResult;
use crate::relation::RelatedEntity;
use relbox_store::{ObjId, Ref, Store};
use std::sync::Arc;

/// Persists an entity and flushes its pending relation changes in one
/// transaction.
///
/// The entity is put first so it has an id before its relations are
/// reconciled; then each relation field with pending changes is applied.
/// Applying a relation may recursively put related entities (a fresh
/// to-one target, or the other side of a backlink), all joining the same
/// transaction. Any failure rolls the whole put back and leaves pending
/// change tracking intact for a retry.
pub fn put_with_relations<T: RelatedEntity>(store: &Arc<Store>, obj: &Ref<T>) -> RelResult<ObjId> {
    store.run_in_txn(|| {
        let id = store.put(obj)?;
        T::attach_relations(obj, store);
        for relation in obj.pending_relations() {
            if relation.has_pending_changes() {
                relation.apply_in_txn()?;
            }
        }
        tracing::trace!(entity = T::NAME, %id, "put with relations");
        Ok(id)
    })
}
