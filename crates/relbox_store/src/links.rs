//! Standalone link tables.

use crate::id::ObjId;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Identifier of a standalone link table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RelationId(u64);

impl RelationId {
    /// Creates a new relation id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw id value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rel:{}", self.0)
    }
}

/// All link tables of a store, keyed by relation and source id.
///
/// Rows are sets of target ids, so link modification is idempotent:
/// re-adding an existing pair or removing an absent one is a no-op.
#[derive(Default)]
pub(crate) struct LinkTables {
    live: BTreeMap<(u64, u64), BTreeSet<u64>>,
    saved: Option<BTreeMap<(u64, u64), BTreeSet<u64>>>,
}

impl LinkTables {
    pub(crate) fn begin(&mut self) {
        self.saved = Some(self.live.clone());
    }

    pub(crate) fn commit(&mut self) {
        self.saved = None;
    }

    pub(crate) fn rollback(&mut self) {
        if let Some(saved) = self.saved.take() {
            self.live = saved;
        }
    }

    pub(crate) fn modify(
        &mut self,
        relation: RelationId,
        source: ObjId,
        targets: &[ObjId],
        remove: bool,
    ) {
        let key = (relation.as_u64(), source.as_u64());
        if remove {
            if let Some(row) = self.live.get_mut(&key) {
                for target in targets {
                    row.remove(&target.as_u64());
                }
                if row.is_empty() {
                    self.live.remove(&key);
                }
            }
        } else if !targets.is_empty() {
            let row = self.live.entry(key).or_default();
            for target in targets {
                row.insert(target.as_u64());
            }
        }
    }

    /// Target ids linked to a source, ascending.
    pub(crate) fn related(&self, relation: RelationId, source: ObjId) -> Vec<ObjId> {
        self.live
            .get(&(relation.as_u64(), source.as_u64()))
            .map(|row| row.iter().map(|id| ObjId::new(*id)).collect())
            .unwrap_or_default()
    }

    /// Source ids whose row contains the given target, ascending.
    pub(crate) fn backlinks(&self, relation: RelationId, target: ObjId) -> Vec<ObjId> {
        self.live
            .iter()
            .filter(|((rel, _), row)| *rel == relation.as_u64() && row.contains(&target.as_u64()))
            .map(|((_, source), _)| ObjId::new(*source))
            .collect()
    }

    pub(crate) fn contains(&self, relation: RelationId, source: ObjId, target: ObjId) -> bool {
        self.live
            .get(&(relation.as_u64(), source.as_u64()))
            .is_some_and(|row| row.contains(&target.as_u64()))
    }
}
