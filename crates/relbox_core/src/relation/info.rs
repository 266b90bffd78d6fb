//! Static relation metadata.

use crate::relation::{RelatedEntity, ToMany, ToOne};
use relbox_store::RelationId;
use std::fmt;

/// Describes one side of a relation.
#[derive(Debug, Clone, Copy)]
pub struct EntityInfo {
    name: &'static str,
}

impl EntityInfo {
    /// Creates a descriptor for the entity type with the given name.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self { name }
    }

    /// Returns the entity type name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

/// How a relation is represented in storage.
///
/// Exactly one representation applies to a relation; the variants are
/// mutually exclusive by construction.
pub enum RelationKind<S: RelatedEntity, T: RelatedEntity> {
    /// A to-one relation; the foreign key lives in the [`ToOne`] field of
    /// the source entity.
    InlineForeignKey,
    /// An independent link table of (source id, target id) pairs.
    Standalone {
        /// Id of the link table.
        relation_id: RelationId,
    },
    /// Reverse view of a to-one relation declared on the target entity.
    BacklinkToOne {
        /// Fetches the target-side [`ToOne`] pointing back at the source.
        to_one: fn(&T) -> &ToOne<T, S>,
    },
    /// Reverse view of a standalone to-many relation declared on the
    /// target entity.
    BacklinkToMany {
        /// Id of the link table owned by the target side.
        relation_id: RelationId,
        /// Fetches the target-side [`ToMany`] listing sources.
        to_many: fn(&T) -> &ToMany<T, S>,
    },
}

/// Immutable metadata describing a relation between two entity types.
///
/// Instances are declared as `static` items next to the entity types, the
/// way generated entity code would emit them.
pub struct RelationInfo<S: RelatedEntity, T: RelatedEntity> {
    source: EntityInfo,
    target: EntityInfo,
    kind: RelationKind<S, T>,
}

impl<S: RelatedEntity, T: RelatedEntity> RelationInfo<S, T> {
    /// Metadata for a to-one relation.
    #[must_use]
    pub const fn to_one(source: EntityInfo, target: EntityInfo) -> Self {
        Self {
            source,
            target,
            kind: RelationKind::InlineForeignKey,
        }
    }

    /// Metadata for a standalone to-many relation.
    #[must_use]
    pub const fn standalone(source: EntityInfo, target: EntityInfo, relation_id: RelationId) -> Self {
        Self {
            source,
            target,
            kind: RelationKind::Standalone { relation_id },
        }
    }

    /// Metadata for a to-many relation backing a target-side to-one.
    #[must_use]
    pub const fn backlink_to_one(
        source: EntityInfo,
        target: EntityInfo,
        to_one: fn(&T) -> &ToOne<T, S>,
    ) -> Self {
        Self {
            source,
            target,
            kind: RelationKind::BacklinkToOne { to_one },
        }
    }

    /// Metadata for a to-many relation backing a target-side standalone
    /// to-many.
    #[must_use]
    pub const fn backlink_to_many(
        source: EntityInfo,
        target: EntityInfo,
        relation_id: RelationId,
        to_many: fn(&T) -> &ToMany<T, S>,
    ) -> Self {
        Self {
            source,
            target,
            kind: RelationKind::BacklinkToMany {
                relation_id,
                to_many,
            },
        }
    }

    /// Returns the source entity descriptor.
    #[must_use]
    pub const fn source(&self) -> &EntityInfo {
        &self.source
    }

    /// Returns the target entity descriptor.
    #[must_use]
    pub const fn target(&self) -> &EntityInfo {
        &self.target
    }

    /// Returns how this relation is persisted.
    #[must_use]
    pub const fn kind(&self) -> &RelationKind<S, T> {
        &self.kind
    }

    /// Returns true if this relation is computed from the other side.
    #[must_use]
    pub const fn is_backlink(&self) -> bool {
        matches!(
            self.kind,
            RelationKind::BacklinkToOne { .. } | RelationKind::BacklinkToMany { .. }
        )
    }
}

/// Displays as `Source -> Target`, used in logs and error messages.
impl<S: RelatedEntity, T: RelatedEntity> fmt::Display for RelationInfo<S, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source.name(), self.target.name())
    }
}

impl<S: RelatedEntity, T: RelatedEntity> fmt::Debug for RelationInfo<S, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            RelationKind::InlineForeignKey => "inline foreign key",
            RelationKind::Standalone { .. } => "standalone",
            RelationKind::BacklinkToOne { .. } => "backlink (to-one)",
            RelationKind::BacklinkToMany { .. } => "backlink (to-many)",
        };
        f.debug_struct("RelationInfo")
            .field("source", &self.source.name())
            .field("target", &self.target.name())
            .field("kind", &kind)
            .finish()
    }
}
