//! # relbox_core
//!
//! Relation change tracking and synchronization for entity objects.
//!
//! This crate provides:
//! - [`ToOne`]: a single-valued relation with a cached, lazily resolved
//!   target
//! - [`ToMany`]: a multi-valued relation that tracks adds and removes in
//!   memory and reconciles them to the store transactionally
//! - [`RelationInfo`] / [`RelationKind`]: static metadata describing how a
//!   relation is persisted (inline foreign key, standalone link table, or
//!   backlink)
//! - [`put_with_relations`]: the put-path driver that persists an entity
//!   and flushes its pending relation changes in one transaction

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod relation;

pub use error::{RelResult, RelationError};
pub use relation::{
    put_with_relations, Comparator, EntityInfo, Iter, ListStrategy, PendingRelation,
    RelatedEntity, RelationInfo, RelationKind, ToMany, ToOne,
};

// Store surface, re-exported so applications depend on one crate.
pub use relbox_store::{Entity, IdCell, ObjId, Ref, RelationId, Store, StoreError, StoreResult};
