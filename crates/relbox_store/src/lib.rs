//! # relbox_store
//!
//! Object-native storage collaborator for the relbox relation engine.
//!
//! This crate provides:
//! - Identity keys (`ObjId`, `IdCell`) assigned on first persist
//! - Typed entity boxes with point lookup, upsert and full scans
//! - Standalone link tables mapping source ids to target ids
//! - A single-writer, reentrant transaction scope with all-or-nothing
//!   rollback
//!
//! The relation engine (`relbox_core`) only ever talks to the [`Store`]
//! surface; everything behind it is an in-memory reference implementation.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod boxes;
mod entity;
mod error;
mod id;
mod links;
mod store;

pub use entity::{Entity, Ref};
pub use error::{StoreError, StoreResult};
pub use id::{IdCell, ObjId};
pub use links::RelationId;
pub use store::Store;
