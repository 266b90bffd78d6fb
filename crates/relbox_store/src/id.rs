//! Identity keys.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identity key of an entity.
///
/// Ids are sequential `u64` values assigned by the box on first persist.
/// The value 0 means "not yet persisted".
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjId(u64);

impl ObjId {
    /// The id of an entity that has not been persisted yet.
    pub const UNASSIGNED: ObjId = ObjId(0);

    /// Creates an id from a raw value.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw id value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns true if this id has not been assigned yet.
    #[must_use]
    pub const fn is_unassigned(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for ObjId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjId({})", self.0)
    }
}

impl fmt::Display for ObjId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj:{}", self.0)
    }
}

/// Atomic id slot embedded in an entity.
///
/// The slot starts unassigned and receives its id from the box on first
/// persist. Entities keep an assigned id even if the surrounding
/// transaction aborts; id sequences are never rewound.
#[derive(Debug, Default)]
pub struct IdCell(AtomicU64);

impl IdCell {
    /// Creates an unassigned id slot.
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Creates a slot holding the given id.
    #[must_use]
    pub const fn with_id(id: ObjId) -> Self {
        Self(AtomicU64::new(id.as_u64()))
    }

    /// Returns the current id.
    #[must_use]
    pub fn get(&self) -> ObjId {
        ObjId(self.0.load(Ordering::SeqCst))
    }

    /// Assigns an id. Overwriting an already assigned id is allowed.
    pub fn assign(&self, id: ObjId) {
        self.0.store(id.as_u64(), Ordering::SeqCst);
    }

    /// Returns true if no id has been assigned yet.
    #[must_use]
    pub fn is_unassigned(&self) -> bool {
        self.get().is_unassigned()
    }
}
