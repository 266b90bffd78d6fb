//! Entity trait and shared references.

use crate::id::IdCell;
use std::sync::Arc;

/// Shared handle to an entity instance.
///
/// Entities are shared, internally synchronized objects: the identity key
/// lives in an [`IdCell`], relation fields carry their own locks, and the
/// box holds the same handle the application sees.
pub type Ref<T> = Arc<T>;

/// A storable entity type.
///
/// Implementors embed an [`IdCell`] and expose it through [`Entity::id`];
/// the box reads and assigns the identity key through that slot.
pub trait Entity: Send + Sync + 'static {
    /// Entity type name, used in error messages and diagnostics.
    const NAME: &'static str;

    /// Returns the identity key slot of this instance.
    fn id(&self) -> &IdCell;
}
