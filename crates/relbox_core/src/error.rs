//! Error types for the relation engine.

use relbox_store::StoreError;
use thiserror::Error;

/// Result type for relation operations.
pub type RelResult<T> = Result<T, RelationError>;

/// Errors that can occur in relation operations.
#[derive(Debug, Error)]
pub enum RelationError {
    /// Propagated storage failure. Pending change tracking is left intact
    /// so the operation can be retried.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The relation field was used before being attached to a store, or
    /// after its owning entity was dropped.
    #[error("cannot resolve relation of detached {entity}; attach it to a store first")]
    Detached {
        /// Name of the owning entity type.
        entity: &'static str,
    },

    /// Relation changes were applied before the owning entity got an id.
    #[error("source entity {entity} has no id yet; persist it before applying relation changes")]
    OwnerNotPersisted {
        /// Name of the owning entity type.
        entity: &'static str,
    },

    /// The relation metadata does not fit the operation.
    #[error("relation misconfigured: {message}")]
    Misconfigured {
        /// Description of the configuration problem.
        message: String,
    },

    /// Change bookkeeping diverged from the visible list. This indicates a
    /// bug and fails loudly rather than under- or over-counting.
    #[error("relation bookkeeping inconsistency: {message}")]
    Inconsistency {
        /// Description of the inconsistency.
        message: String,
    },
}

impl RelationError {
    /// Creates a misconfiguration error.
    pub fn misconfigured(message: impl Into<String>) -> Self {
        Self::Misconfigured {
            message: message.into(),
        }
    }

    /// Creates a bookkeeping inconsistency error.
    pub fn inconsistency(message: impl Into<String>) -> Self {
        Self::Inconsistency {
            message: message.into(),
        }
    }
}
