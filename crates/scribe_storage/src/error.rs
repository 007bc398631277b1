//! Error types for storage operations.

use scribe_sync_protocol::{EntityId, EntityKind};
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The backend cannot be reached (disk unmounted, database locked, ...).
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// A stored entity could not be read back.
    #[error("entity {id} is corrupted: {reason}")]
    Corrupted {
        /// The unreadable entity.
        id: EntityId,
        /// Why it could not be read.
        reason: String,
    },

    /// The entity was written under a kind other than its own.
    #[error("entity {id} is a {actual}, not a {expected}")]
    KindMismatch {
        /// Entity id.
        id: EntityId,
        /// Kind the caller asked for.
        expected: EntityKind,
        /// Kind actually stored.
        actual: EntityKind,
    },
}

impl StorageError {
    /// Creates an unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    /// Returns true if the error concerns a single entity rather than the backend.
    pub fn is_entity_local(&self) -> bool {
        matches!(
            self,
            StorageError::Corrupted { .. } | StorageError::KindMismatch { .. }
        )
    }
}
