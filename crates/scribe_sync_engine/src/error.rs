//! Error types for the sync engine.

use scribe_storage::StorageError;
use scribe_sync_protocol::{EntityId, ProtocolError};
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while allocating entity ids.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocationError {
    /// `claim_next_id` was called before a successful `prepare`.
    #[error("id allocator for project {project} has not been prepared")]
    NotPrepared {
        /// Project name.
        project: String,
    },

    /// A highest-id scanner failed, so the next free id is unknown.
    #[error("scanning {scanner} failed: {source}")]
    ScanFailed {
        /// Name of the failing scanner.
        scanner: String,
        /// Underlying storage error.
        #[source]
        source: StorageError,
    },

    /// Every representable id has been issued.
    #[error("entity id space exhausted")]
    Exhausted,
}

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The transport has been closed.
    #[error("not connected to sync server")]
    NotConnected,

    /// Encoding, decoding or protocol-level validation failed.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The server answered with a message of the wrong type.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Local storage failed as a whole.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Id allocation is unsafe to proceed.
    #[error("allocation error: {0}")]
    Allocation(#[from] AllocationError),

    /// The sync token is missing, mismatched or expired; begin a new sync.
    #[error("sync session invalid: {0}")]
    SessionInvalid(String),

    /// Another sync exchange is already running for this user.
    #[error("a sync is already in progress: {0}")]
    SyncInProgress(String),

    /// The server failed while handling the request.
    #[error("server error: {0}")]
    ServerError(String),

    /// The server refused a malformed request.
    #[error("request rejected: {0}")]
    Rejected(String),

    /// Conflicts still need a decision.
    #[error("{count} unresolved conflict(s) block completion")]
    UnresolvedConflicts {
        /// Number of pending conflicts.
        count: usize,
    },

    /// No pending conflict exists for this id.
    #[error("no pending conflict for entity {0}")]
    UnknownConflict(EntityId),

    /// The server's copy changed after the conflict was computed.
    #[error("entity {0} changed on the server during resolution")]
    StaleResolution(EntityId),

    /// An entity listed in a hash map could not be found when needed.
    #[error("entity {0} disappeared during sync")]
    EntityMissing(EntityId),

    /// There is no open sync exchange.
    #[error("no sync exchange is open")]
    NoActiveSync,

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// Invalid state transition.
    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },

    /// Timeout.
    #[error("operation timed out")]
    Timeout,

    /// Version mismatch.
    #[error("protocol version mismatch: {0}")]
    VersionMismatch(String),
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout => true,
            SyncError::ServerError(_) => true,
            _ => false,
        }
    }

    /// Returns true if the server-side session is gone and a new sync must begin.
    pub fn requires_new_session(&self) -> bool {
        matches!(self, SyncError::SessionInvalid(_))
    }

    /// Returns true if the whole exchange must stop rather than just the
    /// entity being processed.
    pub fn aborts_exchange(&self) -> bool {
        matches!(
            self,
            SyncError::SessionInvalid(_)
                | SyncError::NotConnected
                | SyncError::Cancelled
                | SyncError::VersionMismatch(_)
                | SyncError::Allocation(_)
        )
    }
}

/// A failure confined to one entity; the rest of the plan still ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityFailure {
    /// The affected entity.
    pub id: EntityId,
    /// What went wrong.
    pub reason: String,
}

impl EntityFailure {
    /// Creates a failure record.
    pub fn new(id: EntityId, reason: impl Into<String>) -> Self {
        Self {
            id,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::transport_retryable("connection lost").is_retryable());
        assert!(!SyncError::transport_fatal("invalid certificate").is_retryable());
        assert!(SyncError::Timeout.is_retryable());
        assert!(SyncError::ServerError("internal error".into()).is_retryable());
        assert!(!SyncError::Cancelled.is_retryable());
        assert!(!SyncError::SessionInvalid("expired".into()).is_retryable());
        assert!(!SyncError::Rejected("missing token".into()).is_retryable());
    }

    #[test]
    fn session_errors_need_new_session() {
        assert!(SyncError::SessionInvalid("token mismatch".into()).requires_new_session());
        assert!(!SyncError::Timeout.requires_new_session());
    }

    #[test]
    fn entity_errors_do_not_abort() {
        assert!(SyncError::SessionInvalid("expired".into()).aborts_exchange());
        assert!(SyncError::Cancelled.aborts_exchange());
        assert!(!SyncError::transport_retryable("reset").aborts_exchange());
        assert!(!SyncError::Timeout.aborts_exchange());
    }

    #[test]
    fn error_display() {
        let err = SyncError::UnresolvedConflicts { count: 2 };
        assert_eq!(err.to_string(), "2 unresolved conflict(s) block completion");

        let err = SyncError::from(AllocationError::NotPrepared {
            project: "atlas".into(),
        });
        assert!(err.to_string().contains("atlas"));
    }
}
