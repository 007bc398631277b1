//! Error types for the sync server.

use scribe_sync_protocol::{ErrorKind, ProtocolError};
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the sync server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid request format.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The request broke a protocol rule, such as speaking another version.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Token missing, mismatched or expired.
    #[error("sync session invalid: {0}")]
    SessionInvalid(String),

    /// The user already has a live sync session.
    #[error("a sync session is already active for user {0}")]
    SyncInProgress(String),

    /// The project holds as many entities as allowed.
    #[error("project is full: at most {limit} entities")]
    ProjectFull {
        /// Configured limit.
        limit: usize,
    },

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Wraps a failure to encode a response; the request itself was fine.
    pub fn response_encoding(error: ProtocolError) -> Self {
        ServerError::Internal(format!("response encoding failed: {error}"))
    }

    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServerError::InvalidRequest(_)
                | ServerError::Protocol(_)
                | ServerError::SessionInvalid(_)
                | ServerError::SyncInProgress(_)
                | ServerError::ProjectFull { .. }
        )
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        matches!(self, ServerError::Internal(_))
    }

    /// The wire category reported to clients.
    pub fn to_error_kind(&self) -> ErrorKind {
        match self {
            ServerError::Protocol(ProtocolError::VersionMismatch { .. }) => {
                ErrorKind::VersionMismatch
            }
            ServerError::InvalidRequest(_)
            | ServerError::Protocol(_)
            | ServerError::ProjectFull { .. } => ErrorKind::InvalidRequest,
            ServerError::SessionInvalid(_) => ErrorKind::SessionInvalid,
            ServerError::SyncInProgress(_) => ErrorKind::SyncInProgress,
            ServerError::Internal(_) => ErrorKind::Internal,
        }
    }
}
