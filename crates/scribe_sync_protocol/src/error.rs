//! Error types for the sync protocol.

use crate::entity::EntityId;
use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised by protocol-level operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// CBOR encoding failed.
    #[error("encode error: {0}")]
    Encode(String),

    /// CBOR decoding failed or the payload had an unexpected shape.
    #[error("decode error: {0}")]
    Decode(String),

    /// Two values that must describe the same entity carry different ids.
    #[error("entity id mismatch: expected {expected}, got {actual}")]
    IdMismatch {
        /// The id the operation is bound to.
        expected: EntityId,
        /// The id that was supplied.
        actual: EntityId,
    },

    /// A conflict was constructed without any side present.
    #[error("conflict for entity {0} has neither a server nor a client version")]
    EmptyConflict(EntityId),

    /// Protocol version mismatch.
    #[error("protocol version mismatch: local={local}, remote={remote}")]
    VersionMismatch {
        /// Local protocol version.
        local: u16,
        /// Remote protocol version.
        remote: u16,
    },
}

impl ProtocolError {
    /// Creates a decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    /// Creates an encode error.
    pub fn encode(message: impl Into<String>) -> Self {
        Self::Encode(message.into())
    }
}
