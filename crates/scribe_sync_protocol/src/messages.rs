//! Protocol messages for one sync exchange.
//!
//! A sync exchange is `BeginSync`, any number of `FetchEntity`,
//! `PushEntity` and `DeleteEntity` calls, then `EndSync`. Every request
//! after `BeginSync` carries the token returned by it.

use crate::entity::{Entity, EntityId, ProjectId, UserId};
use crate::error::{ProtocolError, ProtocolResult};
use crate::fingerprint::EntityFingerprint;
use crate::hashes::EntityHashRecord;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Current protocol version.
pub const PROTOCOL_VERSION: u16 = 1;

/// A sync protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMessage {
    /// Begin sync request.
    BeginSyncRequest(BeginSyncRequest),
    /// Begin sync response.
    BeginSyncResponse(BeginSyncResponse),
    /// Fetch entity request.
    FetchEntityRequest(FetchEntityRequest),
    /// Fetch entity response.
    FetchEntityResponse(FetchEntityResponse),
    /// Push entity request.
    PushEntityRequest(PushEntityRequest),
    /// Push entity response.
    PushEntityResponse(PushEntityResponse),
    /// Delete entity request.
    DeleteEntityRequest(DeleteEntityRequest),
    /// Delete entity response.
    DeleteEntityResponse(DeleteEntityResponse),
    /// End sync request.
    EndSyncRequest(EndSyncRequest),
    /// End sync response.
    EndSyncResponse(EndSyncResponse),
    /// The server refused or failed a request.
    Error {
        /// Error category.
        kind: ErrorKind,
        /// Human-readable detail.
        message: String,
    },
}

impl SyncMessage {
    /// Returns the message type code.
    pub fn type_code(&self) -> u8 {
        match self {
            SyncMessage::BeginSyncRequest(_) => 1,
            SyncMessage::BeginSyncResponse(_) => 2,
            SyncMessage::FetchEntityRequest(_) => 3,
            SyncMessage::FetchEntityResponse(_) => 4,
            SyncMessage::PushEntityRequest(_) => 5,
            SyncMessage::PushEntityResponse(_) => 6,
            SyncMessage::DeleteEntityRequest(_) => 7,
            SyncMessage::DeleteEntityResponse(_) => 8,
            SyncMessage::EndSyncRequest(_) => 9,
            SyncMessage::EndSyncResponse(_) => 10,
            SyncMessage::Error { .. } => 255,
        }
    }

    /// Creates an error message.
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        SyncMessage::Error {
            kind,
            message: message.into(),
        }
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        encode_cbor(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        decode_cbor(bytes)
    }
}

/// Category of a server-side failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The sync token is missing, mismatched or expired.
    SessionInvalid,
    /// Another sync exchange is already running for this user.
    SyncInProgress,
    /// The request was malformed.
    InvalidRequest,
    /// The protocol versions differ.
    VersionMismatch,
    /// Anything else.
    Internal,
}

/// How a sync exchange ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncOutcome {
    /// All work was applied.
    Completed,
    /// The client gave up before finishing.
    Cancelled,
}

/// Opens a sync exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeginSyncRequest {
    /// Protocol version.
    pub protocol_version: u16,
    /// Requesting user.
    pub user_id: UserId,
    /// Project to sync.
    pub project: ProjectId,
    /// Replace a live session instead of failing.
    pub replace_existing: bool,
}

impl BeginSyncRequest {
    /// Creates a begin request.
    pub fn new(user_id: UserId, project: ProjectId) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            user_id,
            project,
            replace_existing: false,
        }
    }

    /// Replaces any live session for the user.
    pub fn replacing_existing(mut self) -> Self {
        self.replace_existing = true;
        self
    }

    /// Fails unless the request speaks `local`'s protocol version.
    pub fn check_version(&self, local: u16) -> ProtocolResult<()> {
        if self.protocol_version == local {
            Ok(())
        } else {
            Err(ProtocolError::VersionMismatch {
                local,
                remote: self.protocol_version,
            })
        }
    }
}

/// The server's snapshot at the start of an exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeginSyncResponse {
    /// Token binding later requests to this exchange.
    pub sync_token: String,
    /// Server fingerprints of every live entity.
    pub hashes: Vec<EntityHashRecord>,
    /// Ids the server has deleted.
    pub deleted_ids: BTreeSet<EntityId>,
}

/// Fetches one entity from the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchEntityRequest {
    /// Requesting user.
    pub user_id: UserId,
    /// Sync token.
    pub sync_token: String,
    /// Entity to fetch.
    pub id: EntityId,
}

/// The fetched entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchEntityResponse {
    /// The entity, or `None` if the server does not have it.
    pub entity: Option<Entity>,
}

/// Writes one entity on the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushEntityRequest {
    /// Requesting user.
    pub user_id: UserId,
    /// Sync token.
    pub sync_token: String,
    /// Entity to write.
    pub entity: Entity,
    /// Fingerprint the client believes the server holds; `None` for a create.
    pub expected_hash: Option<EntityFingerprint>,
}

/// Outcome of a push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushEntityResponse {
    /// Whether the write was applied.
    pub accepted: bool,
    /// The server's fingerprint after the call.
    pub current_hash: Option<EntityFingerprint>,
}

/// Deletes one entity on the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteEntityRequest {
    /// Requesting user.
    pub user_id: UserId,
    /// Sync token.
    pub sync_token: String,
    /// Entity to delete.
    pub id: EntityId,
    /// Fingerprint the client believes the server holds.
    pub expected_hash: Option<EntityFingerprint>,
}

/// Outcome of a delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteEntityResponse {
    /// Whether the delete was applied.
    pub accepted: bool,
    /// The server's fingerprint after the call.
    pub current_hash: Option<EntityFingerprint>,
}

/// Closes a sync exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndSyncRequest {
    /// Requesting user.
    pub user_id: UserId,
    /// Sync token.
    pub sync_token: String,
    /// How the exchange ended.
    pub outcome: SyncOutcome,
}

/// Acknowledges the end of an exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndSyncResponse {
    /// Whether a session was removed.
    pub terminated: bool,
}

fn encode_cbor<T: Serialize>(value: &T) -> ProtocolResult<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes).map_err(|e| ProtocolError::encode(e.to_string()))?;
    Ok(bytes)
}

fn decode_cbor<T: DeserializeOwned>(bytes: &[u8]) -> ProtocolResult<T> {
    ciborium::from_reader(bytes).map_err(|e| ProtocolError::decode(e.to_string()))
}
