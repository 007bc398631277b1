//! Conflict representation and resolution.

use crate::entity::{EntityId, SyncEntity};
use crate::error::{ProtocolError, ProtocolResult};

/// Two diverged versions of the same entity.
///
/// A side is `None` when that party deleted the entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityConflict<E> {
    id: EntityId,
    server: Option<E>,
    client: Option<E>,
}

impl<E: SyncEntity> EntityConflict<E> {
    /// Both sides hold different content.
    pub fn modified(server: E, client: E) -> ProtocolResult<Self> {
        if server.id() != client.id() {
            return Err(ProtocolError::IdMismatch {
                expected: server.id(),
                actual: client.id(),
            });
        }
        Ok(Self {
            id: server.id(),
            server: Some(server),
            client: Some(client),
        })
    }

    /// The client deleted an entity the server still has.
    pub fn deleted_on_client(server: E) -> Self {
        Self {
            id: server.id(),
            server: Some(server),
            client: None,
        }
    }

    /// The server deleted an entity the client still has.
    pub fn deleted_on_server(client: E) -> Self {
        Self {
            id: client.id(),
            server: None,
            client: Some(client),
        }
    }

    /// Builds a conflict from optional sides.
    pub fn from_sides(id: EntityId, server: Option<E>, client: Option<E>) -> ProtocolResult<Self> {
        for side in server.iter().chain(client.iter()) {
            if side.id() != id {
                return Err(ProtocolError::IdMismatch {
                    expected: id,
                    actual: side.id(),
                });
            }
        }
        if server.is_none() && client.is_none() {
            return Err(ProtocolError::EmptyConflict(id));
        }
        Ok(Self { id, server, client })
    }

    /// The conflicting entity id.
    pub fn id(&self) -> EntityId {
        self.id
    }

    /// The server version, if the server still has it.
    pub fn server(&self) -> Option<&E> {
        self.server.as_ref()
    }

    /// The client version, if the client still has it.
    pub fn client(&self) -> Option<&E> {
        self.client.as_ref()
    }

    /// Returns true if one side deleted the entity.
    pub fn is_delete_conflict(&self) -> bool {
        self.server.is_none() || self.client.is_none()
    }
}

/// The user's decision for a conflict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictChoice<E> {
    /// Keep what the server has.
    UseServer,
    /// Keep what the client has.
    UseClient,
    /// Replace both with externally merged content.
    UseMerged(E),
}

/// The value that overwrites both sides once a conflict is resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedEntity<E> {
    /// Write this entity on both sides.
    Write(E),
    /// Delete the entity on both sides.
    Delete(EntityId),
}

impl<E: SyncEntity> ResolvedEntity<E> {
    /// The entity id this resolution applies to.
    pub fn id(&self) -> EntityId {
        match self {
            ResolvedEntity::Write(entity) => entity.id(),
            ResolvedEntity::Delete(id) => *id,
        }
    }
}

/// Applies a choice to a conflict.
///
/// Picking a side that deleted the entity resolves to a deletion. A merged
/// entity must carry the conflict's id.
pub fn resolve_conflict<E: SyncEntity>(
    conflict: EntityConflict<E>,
    choice: ConflictChoice<E>,
) -> ProtocolResult<ResolvedEntity<E>> {
    let id = conflict.id;
    let chosen = match choice {
        ConflictChoice::UseServer => conflict.server,
        ConflictChoice::UseClient => conflict.client,
        ConflictChoice::UseMerged(merged) => {
            if merged.id() != id {
                return Err(ProtocolError::IdMismatch {
                    expected: id,
                    actual: merged.id(),
                });
            }
            Some(merged)
        }
    };

    Ok(match chosen {
        Some(entity) => ResolvedEntity::Write(entity),
        None => ResolvedEntity::Delete(id),
    })
}
