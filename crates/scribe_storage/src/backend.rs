//! Storage collaborator trait definitions.

use crate::error::StorageResult;
use async_trait::async_trait;
use scribe_sync_protocol::{Entity, EntityId, EntityKind, ProjectId};
use std::collections::BTreeSet;

/// Why an entity is being removed from local storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOrigin {
    /// The user deleted it on this device; the deletion must be synced.
    Local,
    /// The deletion came from the server; nothing to sync back.
    Remote,
}

/// Local store of a project's entities.
///
/// # Invariants
///
/// - `read_entity` returns exactly what `write_entity` last stored
/// - `delete_entity` with [`DeleteOrigin::Local`] records the id in
///   `pending_deletions` until `clear_pending_deletion` is called
/// - Implementations must be `Send + Sync` for use across tasks
#[async_trait]
pub trait EntityStorage: Send + Sync {
    /// Lists the ids of every stored entity of one kind.
    async fn list_entity_ids(
        &self,
        project: &ProjectId,
        kind: EntityKind,
    ) -> StorageResult<Vec<EntityId>>;

    /// Reads one entity; `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the entity exists but cannot be decoded, or if
    /// the backend is unavailable.
    async fn read_entity(
        &self,
        project: &ProjectId,
        kind: EntityKind,
        id: EntityId,
    ) -> StorageResult<Option<Entity>>;

    /// Creates or replaces an entity.
    async fn write_entity(&self, project: &ProjectId, entity: &Entity) -> StorageResult<()>;

    /// Removes an entity. Returns whether it existed.
    async fn delete_entity(
        &self,
        project: &ProjectId,
        kind: EntityKind,
        id: EntityId,
        origin: DeleteOrigin,
    ) -> StorageResult<bool>;

    /// Ids deleted on this device and not yet reconciled with the server.
    async fn pending_deletions(&self, project: &ProjectId) -> StorageResult<BTreeSet<EntityId>>;

    /// Forgets a pending local deletion once the server agrees.
    async fn clear_pending_deletion(&self, project: &ProjectId, id: EntityId)
        -> StorageResult<()>;
}

/// The last known server-side tombstones of a project.
#[async_trait]
pub trait DeletedIdSource: Send + Sync {
    /// Ids the server has deleted; they must never be reallocated.
    async fn deleted_ids(&self, project: &ProjectId) -> StorageResult<BTreeSet<EntityId>>;

    /// Merges newly learned server tombstones.
    async fn record_deleted_ids(
        &self,
        project: &ProjectId,
        ids: &BTreeSet<EntityId>,
    ) -> StorageResult<()>;
}
