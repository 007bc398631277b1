//! Fingerprint index of the local project.

use crate::error::{EntityFailure, SyncResult};
use scribe_storage::EntityStorage;
use scribe_sync_protocol::{
    EntityFingerprint, EntityHashRecord, EntityHashes, EntityId, EntityKind, ProjectId, SyncEntity,
};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// The `{id -> fingerprint}` map of everything stored locally.
///
/// Entities that fail to load are left out of the map and reported in
/// [`failures`](Self::failures); the rest of the project is still indexed.
#[derive(Debug, Clone, Default)]
pub struct LocalIndex {
    records: BTreeMap<EntityId, EntityHashRecord>,
    failures: Vec<EntityFailure>,
}

impl LocalIndex {
    /// Reads and fingerprints every entity of a project.
    ///
    /// # Errors
    ///
    /// Fails only if the ids of a kind cannot be listed.
    pub async fn build<S: EntityStorage + ?Sized>(
        storage: &S,
        project: &ProjectId,
    ) -> SyncResult<Self> {
        let mut index = Self::default();

        for kind in EntityKind::ALL {
            let ids = storage.list_entity_ids(project, kind).await?;
            for id in ids {
                match storage.read_entity(project, kind, id).await {
                    Ok(Some(entity)) => {
                        index.records.insert(id, EntityHashRecord::of(&entity));
                    }
                    // Deleted between listing and reading.
                    Ok(None) => {}
                    Err(e) => {
                        warn!(%project, %kind, %id, error = %e, "skipping unreadable entity");
                        index.failures.push(EntityFailure::new(id, e.to_string()));
                    }
                }
            }
        }

        debug!(%project, entities = index.records.len(), failures = index.failures.len(), "local index built");
        Ok(index)
    }

    /// The id-keyed fingerprint map.
    pub fn hashes(&self) -> EntityHashes {
        EntityHashRecord::to_hashes(self.records.values())
    }

    /// Kind of a locally stored entity.
    pub fn kind_of(&self, id: EntityId) -> Option<EntityKind> {
        self.records.get(&id).map(|record| record.kind)
    }

    /// Local fingerprint of an entity.
    pub fn fingerprint_of(&self, id: EntityId) -> Option<&EntityFingerprint> {
        self.records.get(&id).map(|record| &record.fingerprint)
    }

    /// Full record of an entity.
    pub fn record(&self, id: EntityId) -> Option<&EntityHashRecord> {
        self.records.get(&id)
    }

    /// Entities that could not be read.
    pub fn failures(&self) -> &[EntityFailure] {
        &self.failures
    }

    /// Number of indexed entities.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if nothing was indexed.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
