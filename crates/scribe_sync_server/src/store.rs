//! Authoritative server-side entity store.

use crate::error::{ServerError, ServerResult};
use parking_lot::RwLock;
use scribe_sync_protocol::{
    Entity, EntityFingerprint, EntityHashRecord, EntityHashes, EntityId, ProjectId, SyncEntity,
    UserId,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Result of a conditional write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The write was applied; holds the fingerprint now stored (`None` after a delete).
    Applied(Option<EntityFingerprint>),
    /// The expected fingerprint did not match; holds the current one.
    Rejected(Option<EntityFingerprint>),
}

impl WriteOutcome {
    /// Returns true if the write was applied.
    pub fn is_applied(&self) -> bool {
        matches!(self, WriteOutcome::Applied(_))
    }

    /// The fingerprint the server holds after this call.
    pub fn current_hash(&self) -> Option<&EntityFingerprint> {
        match self {
            WriteOutcome::Applied(hash) | WriteOutcome::Rejected(hash) => hash.as_ref(),
        }
    }
}

#[derive(Debug, Default)]
struct ProjectData {
    entities: BTreeMap<EntityId, Entity>,
    tombstones: BTreeSet<EntityId>,
}

type ProjectKey = (UserId, ProjectId);

/// Entities, fingerprints and tombstones for every (user, project).
///
/// Writes are conditional on the fingerprint the client last saw, so a
/// client working from a stale view can never overwrite newer content.
#[derive(Debug)]
pub struct ServerStore {
    projects: RwLock<HashMap<ProjectKey, ProjectData>>,
    max_entities_per_project: usize,
}

impl ServerStore {
    /// Creates an empty store.
    pub fn new(max_entities_per_project: usize) -> Self {
        Self {
            projects: RwLock::new(HashMap::new()),
            max_entities_per_project,
        }
    }

    /// Current hash records and tombstones of a project.
    pub fn snapshot(
        &self,
        user: &UserId,
        project: &ProjectId,
    ) -> (Vec<EntityHashRecord>, BTreeSet<EntityId>) {
        let projects = self.projects.read();
        match projects.get(&key(user, project)) {
            Some(data) => (
                data.entities.values().map(EntityHashRecord::of).collect(),
                data.tombstones.clone(),
            ),
            None => (Vec::new(), BTreeSet::new()),
        }
    }

    /// Current `{id -> fingerprint}` map of a project.
    pub fn hashes(&self, user: &UserId, project: &ProjectId) -> EntityHashes {
        let (records, _) = self.snapshot(user, project);
        EntityHashRecord::to_hashes(&records)
    }

    /// Reads one entity.
    pub fn get(&self, user: &UserId, project: &ProjectId, id: EntityId) -> Option<Entity> {
        self.projects
            .read()
            .get(&key(user, project))
            .and_then(|data| data.entities.get(&id).cloned())
    }

    /// Writes `entity` if the stored fingerprint equals `expected`.
    ///
    /// `expected = None` means the client believes the id is free. Writing
    /// over a tombstone restores the entity.
    pub fn put(
        &self,
        user: &UserId,
        project: &ProjectId,
        entity: Entity,
        expected: Option<&EntityFingerprint>,
    ) -> ServerResult<WriteOutcome> {
        let mut projects = self.projects.write();
        let data = projects.entry(key(user, project)).or_default();
        let id = entity.id();

        let current = data.entities.get(&id).map(SyncEntity::fingerprint);
        if current.as_ref() != expected {
            return Ok(WriteOutcome::Rejected(current));
        }
        if current.is_none() && data.entities.len() >= self.max_entities_per_project {
            return Err(ServerError::ProjectFull {
                limit: self.max_entities_per_project,
            });
        }

        let hash = entity.fingerprint();
        data.tombstones.remove(&id);
        data.entities.insert(id, entity);
        Ok(WriteOutcome::Applied(Some(hash)))
    }

    /// Deletes `id` if the stored fingerprint equals `expected`, leaving a tombstone.
    pub fn delete(
        &self,
        user: &UserId,
        project: &ProjectId,
        id: EntityId,
        expected: Option<&EntityFingerprint>,
    ) -> ServerResult<WriteOutcome> {
        let mut projects = self.projects.write();
        let data = projects.entry(key(user, project)).or_default();

        let current = data.entities.get(&id).map(SyncEntity::fingerprint);
        if current.as_ref() != expected {
            return Ok(WriteOutcome::Rejected(current));
        }

        data.entities.remove(&id);
        data.tombstones.insert(id);
        Ok(WriteOutcome::Applied(None))
    }

    /// Inserts an entity unconditionally, as another device would have.
    pub fn seed(&self, user: &UserId, project: &ProjectId, entity: Entity) {
        let mut projects = self.projects.write();
        let data = projects.entry(key(user, project)).or_default();
        data.tombstones.remove(&entity.id());
        data.entities.insert(entity.id(), entity);
    }

    /// Number of live entities in a project.
    pub fn entity_count(&self, user: &UserId, project: &ProjectId) -> usize {
        self.projects
            .read()
            .get(&key(user, project))
            .map_or(0, |data| data.entities.len())
    }
}

impl Default for ServerStore {
    fn default() -> Self {
        Self::new(usize::MAX)
    }
}

fn key(user: &UserId, project: &ProjectId) -> ProjectKey {
    (user.clone(), project.clone())
}
