//! In-memory storage backend for testing.

use crate::backend::{DeleteOrigin, DeletedIdSource, EntityStorage};
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use scribe_sync_protocol::{Entity, EntityId, EntityKind, ProjectId, SyncEntity};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
struct ProjectData {
    entities: BTreeMap<EntityId, Entity>,
    pending_deletions: BTreeSet<EntityId>,
    server_deleted: BTreeSet<EntityId>,
    corrupted: BTreeSet<EntityId>,
}

/// An in-memory entity store.
///
/// This backend keeps every project in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral projects that don't need persistence
///
/// It also implements [`DeletedIdSource`], so one instance can back both
/// collaborators of the sync engine.
///
/// Failure injection ([`set_available`](Self::set_available),
/// [`mark_corrupted`](Self::mark_corrupted)) lets tests exercise the
/// engine's error paths.
#[derive(Debug)]
pub struct InMemoryStorage {
    projects: RwLock<HashMap<ProjectId, ProjectData>>,
    available: AtomicBool,
}

impl InMemoryStorage {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            projects: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Makes every subsequent call fail with [`StorageError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Makes reads of one entity fail with [`StorageError::Corrupted`].
    pub fn mark_corrupted(&self, project: &ProjectId, id: EntityId) {
        self.projects
            .write()
            .entry(project.clone())
            .or_default()
            .corrupted
            .insert(id);
    }

    /// Returns a copy of every entity in a project, ordered by id.
    #[must_use]
    pub fn entities(&self, project: &ProjectId) -> Vec<Entity> {
        self.projects
            .read()
            .get(project)
            .map(|data| data.entities.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns one entity regardless of kind.
    #[must_use]
    pub fn get(&self, project: &ProjectId, id: EntityId) -> Option<Entity> {
        self.projects
            .read()
            .get(project)
            .and_then(|data| data.entities.get(&id).cloned())
    }

    fn check_available(&self) -> StorageResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::unavailable("in-memory storage switched off"))
        }
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EntityStorage for InMemoryStorage {
    async fn list_entity_ids(
        &self,
        project: &ProjectId,
        kind: EntityKind,
    ) -> StorageResult<Vec<EntityId>> {
        self.check_available()?;
        Ok(self
            .projects
            .read()
            .get(project)
            .map(|data| {
                data.entities
                    .values()
                    .filter(|entity| entity.kind() == kind)
                    .map(|entity| entity.id())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn read_entity(
        &self,
        project: &ProjectId,
        kind: EntityKind,
        id: EntityId,
    ) -> StorageResult<Option<Entity>> {
        self.check_available()?;
        let projects = self.projects.read();
        let Some(data) = projects.get(project) else {
            return Ok(None);
        };

        if data.corrupted.contains(&id) {
            return Err(StorageError::Corrupted {
                id,
                reason: "marked corrupted".into(),
            });
        }

        match data.entities.get(&id) {
            Some(entity) if entity.kind() != kind => Err(StorageError::KindMismatch {
                id,
                expected: kind,
                actual: entity.kind(),
            }),
            found => Ok(found.cloned()),
        }
    }

    async fn write_entity(&self, project: &ProjectId, entity: &Entity) -> StorageResult<()> {
        self.check_available()?;
        let mut projects = self.projects.write();
        let data = projects.entry(project.clone()).or_default();
        data.corrupted.remove(&entity.id());
        data.entities.insert(entity.id(), entity.clone());
        Ok(())
    }

    async fn delete_entity(
        &self,
        project: &ProjectId,
        kind: EntityKind,
        id: EntityId,
        origin: DeleteOrigin,
    ) -> StorageResult<bool> {
        self.check_available()?;
        let mut projects = self.projects.write();
        let data = projects.entry(project.clone()).or_default();

        let existed = match data.entities.get(&id).map(|entity| entity.kind()) {
            Some(actual) if actual != kind => {
                return Err(StorageError::KindMismatch {
                    id,
                    expected: kind,
                    actual,
                })
            }
            Some(_) => data.entities.remove(&id).is_some(),
            None => false,
        };

        if origin == DeleteOrigin::Local && existed {
            data.pending_deletions.insert(id);
        }
        Ok(existed)
    }

    async fn pending_deletions(&self, project: &ProjectId) -> StorageResult<BTreeSet<EntityId>> {
        self.check_available()?;
        Ok(self
            .projects
            .read()
            .get(project)
            .map(|data| data.pending_deletions.clone())
            .unwrap_or_default())
    }

    async fn clear_pending_deletion(
        &self,
        project: &ProjectId,
        id: EntityId,
    ) -> StorageResult<()> {
        self.check_available()?;
        if let Some(data) = self.projects.write().get_mut(project) {
            data.pending_deletions.remove(&id);
        }
        Ok(())
    }
}

#[async_trait]
impl DeletedIdSource for InMemoryStorage {
    async fn deleted_ids(&self, project: &ProjectId) -> StorageResult<BTreeSet<EntityId>> {
        self.check_available()?;
        Ok(self
            .projects
            .read()
            .get(project)
            .map(|data| data.server_deleted.clone())
            .unwrap_or_default())
    }

    async fn record_deleted_ids(
        &self,
        project: &ProjectId,
        ids: &BTreeSet<EntityId>,
    ) -> StorageResult<()> {
        self.check_available()?;
        self.projects
            .write()
            .entry(project.clone())
            .or_default()
            .server_deleted
            .extend(ids.iter().copied());
        Ok(())
    }
}
