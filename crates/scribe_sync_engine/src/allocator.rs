//! Per-project entity id allocation.
//!
//! The allocator derives the next free id from every source that may hold
//! an id: one scanner per entity kind over local storage, plus the server
//! tombstones last seen. It is recomputed with [`IdAllocator::prepare`] at
//! the start of each editing session and only incremented in memory
//! afterwards, so ids may have gaps but are never reused.
//!
//! State machine: `Uninitialized -> Prepared -> (claim_next_id)* -> Prepared`.

use crate::error::AllocationError;
use async_trait::async_trait;
use parking_lot::Mutex;
use scribe_storage::{DeletedIdSource, EntityStorage, StorageResult};
use scribe_sync_protocol::{EntityId, EntityKind, ProjectId};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The id handed out first in a project with no entities and no tombstones.
pub const FIRST_ENTITY_ID: EntityId = EntityId::new(1);

/// A source of "highest id in use" for one slice of a project.
#[async_trait]
pub trait HighestIdScanner: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> String;

    /// Highest id this source knows about; `None` if it holds nothing.
    async fn highest_id(&self, project: &ProjectId) -> StorageResult<Option<EntityId>>;
}

/// Scans one entity kind of an [`EntityStorage`].
pub struct StorageKindScanner<S: ?Sized> {
    storage: Arc<S>,
    kind: EntityKind,
}

impl<S: EntityStorage + ?Sized> StorageKindScanner<S> {
    /// Creates a scanner for one kind.
    pub fn new(storage: Arc<S>, kind: EntityKind) -> Self {
        Self { storage, kind }
    }
}

#[async_trait]
impl<S: EntityStorage + ?Sized> HighestIdScanner for StorageKindScanner<S> {
    fn name(&self) -> String {
        format!("{} storage", self.kind)
    }

    async fn highest_id(&self, project: &ProjectId) -> StorageResult<Option<EntityId>> {
        let ids = self.storage.list_entity_ids(project, self.kind).await?;
        Ok(ids.into_iter().max())
    }
}

/// Scans local deletions not yet reconciled with the server.
pub struct PendingDeletionScanner<S: ?Sized> {
    storage: Arc<S>,
}

impl<S: EntityStorage + ?Sized> PendingDeletionScanner<S> {
    /// Creates a pending-deletion scanner.
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl<S: EntityStorage + ?Sized> HighestIdScanner for PendingDeletionScanner<S> {
    fn name(&self) -> String {
        "pending deletions".into()
    }

    async fn highest_id(&self, project: &ProjectId) -> StorageResult<Option<EntityId>> {
        let ids = self.storage.pending_deletions(project).await?;
        Ok(ids.last().copied())
    }
}

/// Scans the server tombstones known locally.
pub struct DeletedIdScanner<D: ?Sized> {
    source: Arc<D>,
}

impl<D: DeletedIdSource + ?Sized> DeletedIdScanner<D> {
    /// Creates a tombstone scanner.
    pub fn new(source: Arc<D>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl<D: DeletedIdSource + ?Sized> HighestIdScanner for DeletedIdScanner<D> {
    fn name(&self) -> String {
        "deleted ids".into()
    }

    async fn highest_id(&self, project: &ProjectId) -> StorageResult<Option<EntityId>> {
        let ids = self.source.deleted_ids(project).await?;
        Ok(ids.last().copied())
    }
}

#[derive(Debug)]
struct AllocatorState {
    prepared: bool,
    // Kept across failed prepares so a later prepare can never move backwards.
    next: u64,
}

/// Hands out unique entity ids within one project.
pub struct IdAllocator {
    project: ProjectId,
    scanners: Vec<Box<dyn HighestIdScanner>>,
    state: Mutex<AllocatorState>,
}

impl IdAllocator {
    /// Creates an allocator with no scanners.
    pub fn new(project: ProjectId) -> Self {
        Self {
            project,
            scanners: Vec::new(),
            state: Mutex::new(AllocatorState {
                prepared: false,
                next: u64::from(FIRST_ENTITY_ID.value()),
            }),
        }
    }

    /// Creates an allocator scanning every entity kind of `storage`, its
    /// pending local deletions and the tombstones of `deleted`.
    pub fn for_storage<S, D>(project: ProjectId, storage: Arc<S>, deleted: Arc<D>) -> Self
    where
        S: EntityStorage + ?Sized + 'static,
        D: DeletedIdSource + ?Sized + 'static,
    {
        let mut allocator = Self::new(project);
        for kind in EntityKind::ALL {
            allocator = allocator.with_scanner(StorageKindScanner::new(Arc::clone(&storage), kind));
        }
        allocator
            .with_scanner(PendingDeletionScanner::new(storage))
            .with_scanner(DeletedIdScanner::new(deleted))
    }

    /// Adds a scanner.
    pub fn with_scanner(mut self, scanner: impl HighestIdScanner + 'static) -> Self {
        self.scanners.push(Box::new(scanner));
        self
    }

    /// The project this allocator serves.
    pub fn project(&self) -> &ProjectId {
        &self.project
    }

    /// Returns true once `prepare` has succeeded.
    pub fn is_prepared(&self) -> bool {
        self.state.lock().prepared
    }

    /// The id the next claim would return, if prepared.
    pub fn peek_next_id(&self) -> Option<EntityId> {
        let state = self.state.lock();
        if state.prepared {
            u32::try_from(state.next).ok().map(EntityId::new)
        } else {
            None
        }
    }

    /// Rescans every source and sets the next free id to `max + 1`.
    ///
    /// If any scanner fails the allocator becomes unprepared and every
    /// claim fails until a later `prepare` succeeds.
    pub async fn prepare(&self) -> Result<EntityId, AllocationError> {
        self.state.lock().prepared = false;

        let mut highest: Option<EntityId> = None;
        for scanner in &self.scanners {
            match scanner.highest_id(&self.project).await {
                Ok(found) => {
                    debug!(project = %self.project, scanner = %scanner.name(), ?found, "scanned highest id");
                    highest = highest.max(found);
                }
                Err(source) => {
                    warn!(project = %self.project, scanner = %scanner.name(), error = %source, "id scan failed");
                    return Err(AllocationError::ScanFailed {
                        scanner: scanner.name(),
                        source,
                    });
                }
            }
        }

        let scanned_next = match highest {
            Some(id) => u64::from(id.value()) + 1,
            None => u64::from(FIRST_ENTITY_ID.value()),
        };

        let mut state = self.state.lock();
        state.next = state.next.max(scanned_next);
        state.prepared = true;
        info!(project = %self.project, next = state.next, "id allocator prepared");

        u32::try_from(state.next)
            .map(EntityId::new)
            .map_err(|_| AllocationError::Exhausted)
    }

    /// Returns the next free id and advances the counter.
    pub fn claim_next_id(&self) -> Result<EntityId, AllocationError> {
        let mut state = self.state.lock();
        if !state.prepared {
            return Err(AllocationError::NotPrepared {
                project: self.project.to_string(),
            });
        }

        let id = u32::try_from(state.next).map_err(|_| AllocationError::Exhausted)?;
        state.next += 1;
        Ok(EntityId::new(id))
    }
}
