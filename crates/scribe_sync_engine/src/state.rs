//! Sync engine state machine.

use crate::allocator::IdAllocator;
use crate::config::SyncConfig;
use crate::error::{EntityFailure, SyncError, SyncResult};
use crate::index::LocalIndex;
use crate::transport::SyncTransport;
use parking_lot::RwLock;
use scribe_storage::{DeleteOrigin, DeletedIdSource, EntityStorage};
use scribe_sync_protocol::{
    diff, resolve_conflict, BeginSyncRequest, BeginSyncResponse, ConflictChoice,
    DeleteEntityRequest, EndSyncRequest, Entity, EntityConflict, EntityFingerprint,
    EntityHashRecord, EntityId, EntityKind, FetchEntityRequest, PlannedConflict, ProtocolError,
    PushEntityRequest, ResolvedEntity, SyncEntity, SyncOutcome, SyncPlan,
};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// The current state of the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Engine is idle, not syncing.
    Idle,
    /// Engine is opening a sync exchange.
    Connecting,
    /// Engine is indexing local storage and diffing.
    Diffing,
    /// Engine is pushing and pulling entities.
    Applying,
    /// The exchange is open and waiting for conflict decisions.
    AwaitingResolution,
    /// Engine has completed a sync exchange.
    Synced,
    /// Engine encountered an error.
    Error,
}

impl SyncState {
    /// Returns true if the engine is in an active sync state.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SyncState::Connecting | SyncState::Diffing | SyncState::Applying
        )
    }

    /// Returns true if the engine can start a new sync.
    pub fn can_start_sync(&self) -> bool {
        matches!(self, SyncState::Idle | SyncState::Synced | SyncState::Error)
    }
}

/// Statistics about sync operations.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Total number of exchanges completed.
    pub cycles_completed: u64,
    /// Total number of entities pushed.
    pub entities_pushed: u64,
    /// Total number of entities pulled.
    pub entities_pulled: u64,
    /// Total number of conflicts encountered.
    pub conflicts_encountered: u64,
    /// Total number of conflicts resolved.
    pub conflicts_resolved: u64,
    /// Total number of per-entity failures.
    pub entity_failures: u64,
    /// Total number of begin retries.
    pub retries: u64,
    /// Last sync time.
    pub last_sync_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Result of a sync exchange.
#[derive(Debug, Clone)]
pub struct SyncCycleResult {
    /// The diff the exchange worked from.
    pub plan: SyncPlan,
    /// Number of entities pushed.
    pub pushed: u64,
    /// Number of entities pulled.
    pub pulled: u64,
    /// Conflicts awaiting a decision.
    pub conflicts: Vec<EntityConflict<Entity>>,
    /// Entities that failed and stay pending for the next sync.
    pub failures: Vec<EntityFailure>,
    /// Whether the exchange was closed; false while conflicts are pending.
    pub completed: bool,
    /// Duration of the exchange so far.
    pub duration: Duration,
}

#[derive(Debug, Clone)]
struct PendingConflict {
    conflict: EntityConflict<Entity>,
    // Where the client copy lives, if the client still has one.
    local_kind: Option<EntityKind>,
    remote_hash: Option<EntityFingerprint>,
    // Client copy moved to a fresh id by a keep-both resolution.
    relocated: Option<RelocatedCopy>,
}

#[derive(Debug, Clone)]
struct RelocatedCopy {
    entity: Entity,
    pushed: bool,
}

#[derive(Debug)]
struct OpenExchange {
    token: String,
    conflicts: BTreeMap<EntityId, PendingConflict>,
}

/// The sync engine runs sync exchanges for one project.
///
/// A call to [`sync`](Self::sync) opens an exchange, pushes and pulls
/// everything that does not need a decision, and either closes the
/// exchange or leaves it open with pending conflicts. Conflicts are then
/// settled with [`resolve`](Self::resolve) and the exchange is closed with
/// [`finish`](Self::finish) or abandoned with [`cancel`](Self::cancel).
pub struct SyncEngine<T, S, D>
where
    T: SyncTransport,
    S: EntityStorage + 'static,
    D: DeletedIdSource + 'static,
{
    config: SyncConfig,
    transport: Arc<T>,
    storage: Arc<S>,
    deleted: Arc<D>,
    allocator: IdAllocator,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
    exchange: tokio::sync::Mutex<Option<OpenExchange>>,
    cancelled: AtomicBool,
}

impl<T, S, D> SyncEngine<T, S, D>
where
    T: SyncTransport,
    S: EntityStorage + 'static,
    D: DeletedIdSource + 'static,
{
    /// Creates a new sync engine.
    pub fn new(config: SyncConfig, transport: T, storage: Arc<S>, deleted: Arc<D>) -> Self {
        let allocator =
            IdAllocator::for_storage(config.project.clone(), Arc::clone(&storage), Arc::clone(&deleted));
        Self {
            config,
            transport: Arc::new(transport),
            storage,
            deleted,
            allocator,
            state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
            exchange: tokio::sync::Mutex::new(None),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Gets the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Gets the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Gets the id allocator of this project.
    pub fn allocator(&self) -> &IdAllocator {
        &self.allocator
    }

    /// Rescans storage for the next free id. Call at the start of an
    /// editing session.
    pub async fn prepare_ids(&self) -> SyncResult<EntityId> {
        Ok(self.allocator.prepare().await?)
    }

    /// Creates an entity under a freshly allocated id and stores it.
    pub async fn create_entity<F>(&self, build: F) -> SyncResult<Entity>
    where
        F: FnOnce(EntityId) -> Entity + Send,
    {
        let id = self.allocator.claim_next_id()?;
        let entity = build(id);
        if entity.id() != id {
            return Err(ProtocolError::IdMismatch {
                expected: id,
                actual: entity.id(),
            }
            .into());
        }
        self.storage.write_entity(&self.config.project, &entity).await?;
        debug!(project = %self.config.project, %id, kind = %entity.kind(), "entity created");
        Ok(entity)
    }

    /// Requests cancellation of a running sync.
    ///
    /// A running [`sync`](Self::sync) stops at its next checkpoint and
    /// ends the exchange as cancelled. An exchange left open for conflict
    /// resolution is ended here. Returns whether an open exchange was ended.
    pub async fn cancel(&self) -> SyncResult<bool> {
        self.cancelled.store(true, Ordering::SeqCst);

        let mut guard = self.exchange.lock().await;
        let Some(exchange) = guard.take() else {
            return Ok(false);
        };

        info!(project = %self.config.project, pending = exchange.conflicts.len(), "cancelling sync");
        self.set_state(SyncState::Idle);
        self.end_exchange(&exchange.token, SyncOutcome::Cancelled)
            .await?;
        Ok(true)
    }

    fn check_cancelled(&self) -> SyncResult<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn set_state(&self, state: SyncState) {
        *self.state.write() = state;
    }

    async fn call<R>(&self, request: impl Future<Output = SyncResult<R>>) -> SyncResult<R> {
        tokio::time::timeout(self.config.timeout, request)
            .await
            .map_err(|_| SyncError::Timeout)?
    }

    /// Runs one sync exchange.
    ///
    /// Pushes local-only entities, pulls remote-only entities and loads
    /// both sides of every conflict. If there are no conflicts the
    /// exchange is closed before returning; otherwise it stays open and
    /// the engine waits in [`SyncState::AwaitingResolution`].
    pub async fn sync(&self) -> SyncResult<SyncCycleResult> {
        let start = Instant::now();
        self.cancelled.store(false, Ordering::SeqCst);

        let mut guard = self.exchange.lock().await;
        if guard.is_some() || !self.state().can_start_sync() {
            return Err(SyncError::InvalidStateTransition {
                from: format!("{:?}", self.state()),
                to: "sync".into(),
            });
        }

        self.set_state(SyncState::Connecting);
        let begin = match self.begin_with_retry().await {
            Ok(begin) => begin,
            Err(e) => {
                self.handle_error(&e);
                return Err(e);
            }
        };
        let token = begin.sync_token.clone();
        info!(
            project = %self.config.project,
            remote_entities = begin.hashes.len(),
            remote_deleted = begin.deleted_ids.len(),
            "sync exchange opened"
        );

        let (mut cycle, pending) = match self.run_exchange(&token, begin).await {
            Ok(outcome) => outcome,
            Err(e) => {
                if !e.requires_new_session() {
                    if let Err(end_err) = self.end_exchange(&token, SyncOutcome::Cancelled).await {
                        warn!(error = %end_err, "failed to release sync session");
                    }
                }
                self.handle_error(&e);
                return Err(e);
            }
        };

        let conflicts: BTreeMap<EntityId, PendingConflict> = pending
            .into_iter()
            .map(|pending| (pending.conflict.id(), pending))
            .collect();
        cycle.conflicts = conflicts.values().map(|p| p.conflict.clone()).collect();

        if conflicts.is_empty() {
            if let Err(e) = self.end_exchange(&token, SyncOutcome::Completed).await {
                self.handle_error(&e);
                return Err(e);
            }
            cycle.completed = true;
            self.set_state(SyncState::Synced);
        } else {
            info!(project = %self.config.project, conflicts = conflicts.len(), "awaiting conflict resolution");
            *guard = Some(OpenExchange { token, conflicts });
            self.set_state(SyncState::AwaitingResolution);
        }
        drop(guard);

        // Pulled entities may carry ids above the current counter.
        if let Err(e) = self.allocator.prepare().await {
            warn!(project = %self.config.project, error = %e, "id allocator left unprepared after sync");
        }

        cycle.duration = start.elapsed();
        {
            let mut stats = self.stats.write();
            if cycle.completed {
                stats.cycles_completed += 1;
                stats.last_sync_time = Some(Instant::now());
            }
            stats.entities_pushed += cycle.pushed;
            stats.entities_pulled += cycle.pulled;
            stats.conflicts_encountered += cycle.conflicts.len() as u64;
            stats.entity_failures += cycle.failures.len() as u64;
            stats.last_error = None;
        }

        Ok(cycle)
    }

    async fn begin_with_retry(&self) -> SyncResult<BeginSyncResponse> {
        let retry = &self.config.retry;
        let mut attempt = 0;

        loop {
            if attempt > 0 {
                tokio::time::sleep(retry.delay_for_attempt(attempt)).await;
                self.stats.write().retries += 1;
            }
            self.check_cancelled()?;

            let mut request =
                BeginSyncRequest::new(self.config.user_id.clone(), self.config.project.clone());
            request.protocol_version = self.config.protocol_version;
            request.replace_existing = self.config.replace_existing_session;

            match self.call(self.transport.begin_sync(request)).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt + 1 < retry.max_attempts => {
                    debug!(attempt, error = %e, "begin sync failed, retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn run_exchange(
        &self,
        token: &str,
        begin: BeginSyncResponse,
    ) -> SyncResult<(SyncCycleResult, Vec<PendingConflict>)> {
        let project = &self.config.project;
        self.check_cancelled()?;

        self.deleted
            .record_deleted_ids(project, &begin.deleted_ids)
            .await?;

        self.set_state(SyncState::Diffing);
        let index = LocalIndex::build(self.storage.as_ref(), project).await?;
        let locally_deleted = self.storage.pending_deletions(project).await?;
        let remote_hashes = EntityHashRecord::to_hashes(&begin.hashes);
        let plan = diff(
            &index.hashes(),
            &remote_hashes,
            &locally_deleted,
            &begin.deleted_ids,
        );
        debug!(
            %project,
            unchanged = plan.unchanged.len(),
            push = plan.push_create.len(),
            pull = plan.pull_create.len(),
            conflicts = plan.conflicts.len(),
            "diff computed"
        );

        self.set_state(SyncState::Applying);
        let mut result = SyncCycleResult {
            plan: SyncPlan::default(),
            pushed: 0,
            pulled: 0,
            conflicts: Vec::new(),
            failures: index.failures().to_vec(),
            completed: false,
            duration: Duration::ZERO,
        };

        for &id in &plan.push_create {
            self.check_cancelled()?;
            match self.push_new(token, &index, id).await {
                Ok(()) => result.pushed += 1,
                Err(e) => self.record_failure(&mut result.failures, id, e)?,
            }
        }

        for &id in &plan.pull_create {
            self.check_cancelled()?;
            match self.pull_new(token, id).await {
                Ok(()) => result.pulled += 1,
                Err(e) => self.record_failure(&mut result.failures, id, e)?,
            }
        }

        // Local deletions the server has no copy of are already settled.
        for &id in &locally_deleted {
            if !remote_hashes.contains_key(&id) && index.record(id).is_none() {
                if let Err(e) = self.storage.clear_pending_deletion(project, id).await {
                    self.record_failure(&mut result.failures, id, e.into())?;
                }
            }
        }

        let mut pending = Vec::with_capacity(plan.conflicts.len());
        for planned in &plan.conflicts {
            self.check_cancelled()?;
            match self.load_conflict(token, &index, planned).await {
                Ok(conflict) => pending.push(conflict),
                Err(e) => self.record_failure(&mut result.failures, planned.id, e)?,
            }
        }

        result.plan = plan;
        Ok((result, pending))
    }

    fn record_failure(
        &self,
        failures: &mut Vec<EntityFailure>,
        id: EntityId,
        error: SyncError,
    ) -> SyncResult<()> {
        if error.aborts_exchange() {
            return Err(error);
        }
        warn!(project = %self.config.project, %id, error = %error, "entity left pending");
        failures.push(EntityFailure::new(id, error.to_string()));
        Ok(())
    }

    async fn read_local(&self, index: &LocalIndex, id: EntityId) -> SyncResult<Entity> {
        let kind = index.kind_of(id).ok_or(SyncError::EntityMissing(id))?;
        self.storage
            .read_entity(&self.config.project, kind, id)
            .await?
            .ok_or(SyncError::EntityMissing(id))
    }

    async fn fetch_remote(&self, token: &str, id: EntityId) -> SyncResult<Option<Entity>> {
        let response = self
            .call(self.transport.fetch_entity(FetchEntityRequest {
                user_id: self.config.user_id.clone(),
                sync_token: token.to_string(),
                id,
            }))
            .await?;

        match response.entity {
            Some(entity) if entity.id() != id => Err(ProtocolError::IdMismatch {
                expected: id,
                actual: entity.id(),
            }
            .into()),
            entity => Ok(entity),
        }
    }

    async fn push(
        &self,
        token: &str,
        entity: Entity,
        expected_hash: Option<EntityFingerprint>,
    ) -> SyncResult<bool> {
        let response = self
            .call(self.transport.push_entity(PushEntityRequest {
                user_id: self.config.user_id.clone(),
                sync_token: token.to_string(),
                entity,
                expected_hash,
            }))
            .await?;
        Ok(response.accepted)
    }

    async fn push_new(&self, token: &str, index: &LocalIndex, id: EntityId) -> SyncResult<()> {
        let entity = self.read_local(index, id).await?;
        if self.push(token, entity, None).await? {
            Ok(())
        } else {
            Err(SyncError::ServerError(format!(
                "server already holds a different entity {}",
                id
            )))
        }
    }

    async fn pull_new(&self, token: &str, id: EntityId) -> SyncResult<()> {
        let entity = self
            .fetch_remote(token, id)
            .await?
            .ok_or(SyncError::EntityMissing(id))?;
        self.storage
            .write_entity(&self.config.project, &entity)
            .await?;
        Ok(())
    }

    async fn load_conflict(
        &self,
        token: &str,
        index: &LocalIndex,
        planned: &PlannedConflict,
    ) -> SyncResult<PendingConflict> {
        let remote_hash = planned.remote_fingerprint().cloned();
        let server = match remote_hash {
            Some(_) => Some(
                self.fetch_remote(token, planned.id)
                    .await?
                    .ok_or(SyncError::EntityMissing(planned.id))?,
            ),
            None => None,
        };
        let client = match index.kind_of(planned.id) {
            Some(_) => Some(self.read_local(index, planned.id).await?),
            None => None,
        };

        Ok(PendingConflict {
            conflict: EntityConflict::from_sides(planned.id, server, client)?,
            local_kind: index.kind_of(planned.id),
            remote_hash,
            relocated: None,
        })
    }

    /// Conflicts of the open exchange that still need a decision.
    pub async fn pending_conflicts(&self) -> Vec<EntityConflict<Entity>> {
        self.exchange
            .lock()
            .await
            .as_ref()
            .map(|exchange| {
                exchange
                    .conflicts
                    .values()
                    .map(|p| p.conflict.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Applies a decision to one conflict, on the server and locally.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::StaleResolution`] if the server's copy changed
    /// since the conflict was loaded; the conflict stays pending.
    pub async fn resolve(
        &self,
        id: EntityId,
        choice: ConflictChoice<Entity>,
    ) -> SyncResult<ResolvedEntity<Entity>> {
        let mut guard = self.exchange.lock().await;
        let exchange = guard.as_mut().ok_or(SyncError::NoActiveSync)?;
        let pending = exchange
            .conflicts
            .get(&id)
            .cloned()
            .ok_or(SyncError::UnknownConflict(id))?;

        let resolved = resolve_conflict(pending.conflict.clone(), choice)?;
        self.apply_resolution(&exchange.token, &pending, &resolved)
            .await?;

        exchange.conflicts.remove(&id);
        self.stats.write().conflicts_resolved += 1;
        info!(project = %self.config.project, %id, remaining = exchange.conflicts.len(), "conflict resolved");
        Ok(resolved)
    }

    /// Resolves a conflict by keeping the server version under the
    /// original id and the client version under a newly allocated id.
    ///
    /// Returns the relocated client copy. If a call fails part way, the
    /// copy's id stays with the conflict and a retry finishes the same copy.
    pub async fn resolve_keeping_both(&self, id: EntityId) -> SyncResult<Entity> {
        let mut guard = self.exchange.lock().await;
        let exchange = guard.as_mut().ok_or(SyncError::NoActiveSync)?;
        let token = exchange.token.clone();
        let pending = exchange
            .conflicts
            .get_mut(&id)
            .ok_or(SyncError::UnknownConflict(id))?;

        let mut copy = match pending.relocated.clone() {
            Some(copy) => copy,
            None => {
                let client = pending
                    .conflict
                    .client()
                    .ok_or(SyncError::UnknownConflict(id))?;
                let copy = RelocatedCopy {
                    entity: client.with_id(self.allocator.claim_next_id()?),
                    pushed: false,
                };
                pending.relocated = Some(copy.clone());
                copy
            }
        };

        if !copy.pushed {
            let response = self
                .call(self.transport.push_entity(PushEntityRequest {
                    user_id: self.config.user_id.clone(),
                    sync_token: token.clone(),
                    entity: copy.entity.clone(),
                    expected_hash: None,
                }))
                .await?;
            // A push whose reply was lost leaves the copy already stored.
            let stored = response.current_hash == Some(copy.entity.fingerprint());
            if !response.accepted && !stored {
                pending.relocated = None;
                return Err(SyncError::StaleResolution(copy.entity.id()));
            }
            copy.pushed = true;
            pending.relocated = Some(copy.clone());
        }
        self.storage
            .write_entity(&self.config.project, &copy.entity)
            .await?;

        let pending = pending.clone();
        let resolved = resolve_conflict(pending.conflict.clone(), ConflictChoice::UseServer)?;
        self.apply_resolution(&token, &pending, &resolved).await?;

        exchange.conflicts.remove(&id);
        self.stats.write().conflicts_resolved += 1;
        info!(project = %self.config.project, %id, copy = %copy.entity.id(), "conflict resolved keeping both");
        Ok(copy.entity)
    }

    // Choosing the server side writes nothing remotely, so the server copy is
    // re-read to make sure the decision was taken against what it holds now.
    async fn ensure_server_unchanged(
        &self,
        token: &str,
        pending: &PendingConflict,
        id: EntityId,
    ) -> SyncResult<()> {
        let current = self
            .fetch_remote(token, id)
            .await?
            .map(|entity| entity.fingerprint());
        if current == pending.remote_hash {
            Ok(())
        } else {
            Err(SyncError::StaleResolution(id))
        }
    }

    async fn apply_resolution(
        &self,
        token: &str,
        pending: &PendingConflict,
        resolved: &ResolvedEntity<Entity>,
    ) -> SyncResult<()> {
        let project = &self.config.project;
        let id = resolved.id();

        match resolved {
            ResolvedEntity::Write(entity) => {
                if pending.remote_hash.as_ref() == Some(&entity.fingerprint()) {
                    self.ensure_server_unchanged(token, pending, id).await?;
                } else if !self
                    .push(token, entity.clone(), pending.remote_hash.clone())
                    .await?
                {
                    return Err(SyncError::StaleResolution(id));
                }

                if let Some(kind) = pending.local_kind.filter(|kind| *kind != entity.kind()) {
                    self.storage
                        .delete_entity(project, kind, id, DeleteOrigin::Remote)
                        .await?;
                }
                self.storage.write_entity(project, entity).await?;
            }
            ResolvedEntity::Delete(_) => {
                if pending.remote_hash.is_some() {
                    let response = self
                        .call(self.transport.delete_entity(DeleteEntityRequest {
                            user_id: self.config.user_id.clone(),
                            sync_token: token.to_string(),
                            id,
                            expected_hash: pending.remote_hash.clone(),
                        }))
                        .await?;
                    if !response.accepted {
                        return Err(SyncError::StaleResolution(id));
                    }
                } else {
                    self.ensure_server_unchanged(token, pending, id).await?;
                }

                if let Some(kind) = pending.local_kind {
                    self.storage
                        .delete_entity(project, kind, id, DeleteOrigin::Remote)
                        .await?;
                }
                let tombstone: BTreeSet<EntityId> = [id].into_iter().collect();
                self.deleted.record_deleted_ids(project, &tombstone).await?;
            }
        }

        self.storage.clear_pending_deletion(project, id).await?;
        Ok(())
    }

    /// Closes the open exchange once every conflict is resolved.
    pub async fn finish(&self) -> SyncResult<()> {
        let mut guard = self.exchange.lock().await;
        let exchange = guard.as_ref().ok_or(SyncError::NoActiveSync)?;
        if !exchange.conflicts.is_empty() {
            return Err(SyncError::UnresolvedConflicts {
                count: exchange.conflicts.len(),
            });
        }

        let token = exchange.token.clone();
        match self.end_exchange(&token, SyncOutcome::Completed).await {
            Ok(()) => {
                *guard = None;
                self.set_state(SyncState::Synced);
                let mut stats = self.stats.write();
                stats.cycles_completed += 1;
                stats.last_sync_time = Some(Instant::now());
                Ok(())
            }
            // The server already dropped the session; nothing is left to close.
            Err(e) if e.requires_new_session() => {
                *guard = None;
                self.handle_error(&e);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    async fn end_exchange(&self, token: &str, outcome: SyncOutcome) -> SyncResult<()> {
        let response = self
            .call(self.transport.end_sync(EndSyncRequest {
                user_id: self.config.user_id.clone(),
                sync_token: token.to_string(),
                outcome,
            }))
            .await?;
        debug!(project = %self.config.project, ?outcome, terminated = response.terminated, "sync exchange ended");
        Ok(())
    }

    fn handle_error(&self, error: &SyncError) {
        if matches!(error, SyncError::Cancelled) {
            self.set_state(SyncState::Idle);
        } else {
            self.set_state(SyncState::Error);
        }
        self.stats.write().last_error = Some(error.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::error::AllocationError;
    use crate::transport::MockTransport;
    use scribe_storage::InMemoryStorage;
    use scribe_sync_protocol::{Note, ProjectId, TimelineEvent, UserId};

    fn project() -> ProjectId {
        ProjectId::new("winter-book")
    }

    fn note(id: u32, content: &str) -> Entity {
        Entity::Note(Note {
            id: EntityId::new(id),
            created: 1_700_000_000_000,
            content: content.into(),
        })
    }

    fn engine(
        transport: MockTransport,
    ) -> (
        SyncEngine<MockTransport, InMemoryStorage, InMemoryStorage>,
        Arc<InMemoryStorage>,
    ) {
        let storage = Arc::new(InMemoryStorage::new());
        let config = SyncConfig::new(UserId::new("writer"), project())
            .with_retry(RetryConfig::new(3).with_base_delay(Duration::from_millis(1)));
        let engine = SyncEngine::new(config, transport, Arc::clone(&storage), Arc::clone(&storage));
        (engine, storage)
    }

    #[test]
    fn sync_state_checks() {
        assert!(SyncState::Idle.can_start_sync());
        assert!(SyncState::Synced.can_start_sync());
        assert!(SyncState::Error.can_start_sync());
        assert!(!SyncState::AwaitingResolution.can_start_sync());
        assert!(!SyncState::Applying.can_start_sync());

        assert!(SyncState::Diffing.is_active());
        assert!(!SyncState::AwaitingResolution.is_active());
        assert!(!SyncState::Idle.is_active());
    }

    #[tokio::test]
    async fn sync_engine_initial_state() {
        let (engine, _) = engine(MockTransport::new());
        assert_eq!(engine.state(), SyncState::Idle);
        assert_eq!(engine.stats().cycles_completed, 0);
        assert!(engine.pending_conflicts().await.is_empty());
    }

    #[tokio::test]
    async fn pushes_and_pulls_without_conflicts() {
        let transport = MockTransport::new();
        transport.insert_entity(note(2, "from the server"));
        let (engine, storage) = engine(transport);
        storage
            .write_entity(&project(), &note(1, "from this device"))
            .await
            .unwrap();

        let result = engine.sync().await.unwrap();

        assert!(result.completed);
        assert_eq!(result.pushed, 1);
        assert_eq!(result.pulled, 1);
        assert!(result.failures.is_empty());
        assert_eq!(engine.state(), SyncState::Synced);
        assert_eq!(engine.transport().entity(EntityId::new(1)), Some(note(1, "from this device")));
        assert_eq!(storage.get(&project(), EntityId::new(2)), Some(note(2, "from the server")));
        assert_eq!(engine.transport().outcomes(), vec![SyncOutcome::Completed]);
        assert_eq!(engine.stats().cycles_completed, 1);
    }

    #[tokio::test]
    async fn sync_absorbs_pulled_ids_into_allocator() {
        let transport = MockTransport::new();
        transport.insert_entity(note(30, "remote"));
        transport.insert_tombstone(EntityId::new(44));
        let (engine, _) = engine(transport);
        engine.prepare_ids().await.unwrap();

        engine.sync().await.unwrap();

        let created = engine
            .create_entity(|id| note(id.value(), "fresh"))
            .await
            .unwrap();
        assert_eq!(created.id(), EntityId::new(45));
    }

    #[tokio::test]
    async fn create_entity_requires_prepared_allocator() {
        let (engine, _) = engine(MockTransport::new());
        let err = engine
            .create_entity(|id| note(id.value(), "x"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::Allocation(AllocationError::NotPrepared { .. })
        ));
    }

    #[tokio::test]
    async fn conflicts_keep_exchange_open_until_resolved() {
        let transport = MockTransport::new();
        transport.insert_entity(note(6, "server edit"));
        let (engine, storage) = engine(transport);
        storage
            .write_entity(&project(), &note(6, "client edit"))
            .await
            .unwrap();

        let result = engine.sync().await.unwrap();
        assert!(!result.completed);
        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(engine.state(), SyncState::AwaitingResolution);
        assert!(engine.transport().outcomes().is_empty());

        let err = engine.finish().await.unwrap_err();
        assert!(matches!(err, SyncError::UnresolvedConflicts { count: 1 }));

        let resolved = engine
            .resolve(EntityId::new(6), ConflictChoice::UseClient)
            .await
            .unwrap();
        assert_eq!(resolved, ResolvedEntity::Write(note(6, "client edit")));
        assert_eq!(engine.transport().entity(EntityId::new(6)), Some(note(6, "client edit")));

        engine.finish().await.unwrap();
        assert_eq!(engine.state(), SyncState::Synced);
        assert_eq!(engine.transport().outcomes(), vec![SyncOutcome::Completed]);
    }

    #[tokio::test]
    async fn merged_resolution_overwrites_both_sides() {
        let transport = MockTransport::new();
        transport.insert_entity(note(6, "server"));
        let (engine, storage) = engine(transport);
        storage.write_entity(&project(), &note(6, "client")).await.unwrap();
        engine.sync().await.unwrap();

        engine
            .resolve(
                EntityId::new(6),
                ConflictChoice::UseMerged(note(6, "server + client")),
            )
            .await
            .unwrap();

        assert_eq!(storage.get(&project(), EntityId::new(6)), Some(note(6, "server + client")));
        assert_eq!(
            engine.transport().entity(EntityId::new(6)),
            Some(note(6, "server + client"))
        );
    }

    #[tokio::test]
    async fn stale_resolution_is_refused() {
        let transport = MockTransport::new();
        transport.insert_entity(note(6, "server"));
        let (engine, storage) = engine(transport);
        storage.write_entity(&project(), &note(6, "client")).await.unwrap();
        engine.sync().await.unwrap();

        // Someone else changed the server copy after the diff.
        engine.transport().insert_entity(note(6, "newer server"));

        let err = engine
            .resolve(EntityId::new(6), ConflictChoice::UseClient)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::StaleResolution(id) if id == EntityId::new(6)));
        assert_eq!(engine.pending_conflicts().await.len(), 1);
    }

    #[tokio::test]
    async fn local_delete_conflict_resolved_by_deleting() {
        let transport = MockTransport::new();
        transport.insert_entity(note(3, "keep me?"));
        let (engine, storage) = engine(transport);
        storage.write_entity(&project(), &note(3, "keep me?")).await.unwrap();
        storage
            .delete_entity(&project(), EntityKind::Note, EntityId::new(3), DeleteOrigin::Local)
            .await
            .unwrap();

        let result = engine.sync().await.unwrap();
        assert_eq!(result.conflicts.len(), 1);
        assert!(result.conflicts[0].client().is_none());

        let resolved = engine
            .resolve(EntityId::new(3), ConflictChoice::UseClient)
            .await
            .unwrap();
        assert_eq!(resolved, ResolvedEntity::Delete(EntityId::new(3)));
        assert!(engine.transport().entity(EntityId::new(3)).is_none());
        assert!(storage.pending_deletions(&project()).await.unwrap().is_empty());
        assert!(storage
            .deleted_ids(&project())
            .await
            .unwrap()
            .contains(&EntityId::new(3)));
    }

    #[tokio::test]
    async fn remote_delete_conflict_restored_from_client() {
        let transport = MockTransport::new();
        transport.insert_tombstone(EntityId::new(9));
        let (engine, storage) = engine(transport);
        let event = Entity::TimelineEvent(TimelineEvent {
            id: EntityId::new(9),
            order: 3,
            content: "the flood".into(),
            date: Some("spring".into()),
        });
        storage.write_entity(&project(), &event).await.unwrap();

        let result = engine.sync().await.unwrap();
        assert!(result.conflicts[0].server().is_none());

        engine
            .resolve(EntityId::new(9), ConflictChoice::UseClient)
            .await
            .unwrap();
        assert_eq!(engine.transport().entity(EntityId::new(9)), Some(event));
    }

    #[tokio::test]
    async fn keeping_both_moves_client_copy_to_new_id() {
        let transport = MockTransport::new();
        transport.insert_entity(note(5, "written on the laptop"));
        let (engine, storage) = engine(transport);
        storage
            .write_entity(&project(), &note(5, "written on the phone"))
            .await
            .unwrap();
        engine.prepare_ids().await.unwrap();

        engine.sync().await.unwrap();
        let copy = engine.resolve_keeping_both(EntityId::new(5)).await.unwrap();

        assert_eq!(copy.id(), EntityId::new(6));
        assert_eq!(storage.get(&project(), EntityId::new(5)), Some(note(5, "written on the laptop")));
        assert_eq!(storage.get(&project(), EntityId::new(6)), Some(note(6, "written on the phone")));
        assert_eq!(engine.transport().entity(EntityId::new(6)), Some(note(6, "written on the phone")));

        engine.finish().await.unwrap();
    }

    #[tokio::test]
    async fn keeping_both_retry_reuses_the_relocated_copy() {
        let transport = MockTransport::new();
        transport.insert_tombstone(EntityId::new(3));
        let storage = Arc::new(InMemoryStorage::new());
        let deleted = Arc::new(InMemoryStorage::new());
        let config = SyncConfig::new(UserId::new("writer"), project())
            .with_retry(RetryConfig::no_retry());
        let engine = SyncEngine::new(config, transport, Arc::clone(&storage), Arc::clone(&deleted));
        storage.write_entity(&project(), &note(3, "client text")).await.unwrap();
        engine.prepare_ids().await.unwrap();
        engine.sync().await.unwrap();

        deleted.set_available(false);
        let err = engine.resolve_keeping_both(EntityId::new(3)).await.unwrap_err();
        assert!(matches!(err, SyncError::Storage(_)));
        assert_eq!(engine.pending_conflicts().await.len(), 1);

        deleted.set_available(true);
        let copy = engine.resolve_keeping_both(EntityId::new(3)).await.unwrap();
        assert_eq!(copy, note(4, "client text"));
        assert!(engine.transport().entity(EntityId::new(5)).is_none());
        assert_eq!(storage.entities(&project()), vec![note(4, "client text")]);
        assert!(deleted
            .deleted_ids(&project())
            .await
            .unwrap()
            .contains(&EntityId::new(3)));

        engine.finish().await.unwrap();
    }

    #[tokio::test]
    async fn server_choice_is_refused_when_server_moved_on() {
        let transport = MockTransport::new();
        transport.insert_entity(note(6, "server"));
        let (engine, storage) = engine(transport);
        storage.write_entity(&project(), &note(6, "client")).await.unwrap();
        engine.sync().await.unwrap();

        engine.transport().insert_entity(note(6, "newer server"));

        let err = engine
            .resolve(EntityId::new(6), ConflictChoice::UseServer)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::StaleResolution(id) if id == EntityId::new(6)));
        assert_eq!(storage.get(&project(), EntityId::new(6)), Some(note(6, "client")));
        assert_eq!(engine.pending_conflicts().await.len(), 1);
    }

    #[tokio::test]
    async fn cancel_ends_open_exchange() {
        let transport = MockTransport::new();
        transport.insert_entity(note(6, "server"));
        let (engine, storage) = engine(transport);
        storage.write_entity(&project(), &note(6, "client")).await.unwrap();
        engine.sync().await.unwrap();

        assert!(engine.cancel().await.unwrap());
        assert_eq!(engine.state(), SyncState::Idle);
        assert_eq!(engine.transport().outcomes(), vec![SyncOutcome::Cancelled]);
        assert!(!engine.cancel().await.unwrap());

        let err = engine
            .resolve(EntityId::new(6), ConflictChoice::UseServer)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NoActiveSync));
    }

    #[tokio::test]
    async fn begin_is_retried_on_transient_errors() {
        let transport = MockTransport::new();
        transport.fail_next_begins(2);
        let (engine, _) = engine(transport);

        engine.sync().await.unwrap();
        assert_eq!(engine.stats().retries, 2);
    }

    #[tokio::test]
    async fn begin_gives_up_after_max_attempts() {
        let transport = MockTransport::new();
        transport.fail_next_begins(5);
        let (engine, _) = engine(transport);

        let err = engine.sync().await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(engine.state(), SyncState::Error);
        assert!(engine.stats().last_error.is_some());
    }

    #[tokio::test]
    async fn expired_session_aborts_the_exchange() {
        let transport = MockTransport::new();
        transport.insert_entity(note(2, "remote"));
        transport.expire_session(true);
        let (engine, _) = engine(transport);

        let err = engine.sync().await.unwrap_err();
        assert!(err.requires_new_session());
        assert_eq!(engine.state(), SyncState::Error);
    }

    #[tokio::test]
    async fn unreadable_entity_does_not_stop_the_rest() {
        let (engine, storage) = engine(MockTransport::new());
        storage.write_entity(&project(), &note(1, "fine")).await.unwrap();
        storage.write_entity(&project(), &note(2, "broken")).await.unwrap();
        storage.mark_corrupted(&project(), EntityId::new(2));

        let result = engine.sync().await.unwrap();
        assert!(result.completed);
        assert_eq!(result.pushed, 1);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].id, EntityId::new(2));
        assert!(engine.transport().entity(EntityId::new(2)).is_none());
    }

    #[tokio::test]
    async fn settled_local_deletions_are_cleared() {
        let transport = MockTransport::new();
        transport.insert_tombstone(EntityId::new(4));
        let (engine, storage) = engine(transport);
        storage.write_entity(&project(), &note(4, "gone")).await.unwrap();
        storage
            .delete_entity(&project(), EntityKind::Note, EntityId::new(4), DeleteOrigin::Local)
            .await
            .unwrap();

        let result = engine.sync().await.unwrap();
        assert!(result.plan.is_empty());
        assert!(storage.pending_deletions(&project()).await.unwrap().is_empty());
    }
}
