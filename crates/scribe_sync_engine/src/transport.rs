//! Transport abstraction for sync operations.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use scribe_sync_protocol::{
    BeginSyncRequest, BeginSyncResponse, DeleteEntityRequest, DeleteEntityResponse,
    EndSyncRequest, EndSyncResponse, Entity, EntityHashRecord, EntityId, FetchEntityRequest,
    FetchEntityResponse, PushEntityRequest, PushEntityResponse, SyncEntity, SyncOutcome,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Transport for communicating with the sync server.
///
/// Implementations handle the actual network communication. The engine
/// calls these methods and only interprets their typed results.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Opens a sync exchange and returns the server snapshot.
    async fn begin_sync(&self, request: BeginSyncRequest) -> SyncResult<BeginSyncResponse>;

    /// Fetches one entity.
    async fn fetch_entity(&self, request: FetchEntityRequest) -> SyncResult<FetchEntityResponse>;

    /// Writes one entity on the server.
    async fn push_entity(&self, request: PushEntityRequest) -> SyncResult<PushEntityResponse>;

    /// Deletes one entity on the server.
    async fn delete_entity(&self, request: DeleteEntityRequest)
        -> SyncResult<DeleteEntityResponse>;

    /// Closes the exchange.
    async fn end_sync(&self, request: EndSyncRequest) -> SyncResult<EndSyncResponse>;

    /// Checks if the transport is connected.
    fn is_connected(&self) -> bool;
}

/// Token handed out by [`MockTransport`].
pub const MOCK_SYNC_TOKEN: &str = "mock-sync-token";

/// A mock transport for testing.
///
/// Holds a tiny in-memory server: entities, tombstones and the outcomes
/// of every `end_sync`. Failures can be scripted.
#[derive(Debug, Default)]
pub struct MockTransport {
    disconnected: AtomicBool,
    begin_failures: AtomicU32,
    session_expired: AtomicBool,
    entities: RwLock<BTreeMap<EntityId, Entity>>,
    deleted: RwLock<BTreeSet<EntityId>>,
    outcomes: RwLock<Vec<SyncOutcome>>,
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a server-side entity.
    pub fn insert_entity(&self, entity: Entity) {
        self.entities.write().insert(entity.id(), entity);
    }

    /// Seeds a server-side tombstone.
    pub fn insert_tombstone(&self, id: EntityId) {
        self.entities.write().remove(&id);
        self.deleted.write().insert(id);
    }

    /// Server-side copy of an entity.
    pub fn entity(&self, id: EntityId) -> Option<Entity> {
        self.entities.read().get(&id).cloned()
    }

    /// Makes the next `count` begin calls fail with a retryable error.
    pub fn fail_next_begins(&self, count: u32) {
        self.begin_failures.store(count, Ordering::SeqCst);
    }

    /// Makes every call after begin fail as if the session had expired.
    pub fn expire_session(&self, expired: bool) {
        self.session_expired.store(expired, Ordering::SeqCst);
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.disconnected.store(!connected, Ordering::SeqCst);
    }

    /// Outcomes of every `end_sync` so far.
    pub fn outcomes(&self) -> Vec<SyncOutcome> {
        self.outcomes.read().clone()
    }

    fn check_session(&self, token: &str) -> SyncResult<()> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        if self.session_expired.load(Ordering::SeqCst) || token != MOCK_SYNC_TOKEN {
            return Err(SyncError::SessionInvalid("mock session expired".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl SyncTransport for MockTransport {
    async fn begin_sync(&self, _request: BeginSyncRequest) -> SyncResult<BeginSyncResponse> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        let remaining = self.begin_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.begin_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(SyncError::transport_retryable("mock connection reset"));
        }

        Ok(BeginSyncResponse {
            sync_token: MOCK_SYNC_TOKEN.into(),
            hashes: self.entities.read().values().map(EntityHashRecord::of).collect(),
            deleted_ids: self.deleted.read().clone(),
        })
    }

    async fn fetch_entity(&self, request: FetchEntityRequest) -> SyncResult<FetchEntityResponse> {
        self.check_session(&request.sync_token)?;
        Ok(FetchEntityResponse {
            entity: self.entity(request.id),
        })
    }

    async fn push_entity(&self, request: PushEntityRequest) -> SyncResult<PushEntityResponse> {
        self.check_session(&request.sync_token)?;
        let mut entities = self.entities.write();
        let current = entities.get(&request.entity.id()).map(SyncEntity::fingerprint);
        if current != request.expected_hash {
            return Ok(PushEntityResponse {
                accepted: false,
                current_hash: current,
            });
        }

        let hash = request.entity.fingerprint();
        self.deleted.write().remove(&request.entity.id());
        entities.insert(request.entity.id(), request.entity);
        Ok(PushEntityResponse {
            accepted: true,
            current_hash: Some(hash),
        })
    }

    async fn delete_entity(
        &self,
        request: DeleteEntityRequest,
    ) -> SyncResult<DeleteEntityResponse> {
        self.check_session(&request.sync_token)?;
        let mut entities = self.entities.write();
        let current = entities.get(&request.id).map(SyncEntity::fingerprint);
        if current != request.expected_hash {
            return Ok(DeleteEntityResponse {
                accepted: false,
                current_hash: current,
            });
        }

        entities.remove(&request.id);
        self.deleted.write().insert(request.id);
        Ok(DeleteEntityResponse {
            accepted: true,
            current_hash: None,
        })
    }

    async fn end_sync(&self, request: EndSyncRequest) -> SyncResult<EndSyncResponse> {
        self.check_session(&request.sync_token)?;
        self.outcomes.write().push(request.outcome);
        Ok(EndSyncResponse { terminated: true })
    }

    fn is_connected(&self) -> bool {
        !self.disconnected.load(Ordering::SeqCst)
    }
}
