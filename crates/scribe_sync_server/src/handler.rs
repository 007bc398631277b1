//! Request handlers for sync endpoints.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::manager::SyncSessionManager;
use crate::session::{Clock, ProjectSyncSession, SyncSession};
use crate::store::ServerStore;
use scribe_sync_protocol::{
    BeginSyncRequest, BeginSyncResponse, DeleteEntityRequest, DeleteEntityResponse,
    EndSyncRequest, EndSyncResponse, EntityHashRecord, FetchEntityRequest, FetchEntityResponse,
    ProjectId, PushEntityRequest, PushEntityResponse, SyncEntity, UserId,
};
use std::sync::Arc;
use tracing::{debug, info};

/// Context for request handling.
#[derive(Debug)]
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// Authoritative entities (shared across all handlers).
    pub store: Arc<ServerStore>,
    /// Live sync sessions, one per user.
    pub sessions: SyncSessionManager<ProjectSyncSession>,
}

impl HandlerContext {
    /// Creates a new handler context.
    pub fn new(config: ServerConfig, store: Arc<ServerStore>, clock: Arc<dyn Clock>) -> Self {
        let sessions =
            SyncSessionManager::with_clock(config.session_ttl, config.token_length, clock);
        Self {
            config,
            store,
            sessions,
        }
    }

    async fn project_for(&self, user: &UserId, token: &str) -> ServerResult<ProjectId> {
        self.sessions
            .with_validated_session(user, token, |session| session.project().clone())
            .await
    }
}

/// Handler for sync requests.
#[derive(Debug)]
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// Opens a sync exchange and returns the server's current hash map.
    pub async fn handle_begin(
        &self,
        request: BeginSyncRequest,
    ) -> ServerResult<BeginSyncResponse> {
        request.check_version(self.context.config.protocol_version)?;

        let user = request.user_id;
        let project = request.project;
        let (hashes, deleted_ids) = self.context.store.snapshot(&user, &project);
        let snapshot = EntityHashRecord::to_hashes(&hashes);
        let factory = {
            let project = project.clone();
            move |session: SyncSession| ProjectSyncSession::new(session, project, snapshot)
        };

        let sync_token = if request.replace_existing {
            self.context
                .sessions
                .create_new_session(&user, factory)
                .await
        } else {
            self.context
                .sessions
                .try_create_new_session(&user, factory)
                .await
                .ok_or_else(|| ServerError::SyncInProgress(user.to_string()))?
        };

        info!(
            user = %user,
            project = %project,
            entities = hashes.len(),
            tombstones = deleted_ids.len(),
            "sync session started"
        );
        Ok(BeginSyncResponse {
            sync_token,
            hashes,
            deleted_ids,
        })
    }

    /// Returns one entity, or `None` if the server does not hold it.
    pub async fn handle_fetch(
        &self,
        request: FetchEntityRequest,
    ) -> ServerResult<FetchEntityResponse> {
        let project = self
            .context
            .project_for(&request.user_id, &request.sync_token)
            .await?;
        let entity = self.context.store.get(&request.user_id, &project, request.id);
        Ok(FetchEntityResponse { entity })
    }

    /// Writes one entity if the client's expected fingerprint is current.
    pub async fn handle_push(
        &self,
        request: PushEntityRequest,
    ) -> ServerResult<PushEntityResponse> {
        let project = self
            .context
            .project_for(&request.user_id, &request.sync_token)
            .await?;
        let id = request.entity.id();
        let outcome = self.context.store.put(
            &request.user_id,
            &project,
            request.entity,
            request.expected_hash.as_ref(),
        )?;

        debug!(%id, accepted = outcome.is_applied(), "push");
        Ok(PushEntityResponse {
            accepted: outcome.is_applied(),
            current_hash: outcome.current_hash().cloned(),
        })
    }

    /// Deletes one entity if the client's expected fingerprint is current.
    pub async fn handle_delete(
        &self,
        request: DeleteEntityRequest,
    ) -> ServerResult<DeleteEntityResponse> {
        let project = self
            .context
            .project_for(&request.user_id, &request.sync_token)
            .await?;
        let outcome = self.context.store.delete(
            &request.user_id,
            &project,
            request.id,
            request.expected_hash.as_ref(),
        )?;

        debug!(id = %request.id, accepted = outcome.is_applied(), "delete");
        Ok(DeleteEntityResponse {
            accepted: outcome.is_applied(),
            current_hash: outcome.current_hash().cloned(),
        })
    }

    /// Closes the exchange.
    pub async fn handle_end(&self, request: EndSyncRequest) -> ServerResult<EndSyncResponse> {
        let session = self
            .context
            .sessions
            .terminate_session_with_token(&request.user_id, &request.sync_token)
            .await?;

        let current = self.context.store.hashes(&request.user_id, session.project());
        let before = session.snapshot();
        let changed = current
            .iter()
            .filter(|&(id, hash)| before.get(id) != Some(hash))
            .count()
            + before.keys().filter(|id| !current.contains_key(*id)).count();

        info!(
            user = %request.user_id,
            project = %session.project(),
            outcome = ?request.outcome,
            changed,
            "sync session ended"
        );
        Ok(EndSyncResponse { terminated: true })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{ManualClock, SystemClock};
    use scribe_sync_protocol::{
        Entity, EntityId, Note, ProtocolError, SyncOutcome, PROTOCOL_VERSION,
    };
    use std::time::Duration;

    fn note(id: u32, content: &str) -> Entity {
        Entity::Note(Note {
            id: EntityId::new(id),
            created: 0,
            content: content.into(),
        })
    }

    fn handler() -> RequestHandler {
        let context = HandlerContext::new(
            ServerConfig::default(),
            Arc::new(ServerStore::default()),
            Arc::new(SystemClock),
        );
        RequestHandler::new(Arc::new(context))
    }

    fn begin() -> BeginSyncRequest {
        BeginSyncRequest::new(UserId::new("ada"), ProjectId::new("engines"))
    }

    #[tokio::test]
    async fn begin_returns_snapshot() {
        let handler = handler();
        let user = UserId::new("ada");
        let project = ProjectId::new("engines");
        handler.context.store.seed(&user, &project, note(3, "hello"));

        let response = handler.handle_begin(begin()).await.unwrap();
        assert_eq!(response.sync_token.len(), 30);
        assert_eq!(response.hashes.len(), 1);
        assert_eq!(response.hashes[0].id, EntityId::new(3));
        assert!(response.deleted_ids.is_empty());
    }

    #[tokio::test]
    async fn second_begin_is_refused() {
        let handler = handler();
        handler.handle_begin(begin()).await.unwrap();

        let err = handler.handle_begin(begin()).await.unwrap_err();
        assert!(matches!(err, ServerError::SyncInProgress(_)));

        let replaced = handler.handle_begin(begin().replacing_existing()).await;
        assert!(replaced.is_ok());
    }

    #[tokio::test]
    async fn version_mismatch() {
        let handler = handler();
        let mut request = begin();
        request.protocol_version = PROTOCOL_VERSION + 1;

        let err = handler.handle_begin(request).await.unwrap_err();
        assert!(matches!(
            err,
            ServerError::Protocol(ProtocolError::VersionMismatch { remote, .. })
                if remote == PROTOCOL_VERSION + 1
        ));
    }

    #[tokio::test]
    async fn push_fetch_end() {
        let handler = handler();
        let token = handler.handle_begin(begin()).await.unwrap().sync_token;
        let user = UserId::new("ada");

        let pushed = handler
            .handle_push(PushEntityRequest {
                user_id: user.clone(),
                sync_token: token.clone(),
                entity: note(1, "new"),
                expected_hash: None,
            })
            .await
            .unwrap();
        assert!(pushed.accepted);
        assert_eq!(pushed.current_hash, Some(note(1, "new").fingerprint()));

        let fetched = handler
            .handle_fetch(FetchEntityRequest {
                user_id: user.clone(),
                sync_token: token.clone(),
                id: EntityId::new(1),
            })
            .await
            .unwrap();
        assert_eq!(fetched.entity, Some(note(1, "new")));

        let ended = handler
            .handle_end(EndSyncRequest {
                user_id: user.clone(),
                sync_token: token.clone(),
                outcome: SyncOutcome::Completed,
            })
            .await
            .unwrap();
        assert!(ended.terminated);

        // The token is dead once the exchange ended.
        let err = handler
            .handle_fetch(FetchEntityRequest {
                user_id: user,
                sync_token: token,
                id: EntityId::new(1),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::SessionInvalid(_)));
    }

    #[tokio::test]
    async fn writes_are_checked_against_the_store_not_the_snapshot() {
        let handler = handler();
        let user = UserId::new("ada");
        let project = ProjectId::new("engines");
        handler.context.store.seed(&user, &project, note(2, "at begin"));
        let token = handler.handle_begin(begin()).await.unwrap().sync_token;

        // Another writer moves the entity on after the snapshot was taken.
        handler.context.store.seed(&user, &project, note(2, "later"));

        let push = |expected: Entity| PushEntityRequest {
            user_id: user.clone(),
            sync_token: token.clone(),
            entity: note(2, "mine"),
            expected_hash: Some(expected.fingerprint()),
        };
        let stale = handler.handle_push(push(note(2, "at begin"))).await.unwrap();
        assert!(!stale.accepted);
        assert_eq!(stale.current_hash, Some(note(2, "later").fingerprint()));

        let fresh = handler.handle_push(push(note(2, "later"))).await.unwrap();
        assert!(fresh.accepted);

        let session = handler
            .context
            .sessions
            .get_active_sync_session(&user)
            .await
            .unwrap();
        assert_eq!(
            session.snapshot().get(&EntityId::new(2)),
            Some(&note(2, "at begin").fingerprint())
        );
    }

    #[tokio::test]
    async fn wrong_token_is_refused() {
        let handler = handler();
        handler.handle_begin(begin()).await.unwrap();

        let err = handler
            .handle_delete(DeleteEntityRequest {
                user_id: UserId::new("ada"),
                sync_token: "forged".into(),
                id: EntityId::new(1),
                expected_hash: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::SessionInvalid(_)));
    }

    #[tokio::test]
    async fn idle_session_expires() {
        let clock = Arc::new(ManualClock::new());
        let config = ServerConfig::default().with_session_ttl(Duration::from_secs(10));
        let context =
            HandlerContext::new(config, Arc::new(ServerStore::default()), clock.clone());
        let handler = RequestHandler::new(Arc::new(context));
        let token = handler.handle_begin(begin()).await.unwrap().sync_token;

        clock.advance(Duration::from_secs(11));
        let err = handler
            .handle_fetch(FetchEntityRequest {
                user_id: UserId::new("ada"),
                sync_token: token,
                id: EntityId::new(1),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::SessionInvalid(_)));

        // The abandoned session no longer blocks a new exchange.
        assert!(handler.handle_begin(begin()).await.is_ok());
    }
}
