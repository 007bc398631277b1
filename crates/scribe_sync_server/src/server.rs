//! Main sync server.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::{HandlerContext, RequestHandler};
use crate::session::{Clock, SystemClock};
use crate::store::ServerStore;
use scribe_sync_protocol::{ErrorKind, SyncMessage};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// The sync server.
///
/// Routes protocol messages to the [`RequestHandler`], which checks every
/// request after `BeginSync` against the user's live session. Transport
/// is up to the embedder: an HTTP layer would feed request bodies to
/// [`SyncServer::handle_bytes`].
///
/// # Example
///
/// ```
/// use scribe_sync_server::{ServerConfig, SyncServer};
///
/// let server = SyncServer::new(ServerConfig::default());
/// assert_eq!(server.config().token_length, 30);
/// ```
#[derive(Debug)]
pub struct SyncServer {
    handler: RequestHandler,
    context: Arc<HandlerContext>,
}

impl SyncServer {
    /// Creates a new sync server with an empty store.
    pub fn new(config: ServerConfig) -> Self {
        let store = Arc::new(ServerStore::new(config.max_entities_per_project));
        Self::with_store(config, store)
    }

    /// Creates a sync server over an existing store.
    pub fn with_store(config: ServerConfig, store: Arc<ServerStore>) -> Self {
        Self::with_clock(config, store, Arc::new(SystemClock))
    }

    /// Creates a sync server whose sessions expire against `clock`.
    pub fn with_clock(
        config: ServerConfig,
        store: Arc<ServerStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let context = Arc::new(HandlerContext::new(config, store, clock));
        let handler = RequestHandler::new(Arc::clone(&context));

        Self { handler, context }
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.context.config
    }

    /// The authoritative store.
    pub fn store(&self) -> &Arc<ServerStore> {
        &self.context.store
    }

    /// Handles a sync message, answering failures with [`SyncMessage::Error`].
    pub async fn handle_message(&self, message: SyncMessage) -> SyncMessage {
        match self.dispatch(message).await {
            Ok(response) => response,
            Err(e) => {
                if e.is_server_error() {
                    warn!(error = %e, "sync request failed");
                } else {
                    debug!(error = %e, "sync request refused");
                }
                SyncMessage::error(e.to_error_kind(), e.to_string())
            }
        }
    }

    /// Decodes a CBOR request and encodes the response.
    ///
    /// Undecodable input is answered with an `InvalidRequest` error message;
    /// only a failure to encode the response is returned as `Err`.
    pub async fn handle_bytes(&self, bytes: &[u8]) -> ServerResult<Vec<u8>> {
        let response = match SyncMessage::decode(bytes) {
            Ok(message) => self.handle_message(message).await,
            Err(e) => {
                debug!(error = %e, "undecodable sync request");
                SyncMessage::error(ErrorKind::InvalidRequest, e.to_string())
            }
        };
        response.encode().map_err(|e| {
            let error = ServerError::response_encoding(e);
            warn!(error = %error, "sync response dropped");
            error
        })
    }

    /// Number of stored sessions.
    pub async fn session_count(&self) -> usize {
        self.context.sessions.session_count().await
    }

    /// Removes expired sessions now.
    pub async fn purge_expired_sessions(&self) -> usize {
        self.context.sessions.purge_expired().await
    }

    /// Spawns a task purging expired sessions every `reaper_interval`.
    ///
    /// The task stops once the server is dropped.
    pub fn spawn_session_reaper(self: &Arc<Self>) -> JoinHandle<()> {
        let server: Weak<Self> = Arc::downgrade(self);
        let period = self.config().reaper_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(server) = server.upgrade() else {
                    break;
                };
                server.purge_expired_sessions().await;
            }
        })
    }

    async fn dispatch(&self, message: SyncMessage) -> ServerResult<SyncMessage> {
        let response = match message {
            SyncMessage::BeginSyncRequest(req) => {
                SyncMessage::BeginSyncResponse(self.handler.handle_begin(req).await?)
            }
            SyncMessage::FetchEntityRequest(req) => {
                SyncMessage::FetchEntityResponse(self.handler.handle_fetch(req).await?)
            }
            SyncMessage::PushEntityRequest(req) => {
                SyncMessage::PushEntityResponse(self.handler.handle_push(req).await?)
            }
            SyncMessage::DeleteEntityRequest(req) => {
                SyncMessage::DeleteEntityResponse(self.handler.handle_delete(req).await?)
            }
            SyncMessage::EndSyncRequest(req) => {
                SyncMessage::EndSyncResponse(self.handler.handle_end(req).await?)
            }
            other => {
                return Err(ServerError::InvalidRequest(format!(
                    "unexpected message type {}",
                    other.type_code()
                )))
            }
        };
        Ok(response)
    }
}
