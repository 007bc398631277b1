//! CBOR-over-HTTP transport and an in-process loopback client.
//!
//! Requests and responses travel as CBOR-encoded [`SyncMessage`]s. The
//! actual HTTP client is abstracted via a trait so any library (or no
//! network at all, see [`LoopbackClient`]) can carry the bytes.

use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use async_trait::async_trait;
use parking_lot::RwLock;
use scribe_sync_protocol::{
    BeginSyncRequest, BeginSyncResponse, DeleteEntityRequest, DeleteEntityResponse,
    EndSyncRequest, EndSyncResponse, ErrorKind, FetchEntityRequest, FetchEntityResponse,
    PushEntityRequest, PushEntityResponse, SyncMessage,
};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

const BEGIN_PATH: &str = "/sync/begin";
const FETCH_PATH: &str = "/sync/fetch";
const PUSH_PATH: &str = "/sync/push";
const DELETE_PATH: &str = "/sync/delete";
const END_PATH: &str = "/sync/end";

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP transport.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends a POST request and returns the response body.
    async fn post(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, String>;

    /// Checks if the client is connected/healthy.
    fn is_healthy(&self) -> bool;
}

/// CBOR-over-HTTP sync transport.
pub struct CborTransport<C: HttpClient> {
    /// Server origin the `/sync/...` paths are appended to.
    base_url: String,
    client: C,
    closed: AtomicBool,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> CborTransport<C> {
    /// Creates a new transport.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into(),
            client,
            closed: AtomicBool::new(false),
            last_error: RwLock::new(None),
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the last transport error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Refuses every further request.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    async fn exchange(&self, path: &str, request: SyncMessage) -> SyncResult<SyncMessage> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }

        let body = request.encode()?;
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, bytes = body.len(), "posting sync request");

        let response_body = self.client.post(&url, body).await.map_err(|e| {
            warn!(%url, error = %e, "sync request failed");
            *self.last_error.write() = Some(e.clone());
            SyncError::transport_retryable(e)
        })?;
        *self.last_error.write() = None;

        match SyncMessage::decode(&response_body)? {
            SyncMessage::Error { kind, message } => Err(error_from_kind(kind, message)),
            response => Ok(response),
        }
    }
}

fn error_from_kind(kind: ErrorKind, message: String) -> SyncError {
    match kind {
        ErrorKind::SessionInvalid => SyncError::SessionInvalid(message),
        ErrorKind::SyncInProgress => SyncError::SyncInProgress(message),
        ErrorKind::InvalidRequest => SyncError::Rejected(message),
        ErrorKind::VersionMismatch => SyncError::VersionMismatch(message),
        ErrorKind::Internal => SyncError::ServerError(message),
    }
}

fn unexpected(expected: &str, actual: &SyncMessage) -> SyncError {
    SyncError::UnexpectedResponse(format!(
        "expected {}, got message type {}",
        expected,
        actual.type_code()
    ))
}

#[async_trait]
impl<C: HttpClient> SyncTransport for CborTransport<C> {
    async fn begin_sync(&self, request: BeginSyncRequest) -> SyncResult<BeginSyncResponse> {
        match self
            .exchange(BEGIN_PATH, SyncMessage::BeginSyncRequest(request))
            .await?
        {
            SyncMessage::BeginSyncResponse(response) => Ok(response),
            other => Err(unexpected("BeginSyncResponse", &other)),
        }
    }

    async fn fetch_entity(&self, request: FetchEntityRequest) -> SyncResult<FetchEntityResponse> {
        match self
            .exchange(FETCH_PATH, SyncMessage::FetchEntityRequest(request))
            .await?
        {
            SyncMessage::FetchEntityResponse(response) => Ok(response),
            other => Err(unexpected("FetchEntityResponse", &other)),
        }
    }

    async fn push_entity(&self, request: PushEntityRequest) -> SyncResult<PushEntityResponse> {
        match self
            .exchange(PUSH_PATH, SyncMessage::PushEntityRequest(request))
            .await?
        {
            SyncMessage::PushEntityResponse(response) => Ok(response),
            other => Err(unexpected("PushEntityResponse", &other)),
        }
    }

    async fn delete_entity(
        &self,
        request: DeleteEntityRequest,
    ) -> SyncResult<DeleteEntityResponse> {
        match self
            .exchange(DELETE_PATH, SyncMessage::DeleteEntityRequest(request))
            .await?
        {
            SyncMessage::DeleteEntityResponse(response) => Ok(response),
            other => Err(unexpected("DeleteEntityResponse", &other)),
        }
    }

    async fn end_sync(&self, request: EndSyncRequest) -> SyncResult<EndSyncResponse> {
        match self
            .exchange(END_PATH, SyncMessage::EndSyncRequest(request))
            .await?
        {
            SyncMessage::EndSyncResponse(response) => Ok(response),
            other => Err(unexpected("EndSyncResponse", &other)),
        }
    }

    fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && self.client.is_healthy()
    }
}

/// A server reachable without a network, one POST body at a time.
#[async_trait]
pub trait LoopbackServer: Send + Sync {
    /// Handles a POST request and returns the response body.
    async fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String>;
}

/// An [`HttpClient`] that hands request bodies straight to a [`LoopbackServer`].
///
/// Only the `/sync/...` part of the URL reaches the server.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
    healthy: AtomicBool,
}

impl<S: LoopbackServer> LoopbackClient<S> {
    /// Wraps `server`; the client starts healthy.
    pub fn new(server: S) -> Self {
        Self {
            server,
            healthy: AtomicBool::new(true),
        }
    }

    /// Simulates losing or regaining the network.
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// The wrapped server.
    pub fn server(&self) -> &S {
        &self.server
    }
}

#[async_trait]
impl<S: LoopbackServer> HttpClient for LoopbackClient<S> {
    async fn post(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, String> {
        if !self.is_healthy() {
            return Err("network unreachable".into());
        }
        let path = url.find("/sync/").map(|i| &url[i..]).unwrap_or(url);
        self.server.handle_post(path, &body).await
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}
