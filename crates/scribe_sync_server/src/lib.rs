//! # Scribe Sync Server
//!
//! Server side of Scribe's offline-first entity synchronization.
//!
//! This crate provides:
//! - [`SyncSessionManager`], allowing at most one live sync exchange per user
//! - [`ServerStore`], the authoritative entities, fingerprints and tombstones
//! - [`RequestHandler`] and [`SyncServer`], which route protocol messages
//!
//! # Sessions
//!
//! A sync exchange starts with `BeginSync`, which creates a session and
//! returns a random token together with the server's `{id -> fingerprint}`
//! map. Every later request must present that token. A session expires
//! once it has been idle for longer than the configured TTL; each
//! validated request resets the idle clock.
//!
//! ```rust
//! use scribe_sync_server::{ServerConfig, SyncServer};
//! use scribe_sync_protocol::{BeginSyncRequest, ProjectId, SyncMessage, UserId};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let server = SyncServer::new(ServerConfig::default());
//! let begin = BeginSyncRequest::new(UserId::new("writer"), ProjectId::new("novel"));
//!
//! let response = server.handle_message(SyncMessage::BeginSyncRequest(begin)).await;
//! assert!(matches!(response, SyncMessage::BeginSyncResponse(_)));
//! # });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod handler;
mod manager;
mod server;
mod session;
mod store;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::{HandlerContext, RequestHandler};
pub use manager::{SyncSessionManager, TOKEN_ALPHABET};
pub use server::SyncServer;
pub use session::{Clock, ManagedSession, ManualClock, ProjectSyncSession, SyncSession, SystemClock};
pub use store::{ServerStore, WriteOutcome};
