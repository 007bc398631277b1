//! # Scribe Sync Engine
//!
//! Client side of Scribe's offline-first entity synchronization.
//!
//! This crate provides:
//! - [`IdAllocator`] for collision-free ids on entities created offline
//! - [`LocalIndex`] for fingerprinting the local project
//! - [`SyncEngine`], which runs one sync exchange against the server
//! - A transport abstraction with a CBOR transport and a loopback client
//!
//! ## Architecture
//!
//! One sync exchange runs as:
//! 1. Begin a session; the server returns its `{id -> fingerprint}` map
//!    and its tombstones
//! 2. Fingerprint local storage and diff the two maps
//! 3. Push local-only entities, pull remote-only entities
//! 4. Surface conflicts; the exchange stays open until they are resolved
//!    or the sync is cancelled
//!
//! ## Key Invariants
//!
//! - Ids are never reused; the allocator refuses to issue ids until prepared
//! - Conflicts are never resolved without an explicit choice
//! - A failure on one entity never aborts the rest of the plan
//! - Cancelling always releases the server-side session

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod allocator;
mod config;
mod error;
mod http;
mod index;
mod state;
mod transport;

pub use allocator::{
    DeletedIdScanner, HighestIdScanner, IdAllocator, PendingDeletionScanner, StorageKindScanner,
    FIRST_ENTITY_ID,
};
pub use config::{RetryConfig, SyncConfig};
pub use error::{AllocationError, EntityFailure, SyncError, SyncResult};
pub use http::{CborTransport, HttpClient, LoopbackClient, LoopbackServer};
pub use index::LocalIndex;
pub use state::{SyncCycleResult, SyncEngine, SyncState, SyncStats};
pub use transport::{MockTransport, SyncTransport, MOCK_SYNC_TOKEN};
