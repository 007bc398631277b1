//! # Scribe Sync Protocol
//!
//! Entity model, fingerprints, diffing and wire messages shared by the
//! Scribe sync client and server.
//!
//! This crate provides:
//! - [`Entity`] and its per-kind payloads
//! - [`fingerprint`] for deterministic content digests
//! - [`diff`] for classifying two hash maps into a [`SyncPlan`]
//! - [`EntityConflict`] and [`resolve_conflict`] for user-mediated resolution
//! - Protocol messages (begin, fetch, push, delete, end) with CBOR codecs
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod conflict;
mod diff;
mod entity;
mod error;
mod fingerprint;
mod hashes;
mod messages;

pub use conflict::{resolve_conflict, ConflictChoice, EntityConflict, ResolvedEntity};
pub use diff::{diff, ConflictKind, PlannedConflict, SyncAction, SyncPlan};
pub use entity::{
    EncyclopediaEntry, Entity, EntityId, EntityKind, Note, ProjectId, Scene, SceneDraft,
    SceneType, SyncEntity, TimelineEvent, UserId,
};
pub use error::{ProtocolError, ProtocolResult};
pub use fingerprint::{fingerprint, EntityFingerprint, FingerprintHasher, FINGERPRINT_LEN};
pub use hashes::{EntityHashRecord, EntityHashes};
pub use messages::{
    BeginSyncRequest, BeginSyncResponse, DeleteEntityRequest, DeleteEntityResponse,
    EndSyncRequest, EndSyncResponse, ErrorKind, FetchEntityRequest, FetchEntityResponse,
    PushEntityRequest, PushEntityResponse, SyncMessage, SyncOutcome, PROTOCOL_VERSION,
};
