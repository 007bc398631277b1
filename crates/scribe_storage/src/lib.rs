//! # Scribe Storage
//!
//! Storage collaborator traits consumed by the Scribe sync engine.
//!
//! The sync core owns no persisted state of its own. Entities live behind
//! [`EntityStorage`]; the last known server tombstones live behind
//! [`DeletedIdSource`]. Both are async because real backends suspend on
//! the filesystem or a database.
//!
//! ## Available Backends
//!
//! - [`InMemoryStorage`] - For testing and ephemeral projects
//!
//! ## Example
//!
//! ```rust
//! use scribe_storage::{EntityStorage, InMemoryStorage};
//! use scribe_sync_protocol::{Entity, EntityId, EntityKind, Note, ProjectId};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let storage = InMemoryStorage::new();
//! let project = ProjectId::new("novel");
//! let note = Note { id: EntityId::new(1), created: 0, content: "hi".into() };
//! storage.write_entity(&project, &Entity::Note(note)).await.unwrap();
//!
//! let ids = storage.list_entity_ids(&project, EntityKind::Note).await.unwrap();
//! assert_eq!(ids, vec![EntityId::new(1)]);
//! # });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod memory;

pub use backend::{DeleteOrigin, DeletedIdSource, EntityStorage};
pub use error::{StorageError, StorageResult};
pub use memory::InMemoryStorage;
