//! Entity hash records exchanged between client and server.

use crate::entity::{EntityId, EntityKind, SyncEntity};
use crate::fingerprint::EntityFingerprint;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Mapping of every known entity to the last fingerprint observed for it.
pub type EntityHashes = BTreeMap<EntityId, EntityFingerprint>;

/// The last fingerprint a party observed for one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityHashRecord {
    /// Entity id.
    pub id: EntityId,
    /// Entity kind, so the receiver knows where the entity lives.
    pub kind: EntityKind,
    /// Content fingerprint.
    pub fingerprint: EntityFingerprint,
}

impl EntityHashRecord {
    /// Creates a record.
    pub fn new(id: EntityId, kind: EntityKind, fingerprint: EntityFingerprint) -> Self {
        Self {
            id,
            kind,
            fingerprint,
        }
    }

    /// Fingerprints an entity and records the result.
    pub fn of<E: SyncEntity>(entity: &E) -> Self {
        Self::new(entity.id(), entity.kind(), entity.fingerprint())
    }

    /// Collapses records into an id-keyed hash map.
    ///
    /// Duplicate ids keep the last record.
    pub fn to_hashes<'a>(records: impl IntoIterator<Item = &'a EntityHashRecord>) -> EntityHashes {
        records
            .into_iter()
            .map(|record| (record.id, record.fingerprint.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Note;

    #[test]
    fn record_of_entity() {
        let note = Note {
            id: EntityId::new(5),
            created: 10,
            content: "tide tables".into(),
        };
        let record = EntityHashRecord::of(&note);
        assert_eq!(record.id, EntityId::new(5));
        assert_eq!(record.kind, EntityKind::Note);
        assert_eq!(record.fingerprint, note.fingerprint());
    }

    #[test]
    fn records_collapse_to_map() {
        let records = vec![
            EntityHashRecord::new(EntityId::new(2), EntityKind::Note, EntityFingerprint::new("B")),
            EntityHashRecord::new(EntityId::new(1), EntityKind::Scene, EntityFingerprint::new("A")),
        ];
        let hashes = EntityHashRecord::to_hashes(&records);
        assert_eq!(hashes.len(), 2);
        assert_eq!(hashes.keys().next(), Some(&EntityId::new(1)));
        assert_eq!(hashes[&EntityId::new(2)], EntityFingerprint::new("B"));
    }
}
