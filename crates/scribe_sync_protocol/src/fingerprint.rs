//! Deterministic content fingerprints.
//!
//! A fingerprint is a MurmurHash3 x64-128 digest (seed 0) of an entity's
//! participating fields, fed in a fixed order as one byte stream:
//!
//! - integers as little-endian bytes (4 bytes for `i32`/`u32`, 8 for `i64`)
//! - strings as their UTF-8 bytes, no length prefix
//! - unordered collections sorted before hashing
//! - absent optional fields skipped entirely
//!
//! The 16-byte digest (`h1` then `h2`, each little-endian) is encoded as
//! URL-safe base64 without padding. Client and server must agree on every
//! byte fed here, so the field order below is part of the wire contract.

use crate::entity::{EncyclopediaEntry, Entity, Note, Scene, SceneDraft, TimelineEvent};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Cursor;

/// Length of an encoded fingerprint in characters.
pub const FINGERPRINT_LEN: usize = 22;

/// Opaque content digest used only for equality comparison.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityFingerprint(String);

impl EntityFingerprint {
    /// Wraps an already-encoded fingerprint, e.g. one received from a peer.
    pub fn new(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    /// Encodes a raw 128-bit digest.
    pub fn from_digest(digest: [u8; 16]) -> Self {
        Self(URL_SAFE_NO_PAD.encode(digest))
    }

    /// Returns the encoded form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for EntityFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityFingerprint({})", self.0)
    }
}

impl fmt::Display for EntityFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Incremental MurmurHash3 x64-128 hasher.
///
/// Feeding bytes in several calls yields the same digest as hashing their
/// concatenation in one go.
#[derive(Debug, Clone, Default)]
pub struct FingerprintHasher {
    bytes: Vec<u8>,
}

impl FingerprintHasher {
    /// Creates a hasher with seed 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds raw bytes.
    pub fn write(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }

    /// Feeds a `u32` as 4 little-endian bytes.
    pub fn write_u32(&mut self, value: u32) {
        self.write(&value.to_le_bytes());
    }

    /// Feeds an `i32` as 4 little-endian bytes.
    pub fn write_i32(&mut self, value: i32) {
        self.write(&value.to_le_bytes());
    }

    /// Feeds an `i64` as 8 little-endian bytes.
    pub fn write_i64(&mut self, value: i64) {
        self.write(&value.to_le_bytes());
    }

    /// Feeds a string as UTF-8 bytes.
    pub fn write_str(&mut self, value: &str) {
        self.write(value.as_bytes());
    }

    /// Feeds a string if present; absent values contribute nothing.
    pub fn write_opt_str(&mut self, value: Option<&str>) {
        if let Some(value) = value {
            self.write_str(value);
        }
    }

    /// Feeds a collection of strings in sorted order.
    pub fn write_unordered_strs<S: AsRef<str>>(&mut self, values: &[S]) {
        let mut sorted: Vec<&str> = values.iter().map(AsRef::as_ref).collect();
        sorted.sort_unstable();
        for value in sorted {
            self.write_str(value);
        }
    }

    /// Finalizes and returns the raw 16-byte digest.
    pub fn finish(self) -> [u8; 16] {
        // Reading from an in-memory cursor cannot fail.
        let digest =
            murmur3::murmur3_x64_128(&mut Cursor::new(&self.bytes), 0).unwrap_or_default();
        // `h1` sits in the low half, so little-endian bytes give `h1` then `h2`.
        digest.to_le_bytes()
    }

    /// Finalizes into an encoded fingerprint.
    pub fn finish_fingerprint(self) -> EntityFingerprint {
        EntityFingerprint::from_digest(self.finish())
    }
}

/// Computes the fingerprint of any entity.
pub fn fingerprint(entity: &Entity) -> EntityFingerprint {
    match entity {
        Entity::Scene(scene) => fingerprint_scene(scene),
        Entity::SceneDraft(draft) => fingerprint_scene_draft(draft),
        Entity::Note(note) => fingerprint_note(note),
        Entity::TimelineEvent(event) => fingerprint_timeline_event(event),
        Entity::EncyclopediaEntry(entry) => fingerprint_encyclopedia_entry(entry),
    }
}

pub(crate) fn fingerprint_scene(scene: &Scene) -> EntityFingerprint {
    let mut hasher = FingerprintHasher::new();
    hasher.write_u32(scene.id.value());
    hasher.write_i32(scene.order);
    for segment in &scene.path {
        hasher.write_u32(segment.value());
    }
    hasher.write_str(&scene.name);
    hasher.write_i32(scene.scene_type.to_code());
    hasher.write_opt_str(scene.content.as_deref());
    hasher.finish_fingerprint()
}

pub(crate) fn fingerprint_scene_draft(draft: &SceneDraft) -> EntityFingerprint {
    let mut hasher = FingerprintHasher::new();
    hasher.write_u32(draft.id.value());
    hasher.write_u32(draft.scene_id.value());
    hasher.write_i64(draft.created);
    hasher.write_str(&draft.name);
    hasher.write_str(&draft.content);
    hasher.finish_fingerprint()
}

pub(crate) fn fingerprint_note(note: &Note) -> EntityFingerprint {
    let mut hasher = FingerprintHasher::new();
    hasher.write_u32(note.id.value());
    hasher.write_i64(note.created);
    hasher.write_str(&note.content);
    hasher.finish_fingerprint()
}

pub(crate) fn fingerprint_timeline_event(event: &TimelineEvent) -> EntityFingerprint {
    let mut hasher = FingerprintHasher::new();
    hasher.write_u32(event.id.value());
    hasher.write_i32(event.order);
    hasher.write_str(&event.content);
    hasher.write_opt_str(event.date.as_deref());
    hasher.finish_fingerprint()
}

pub(crate) fn fingerprint_encyclopedia_entry(entry: &EncyclopediaEntry) -> EntityFingerprint {
    let mut hasher = FingerprintHasher::new();
    hasher.write_u32(entry.id.value());
    hasher.write_str(&entry.entry_type);
    hasher.write_str(&entry.name);
    hasher.write_str(&entry.text);
    hasher.write_unordered_strs(&entry.tags);
    hasher.write_opt_str(entry.image_ext.as_deref());
    hasher.finish_fingerprint()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EntityId, SceneType};
    use proptest::prelude::*;

    fn digest_hex(bytes: &[u8]) -> String {
        let mut hasher = FingerprintHasher::new();
        hasher.write(bytes);
        hasher
            .finish()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }

    fn sample_entry(tags: Vec<&str>) -> EncyclopediaEntry {
        EncyclopediaEntry {
            id: EntityId::new(40),
            entry_type: "person".into(),
            name: "Mara Quill".into(),
            text: "Keeper of the northern light.".into(),
            tags: tags.into_iter().map(String::from).collect(),
            image_ext: None,
        }
    }

    fn sample_scene() -> Scene {
        Scene {
            id: EntityId::new(3),
            order: 2,
            path: vec![EntityId::new(0), EntityId::new(1)],
            name: "Arrival".into(),
            scene_type: SceneType::Scene,
            content: Some("The ferry docked at dawn.".into()),
        }
    }

    #[test]
    fn murmur3_reference_vectors() {
        assert_eq!(digest_hex(b""), "00000000000000000000000000000000");
        assert_eq!(digest_hex(b"hello"), "029bbd41b3a7d8cb191dae486a901e5b");
        assert_eq!(
            digest_hex(b"The quick brown fox jumps over the lazy dog"),
            "6c1b07bc7bbc4be347939ac4a93c437a"
        );
    }

    #[test]
    fn encoded_form_is_url_safe_without_padding() {
        let mut hasher = FingerprintHasher::new();
        hasher.write_str("hello");
        let fp = hasher.finish_fingerprint();
        assert_eq!(fp.as_str(), "Apu9QbOn2MsZHa5IapAeWw");
        assert_eq!(fp.as_str().len(), FINGERPRINT_LEN);
    }

    #[test]
    fn note_fingerprint_is_pinned() {
        let note = Note {
            id: EntityId::new(12),
            created: 1_700_000_000_000,
            content: "remember the lighthouse".into(),
        };
        assert_eq!(fingerprint_note(&note).as_str(), "CumRMnu1sqMh5HUxee65Lg");
    }

    #[test]
    fn split_writes_match_single_write() {
        let data = b"a stream long enough to span several sixteen byte blocks";
        let mut whole = FingerprintHasher::new();
        whole.write(data);

        let mut split = FingerprintHasher::new();
        for chunk in data.chunks(5) {
            split.write(chunk);
        }
        assert_eq!(whole.finish(), split.finish());
    }

    #[test]
    fn tag_order_does_not_matter() {
        let a = sample_entry(vec!["harbor", "family", "act-one"]);
        let b = sample_entry(vec!["act-one", "harbor", "family"]);
        assert_eq!(
            fingerprint_encyclopedia_entry(&a),
            fingerprint_encyclopedia_entry(&b)
        );
    }

    #[test]
    fn absent_optional_is_skipped() {
        // A group with no content hashes exactly like the same fields with nothing appended.
        let mut group = sample_scene();
        group.scene_type = SceneType::Group;
        group.content = None;

        let mut hasher = FingerprintHasher::new();
        hasher.write_u32(3);
        hasher.write_i32(2);
        hasher.write_u32(0);
        hasher.write_u32(1);
        hasher.write_str("Arrival");
        hasher.write_i32(1);
        assert_eq!(fingerprint_scene(&group), hasher.finish_fingerprint());
    }

    #[test]
    fn every_scene_field_participates() {
        let base = sample_scene();
        let original = fingerprint_scene(&base);

        let mut changed = base.clone();
        changed.order = 3;
        assert_ne!(fingerprint_scene(&changed), original);

        let mut changed = base.clone();
        changed.path.push(EntityId::new(2));
        assert_ne!(fingerprint_scene(&changed), original);

        let mut changed = base.clone();
        changed.name = "Departure".into();
        assert_ne!(fingerprint_scene(&changed), original);

        let mut changed = base.clone();
        changed.scene_type = SceneType::Group;
        assert_ne!(fingerprint_scene(&changed), original);

        let mut changed = base.clone();
        changed.content = Some("The ferry docked at dusk.".into());
        assert_ne!(fingerprint_scene(&changed), original);

        let mut changed = base;
        changed.id = EntityId::new(4);
        assert_ne!(fingerprint_scene(&changed), original);
    }

    #[test]
    fn dispatch_matches_per_kind_function() {
        let scene = sample_scene();
        assert_eq!(fingerprint(&Entity::Scene(scene.clone())), fingerprint_scene(&scene));
    }

    proptest! {
        #[test]
        fn fingerprint_is_deterministic(id in any::<u32>(), created in any::<i64>(), content in ".*") {
            let note = Note { id: EntityId::new(id), created, content };
            prop_assert_eq!(fingerprint_note(&note), fingerprint_note(&note.clone()));
            prop_assert_eq!(fingerprint_note(&note).as_str().len(), FINGERPRINT_LEN);
        }

        #[test]
        fn tag_permutations_agree(tags in proptest::collection::vec("[a-z]{1,8}", 0..6)) {
            let entry = sample_entry(tags.iter().map(String::as_str).collect());
            let reversed = sample_entry(tags.iter().rev().map(String::as_str).collect());
            prop_assert_eq!(
                fingerprint_encyclopedia_entry(&entry),
                fingerprint_encyclopedia_entry(&reversed)
            );
        }

        #[test]
        fn content_change_changes_fingerprint(content in "[a-z ]{0,40}", extra in "[a-z]{1,4}") {
            let a = Note { id: EntityId::new(1), created: 0, content: content.clone() };
            let b = Note { id: EntityId::new(1), created: 0, content: format!("{}{}", content, extra) };
            prop_assert_ne!(fingerprint_note(&a), fingerprint_note(&b));
        }
    }
}
