//! Entity model shared by client and server.

use crate::fingerprint::{self, EntityFingerprint};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of an entity within a project.
///
/// Entity IDs are:
/// - Unique within a project across every entity kind
/// - Stable across devices once assigned
/// - Never reused, even after the entity is deleted
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(u32);

impl EntityId {
    /// Creates an entity ID from its numeric value.
    #[inline]
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Returns the numeric value.
    #[inline]
    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }

    /// Returns the following id, or `None` on overflow.
    #[must_use]
    pub fn checked_next(self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for EntityId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// Identifier of a project (a collection of entities owned by one user).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(String);

impl ProjectId {
    /// Creates a project id.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the project name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a user account on the sync server.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Creates a user id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The kind of a content entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    /// A scene or scene group in the project tree.
    Scene,
    /// A saved draft of a scene.
    SceneDraft,
    /// A free-form note.
    Note,
    /// An event on the story timeline.
    TimelineEvent,
    /// An encyclopedia entry.
    EncyclopediaEntry,
}

impl EntityKind {
    /// Every entity kind, in scan order.
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Scene,
        EntityKind::SceneDraft,
        EntityKind::Note,
        EntityKind::TimelineEvent,
        EntityKind::EncyclopediaEntry,
    ];

    /// Returns a stable lowercase name.
    pub fn name(&self) -> &'static str {
        match self {
            EntityKind::Scene => "scene",
            EntityKind::SceneDraft => "scene_draft",
            EntityKind::Note => "note",
            EntityKind::TimelineEvent => "timeline_event",
            EntityKind::EncyclopediaEntry => "encyclopedia_entry",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Whether a scene node holds text or groups other scenes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SceneType {
    /// A leaf scene with text content.
    Scene,
    /// A folder of scenes.
    Group,
}

impl SceneType {
    /// Numeric tag used when fingerprinting.
    pub fn to_code(&self) -> i32 {
        match self {
            SceneType::Scene => 0,
            SceneType::Group => 1,
        }
    }
}

/// A scene node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scene {
    /// Entity id.
    pub id: EntityId,
    /// Position among siblings.
    pub order: i32,
    /// Ids of the ancestor groups, root first.
    pub path: Vec<EntityId>,
    /// Display name.
    pub name: String,
    /// Scene or group.
    pub scene_type: SceneType,
    /// Markdown body; groups have none.
    pub content: Option<String>,
}

/// A saved draft of a scene.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneDraft {
    /// Entity id.
    pub id: EntityId,
    /// The scene this draft belongs to.
    pub scene_id: EntityId,
    /// Creation time, unix millis.
    pub created: i64,
    /// Draft name.
    pub name: String,
    /// Draft body.
    pub content: String,
}

/// A free-form note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// Entity id.
    pub id: EntityId,
    /// Creation time, unix millis.
    pub created: i64,
    /// Note body.
    pub content: String,
}

/// An event on the story timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEvent {
    /// Entity id.
    pub id: EntityId,
    /// Position on the timeline.
    pub order: i32,
    /// Event description.
    pub content: String,
    /// Free-text in-story date.
    pub date: Option<String>,
}

/// An encyclopedia entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncyclopediaEntry {
    /// Entity id.
    pub id: EntityId,
    /// Entry category, e.g. "person" or "place".
    pub entry_type: String,
    /// Entry name.
    pub name: String,
    /// Entry body.
    pub text: String,
    /// Tags; iteration order carries no meaning.
    pub tags: Vec<String>,
    /// File extension of the attached image, if any.
    pub image_ext: Option<String>,
}

/// A unit of user content, tagged by kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Entity {
    /// A scene node.
    Scene(Scene),
    /// A scene draft.
    SceneDraft(SceneDraft),
    /// A note.
    Note(Note),
    /// A timeline event.
    TimelineEvent(TimelineEvent),
    /// An encyclopedia entry.
    EncyclopediaEntry(EncyclopediaEntry),
}

/// Common surface of anything that takes part in sync.
pub trait SyncEntity: Clone + Send + Sync {
    /// The entity id.
    fn id(&self) -> EntityId;

    /// The entity kind.
    fn kind(&self) -> EntityKind;

    /// The content fingerprint.
    fn fingerprint(&self) -> EntityFingerprint;
}

impl SyncEntity for Entity {
    fn id(&self) -> EntityId {
        match self {
            Entity::Scene(scene) => scene.id,
            Entity::SceneDraft(draft) => draft.id,
            Entity::Note(note) => note.id,
            Entity::TimelineEvent(event) => event.id,
            Entity::EncyclopediaEntry(entry) => entry.id,
        }
    }

    fn kind(&self) -> EntityKind {
        match self {
            Entity::Scene(_) => EntityKind::Scene,
            Entity::SceneDraft(_) => EntityKind::SceneDraft,
            Entity::Note(_) => EntityKind::Note,
            Entity::TimelineEvent(_) => EntityKind::TimelineEvent,
            Entity::EncyclopediaEntry(_) => EntityKind::EncyclopediaEntry,
        }
    }

    fn fingerprint(&self) -> EntityFingerprint {
        fingerprint::fingerprint(self)
    }
}

impl Entity {
    /// Returns a copy of this entity under another id.
    ///
    /// Used when a conflict is resolved by keeping both versions: the
    /// client copy moves to a freshly allocated id.
    #[must_use]
    pub fn with_id(&self, id: EntityId) -> Self {
        let mut copy = self.clone();
        match &mut copy {
            Entity::Scene(scene) => scene.id = id,
            Entity::SceneDraft(draft) => draft.id = id,
            Entity::Note(note) => note.id = id,
            Entity::TimelineEvent(event) => event.id = id,
            Entity::EncyclopediaEntry(entry) => entry.id = id,
        }
        copy
    }
}

macro_rules! payload_entity {
    ($ty:ident, $kind:ident, $hash:ident) => {
        impl SyncEntity for $ty {
            fn id(&self) -> EntityId {
                self.id
            }

            fn kind(&self) -> EntityKind {
                EntityKind::$kind
            }

            fn fingerprint(&self) -> EntityFingerprint {
                fingerprint::$hash(self)
            }
        }

        impl From<$ty> for Entity {
            fn from(value: $ty) -> Self {
                Entity::$kind(value)
            }
        }
    };
}

payload_entity!(Scene, Scene, fingerprint_scene);
payload_entity!(SceneDraft, SceneDraft, fingerprint_scene_draft);
payload_entity!(Note, Note, fingerprint_note);
payload_entity!(TimelineEvent, TimelineEvent, fingerprint_timeline_event);
payload_entity!(EncyclopediaEntry, EncyclopediaEntry, fingerprint_encyclopedia_entry);
