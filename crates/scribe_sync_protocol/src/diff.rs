//! Classification of local and remote hash maps into a sync plan.
//!
//! [`diff`] is a pure function: it performs no I/O and only looks at the
//! four sets it is given. Every id in the union of the two hash maps ends
//! up in exactly one category of the resulting [`SyncPlan`].

use crate::entity::EntityId;
use crate::fingerprint::EntityFingerprint;
use crate::hashes::EntityHashes;
use std::collections::{BTreeSet, HashMap};

/// What has to happen to one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncAction {
    /// Both sides agree.
    Unchanged,
    /// Only the client has it; send it to the server.
    PushCreate,
    /// Only the server has it; fetch it.
    PullCreate,
    /// The sides disagree; user input is required.
    Conflict,
}

/// How the two sides diverged for a conflicting entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictKind {
    /// Both sides hold the entity with different content.
    Modified {
        /// Client fingerprint.
        local: EntityFingerprint,
        /// Server fingerprint.
        remote: EntityFingerprint,
    },
    /// The client deleted an entity the server still has.
    DeletedLocally {
        /// Server fingerprint.
        remote: EntityFingerprint,
    },
    /// The server deleted an entity the client still has.
    DeletedRemotely {
        /// Client fingerprint.
        local: EntityFingerprint,
    },
}

/// A conflict found by [`diff`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedConflict {
    /// Entity id.
    pub id: EntityId,
    /// Nature of the divergence.
    pub kind: ConflictKind,
}

impl PlannedConflict {
    /// The fingerprint the server currently holds, if any.
    pub fn remote_fingerprint(&self) -> Option<&EntityFingerprint> {
        match &self.kind {
            ConflictKind::Modified { remote, .. } | ConflictKind::DeletedLocally { remote } => {
                Some(remote)
            }
            ConflictKind::DeletedRemotely { .. } => None,
        }
    }
}

/// The categorized output of [`diff`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    /// Ids identical on both sides.
    pub unchanged: Vec<EntityId>,
    /// Ids to push to the server.
    pub push_create: Vec<EntityId>,
    /// Ids to pull from the server.
    pub pull_create: Vec<EntityId>,
    /// Ids requiring user mediation.
    pub conflicts: Vec<PlannedConflict>,
    index: HashMap<EntityId, SyncAction>,
}

impl SyncPlan {
    fn record(&mut self, id: EntityId, action: SyncAction) {
        match action {
            SyncAction::Unchanged => self.unchanged.push(id),
            SyncAction::PushCreate => self.push_create.push(id),
            SyncAction::PullCreate => self.pull_create.push(id),
            SyncAction::Conflict => {}
        }
        self.index.insert(id, action);
    }

    fn record_conflict(&mut self, id: EntityId, kind: ConflictKind) {
        self.conflicts.push(PlannedConflict { id, kind });
        self.index.insert(id, SyncAction::Conflict);
    }

    /// Returns the category an id was placed in.
    pub fn classification(&self, id: EntityId) -> Option<SyncAction> {
        self.index.get(&id).copied()
    }

    /// Returns the planned conflict for an id.
    pub fn conflict(&self, id: EntityId) -> Option<&PlannedConflict> {
        self.conflicts.iter().find(|c| c.id == id)
    }

    /// Total number of classified ids.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Returns true if nothing was classified.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Returns true if there is anything to push, pull or resolve.
    pub fn has_work(&self) -> bool {
        !(self.push_create.is_empty() && self.pull_create.is_empty() && self.conflicts.is_empty())
    }
}

/// Diffs the client's hash map against the server's.
///
/// - present on both sides with equal fingerprints: `Unchanged`
/// - present on both sides with different fingerprints: `Conflict`
/// - only local, not deleted remotely: `PushCreate`
/// - only remote, not deleted locally: `PullCreate`
/// - present on one side, deleted on the other: `Conflict`
pub fn diff(
    local: &EntityHashes,
    remote: &EntityHashes,
    locally_deleted: &BTreeSet<EntityId>,
    remotely_deleted: &BTreeSet<EntityId>,
) -> SyncPlan {
    let mut plan = SyncPlan::default();

    let ids: BTreeSet<EntityId> = local.keys().chain(remote.keys()).copied().collect();

    for id in ids {
        match (local.get(&id), remote.get(&id)) {
            (Some(l), Some(r)) if l == r => plan.record(id, SyncAction::Unchanged),
            (Some(l), Some(r)) => plan.record_conflict(
                id,
                ConflictKind::Modified {
                    local: l.clone(),
                    remote: r.clone(),
                },
            ),
            (Some(l), None) => {
                if remotely_deleted.contains(&id) {
                    plan.record_conflict(id, ConflictKind::DeletedRemotely { local: l.clone() });
                } else {
                    plan.record(id, SyncAction::PushCreate);
                }
            }
            (None, Some(r)) => {
                if locally_deleted.contains(&id) {
                    plan.record_conflict(id, ConflictKind::DeletedLocally { remote: r.clone() });
                } else {
                    plan.record(id, SyncAction::PullCreate);
                }
            }
            (None, None) => {}
        }
    }

    plan
}
