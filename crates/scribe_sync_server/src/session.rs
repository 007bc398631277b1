//! Sync sessions and the clock they are measured against.

use parking_lot::Mutex;
use scribe_sync_protocol::{EntityHashes, ProjectId, UserId};
use std::fmt;
use std::time::{Duration, Instant};

/// Source of the current time for session expiry.
pub trait Clock: Send + Sync + fmt::Debug {
    /// The current instant.
    fn now(&self) -> Instant;
}

/// The real monotonic clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    start: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    /// Creates a clock frozen at the current instant.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.start + *self.offset.lock()
    }
}

/// One in-progress sync exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSession {
    user_id: UserId,
    sync_token: String,
    started_at: Instant,
    last_accessed_at: Instant,
}

impl SyncSession {
    /// Creates a session that was last accessed when it started.
    pub fn new(user_id: UserId, sync_token: String, now: Instant) -> Self {
        Self {
            user_id,
            sync_token,
            started_at: now,
            last_accessed_at: now,
        }
    }

    /// The owning user.
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// The token binding requests to this session.
    pub fn sync_token(&self) -> &str {
        &self.sync_token
    }

    /// When the session was created.
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// When the session was last validated.
    pub fn last_accessed_at(&self) -> Instant {
        self.last_accessed_at
    }

    /// Time since the last validated access.
    pub fn idle_time(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_accessed_at)
    }

    /// Returns true once idle for longer than `ttl`.
    pub fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        self.idle_time(now) > ttl
    }

    /// Resets the idle clock.
    pub fn touch(&mut self, now: Instant) {
        self.last_accessed_at = self.last_accessed_at.max(now);
    }
}

/// Anything the session manager can store.
pub trait ManagedSession: Send {
    /// The bookkeeping part of the session.
    fn session(&self) -> &SyncSession;

    /// Mutable access for refreshing the idle clock.
    fn session_mut(&mut self) -> &mut SyncSession;
}

impl ManagedSession for SyncSession {
    fn session(&self) -> &SyncSession {
        self
    }

    fn session_mut(&mut self) -> &mut SyncSession {
        self
    }
}

/// A session bound to one project and the server snapshot taken at begin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectSyncSession {
    session: SyncSession,
    project: ProjectId,
    snapshot: EntityHashes,
}

impl ProjectSyncSession {
    /// Creates a project session.
    pub fn new(session: SyncSession, project: ProjectId, snapshot: EntityHashes) -> Self {
        Self {
            session,
            project,
            snapshot,
        }
    }

    /// The project being synced.
    pub fn project(&self) -> &ProjectId {
        &self.project
    }

    /// Server fingerprints as of the start of the exchange.
    ///
    /// Only used to report what an exchange changed. Writes are ordered by
    /// the expected fingerprint each push or delete carries, never by this
    /// snapshot.
    pub fn snapshot(&self) -> &EntityHashes {
        &self.snapshot
    }
}

impl ManagedSession for ProjectSyncSession {
    fn session(&self) -> &SyncSession {
        &self.session
    }

    fn session_mut(&mut self) -> &mut SyncSession {
        &mut self.session
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new();
        let before = clock.now();
        clock.advance(Duration::from_secs(5));
        assert_eq!(clock.now() - before, Duration::from_secs(5));
    }

    #[test]
    fn expiry_is_strictly_after_ttl() {
        let clock = ManualClock::new();
        let ttl = Duration::from_secs(120);
        let session = SyncSession::new(UserId::new("u"), "tok".into(), clock.now());

        clock.advance(ttl);
        assert!(!session.is_expired(clock.now(), ttl));

        clock.advance(Duration::from_millis(1));
        assert!(session.is_expired(clock.now(), ttl));
    }

    #[test]
    fn touch_resets_idle_time() {
        let clock = ManualClock::new();
        let mut session = SyncSession::new(UserId::new("u"), "tok".into(), clock.now());

        clock.advance(Duration::from_secs(90));
        session.touch(clock.now());
        assert_eq!(session.idle_time(clock.now()), Duration::ZERO);
        assert!(session.last_accessed_at() > session.started_at());
    }
}
