//! Per-user sync session bookkeeping.
//!
//! A user holds at most one live session. Sessions are evicted lazily when
//! a request finds them expired, or in bulk by [`SyncSessionManager::purge_expired`].

use crate::error::{ServerError, ServerResult};
use crate::session::{Clock, ManagedSession, SyncSession, SystemClock};
use rand::Rng;
use scribe_sync_protocol::UserId;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Characters sync tokens are drawn from.
pub const TOKEN_ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// Tracks the live sync session of every user.
#[derive(Debug)]
pub struct SyncSessionManager<S = SyncSession> {
    sessions: Mutex<HashMap<UserId, S>>,
    ttl: Duration,
    token_length: usize,
    clock: Arc<dyn Clock>,
}

impl<S: ManagedSession> SyncSessionManager<S> {
    /// Creates a manager measuring time with the system clock.
    pub fn new(ttl: Duration, token_length: usize) -> Self {
        Self::with_clock(ttl, token_length, Arc::new(SystemClock))
    }

    /// Creates a manager with an explicit clock.
    pub fn with_clock(ttl: Duration, token_length: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            ttl,
            token_length,
            clock,
        }
    }

    /// Session idle TTL.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Starts a session for `user`, replacing any session it already has.
    ///
    /// `factory` receives the bookkeeping part and builds the stored session.
    /// Returns the new token.
    pub async fn create_new_session<F>(&self, user: &UserId, factory: F) -> String
    where
        F: FnOnce(SyncSession) -> S,
    {
        let token = self.generate_token();
        let session = SyncSession::new(user.clone(), token.clone(), self.clock.now());

        let mut sessions = self.sessions.lock().await;
        if sessions.insert(user.clone(), factory(session)).is_some() {
            info!(user = %user, "replaced existing sync session");
        } else {
            debug!(user = %user, "created sync session");
        }
        token
    }

    /// Starts a session only if `user` has no live one.
    ///
    /// An expired session does not block: it is evicted first.
    pub async fn try_create_new_session<F>(&self, user: &UserId, factory: F) -> Option<String>
    where
        F: FnOnce(SyncSession) -> S,
    {
        let token = self.generate_token();
        let now = self.clock.now();

        let mut sessions = self.sessions.lock().await;
        if let Some(existing) = sessions.get(user) {
            if !existing.session().is_expired(now, self.ttl) {
                return None;
            }
            debug!(user = %user, "evicting expired sync session");
        }
        let session = SyncSession::new(user.clone(), token.clone(), now);
        sessions.insert(user.clone(), factory(session));
        debug!(user = %user, "created sync session");
        Some(token)
    }

    /// Returns true if `user` has a session that has not expired.
    ///
    /// An expired session is evicted.
    pub async fn has_active_sync_session(&self, user: &UserId) -> bool {
        let mut sessions = self.sessions.lock().await;
        self.evict_if_expired(&mut sessions, user);
        sessions.contains_key(user)
    }

    /// Ends the session of `user`, whatever its token.
    pub async fn terminate_session(&self, user: &UserId) -> bool {
        self.sessions.lock().await.remove(user).is_some()
    }

    /// Ends the session of `user` if `token` is its current, live token.
    ///
    /// Returns the removed session.
    pub async fn terminate_session_with_token(
        &self,
        user: &UserId,
        token: &str,
    ) -> ServerResult<S> {
        let mut sessions = self.sessions.lock().await;
        self.check(&mut sessions, user, token)?;
        sessions
            .remove(user)
            .ok_or_else(|| ServerError::SessionInvalid(format!("no sync session for {user}")))
    }

    /// Validates `token` for `user` and refreshes the idle clock.
    pub async fn validate_sync_id(&self, user: &UserId, token: &str) -> ServerResult<()> {
        self.with_validated_session(user, token, |_| ()).await
    }

    /// Validates `token`, refreshes the idle clock and runs `f` on the session.
    pub async fn with_validated_session<R, F>(
        &self,
        user: &UserId,
        token: &str,
        f: F,
    ) -> ServerResult<R>
    where
        F: FnOnce(&S) -> R,
    {
        let now = self.clock.now();
        let mut sessions = self.sessions.lock().await;
        self.check(&mut sessions, user, token)?;
        match sessions.get_mut(user) {
            Some(session) => {
                session.session_mut().touch(now);
                Ok(f(session))
            }
            None => Err(ServerError::SessionInvalid(format!(
                "no sync session for {user}"
            ))),
        }
    }

    /// Removes every expired session. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|_, s| !s.session().is_expired(now, self.ttl));
        let purged = before - sessions.len();
        if purged > 0 {
            info!(purged, "purged expired sync sessions");
        }
        purged
    }

    /// Number of stored sessions, expired or not.
    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Generates a random token over [`TOKEN_ALPHABET`].
    pub fn generate_token(&self) -> String {
        let mut rng = rand::thread_rng();
        (0..self.token_length)
            .map(|_| char::from(TOKEN_ALPHABET[rng.gen_range(0..TOKEN_ALPHABET.len())]))
            .collect()
    }

    fn evict_if_expired(&self, sessions: &mut HashMap<UserId, S>, user: &UserId) {
        let now = self.clock.now();
        if sessions
            .get(user)
            .is_some_and(|s| s.session().is_expired(now, self.ttl))
        {
            sessions.remove(user);
            debug!(user = %user, "sync session expired");
        }
    }

    fn check(
        &self,
        sessions: &mut HashMap<UserId, S>,
        user: &UserId,
        token: &str,
    ) -> ServerResult<()> {
        let now = self.clock.now();
        let Some(existing) = sessions.get(user) else {
            return Err(ServerError::SessionInvalid(format!(
                "no sync session for {user}"
            )));
        };
        if existing.session().is_expired(now, self.ttl) {
            sessions.remove(user);
            debug!(user = %user, "sync session expired");
            return Err(ServerError::SessionInvalid("sync session expired".into()));
        }
        if existing.session().sync_token() != token {
            return Err(ServerError::SessionInvalid("sync token mismatch".into()));
        }
        Ok(())
    }
}

impl<S: ManagedSession + Clone> SyncSessionManager<S> {
    /// Returns a copy of the live session of `user`, if any.
    ///
    /// An expired session is evicted.
    pub async fn get_active_sync_session(&self, user: &UserId) -> Option<S> {
        let mut sessions = self.sessions.lock().await;
        self.evict_if_expired(&mut sessions, user);
        sessions.get(user).cloned()
    }
}
