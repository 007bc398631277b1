//! Server configuration.

use scribe_sync_protocol::PROTOCOL_VERSION;
use std::time::Duration;

/// Configuration for the sync server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Idle time after which a sync session expires.
    pub session_ttl: Duration,
    /// Length of generated sync tokens.
    pub token_length: usize,
    /// Maximum number of live entities per project.
    pub max_entities_per_project: usize,
    /// How often the background reaper sweeps expired sessions.
    pub reaper_interval: Duration,
    /// Protocol version clients must speak.
    pub protocol_version: u16,
}

impl ServerConfig {
    /// Creates a configuration with the default limits.
    pub fn new() -> Self {
        Self {
            session_ttl: Duration::from_secs(120),
            token_length: 30,
            max_entities_per_project: 100_000,
            reaper_interval: Duration::from_secs(30),
            protocol_version: PROTOCOL_VERSION,
        }
    }

    /// Sets the session TTL.
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    /// Sets the token length.
    pub fn with_token_length(mut self, length: usize) -> Self {
        self.token_length = length;
        self
    }

    /// Sets the per-project entity limit.
    pub fn with_max_entities_per_project(mut self, max: usize) -> Self {
        self.max_entities_per_project = max;
        self
    }

    /// Sets the reaper interval.
    pub fn with_reaper_interval(mut self, interval: Duration) -> Self {
        self.reaper_interval = interval;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}
