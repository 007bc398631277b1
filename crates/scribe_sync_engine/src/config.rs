//! Configuration for the sync engine.

use rand::Rng;
use scribe_sync_protocol::{ProjectId, UserId, PROTOCOL_VERSION};
use std::time::Duration;

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Account the exchange runs under.
    pub user_id: UserId,
    /// Project being synced.
    pub project: ProjectId,
    /// Protocol version.
    pub protocol_version: u16,
    /// Replace a stale session left by another device instead of failing.
    pub replace_existing_session: bool,
    /// Retry configuration for opening an exchange.
    pub retry: RetryConfig,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl SyncConfig {
    /// Creates a new sync configuration.
    pub fn new(user_id: UserId, project: ProjectId) -> Self {
        Self {
            user_id,
            project,
            protocol_version: PROTOCOL_VERSION,
            replace_existing_session: false,
            retry: RetryConfig::default(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Replaces any live session for the user when beginning a sync.
    pub fn with_replace_existing_session(mut self, replace: bool) -> Self {
        self.replace_existing_session = replace;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// How often, and how patiently, opening an exchange is retried.
///
/// Delays double from `base_delay` up to `delay_cap`. A random extra of up
/// to `jitter` times the delay keeps devices of one user from retrying in
/// lockstep.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on any single delay, before jitter.
    pub delay_cap: Duration,
    /// Fraction of the delay added at random; `0.0` disables jitter.
    pub jitter: f64,
}

impl RetryConfig {
    /// Creates a retry configuration allowing `max_attempts` attempts.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::from_millis(250),
            delay_cap: Duration::from_secs(10),
            jitter: 0.25,
        }
    }

    /// A single attempt, no waiting.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            delay_cap: Duration::ZERO,
            jitter: 0.0,
        }
    }

    /// Sets the delay before the first retry.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the upper bound on a single delay.
    pub fn with_delay_cap(mut self, cap: Duration) -> Self {
        self.delay_cap = cap;
        self
    }

    /// Sets the jitter fraction, clamped to `0.0..=1.0`.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay before `attempt`; attempt 0 is the first try and never waits.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let doublings = (attempt - 1).min(16);
        let delay = self
            .base_delay
            .saturating_mul(1 << doublings)
            .min(self.delay_cap);

        if self.jitter > 0.0 {
            let extra = self.jitter * rand::thread_rng().gen_range(0.0..1.0);
            delay.mul_f64(1.0 + extra)
        } else {
            delay
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::new(UserId::new("writer-7"), ProjectId::new("atlas"))
            .with_replace_existing_session(true)
            .with_timeout(Duration::from_secs(60));

        assert_eq!(config.user_id, UserId::new("writer-7"));
        assert_eq!(config.project.as_str(), "atlas");
        assert_eq!(config.protocol_version, PROTOCOL_VERSION);
        assert!(config.replace_existing_session);
        assert_eq!(config.timeout, Duration::from_secs(60));
    }

    #[test]
    fn single_attempt_never_waits() {
        let config = RetryConfig::no_retry();
        assert_eq!(config.max_attempts, 1);
        assert_eq!(config.delay_for_attempt(3), Duration::ZERO);
    }

    #[test]
    fn delays_double_within_jitter() {
        let config = RetryConfig::new(5).with_base_delay(Duration::from_millis(100));

        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);

        let first = config.delay_for_attempt(1);
        assert!(first >= Duration::from_millis(100));
        assert!(first <= Duration::from_millis(125));

        let second = config.delay_for_attempt(2);
        assert!(second >= Duration::from_millis(200));
        assert!(second <= Duration::from_millis(250));
    }

    #[test]
    fn delays_stop_at_cap() {
        let config = RetryConfig::new(30)
            .with_base_delay(Duration::from_secs(1))
            .with_delay_cap(Duration::from_secs(5))
            .with_jitter(0.0);

        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(4));
        assert_eq!(config.delay_for_attempt(4), Duration::from_secs(5));
        assert_eq!(config.delay_for_attempt(29), Duration::from_secs(5));
    }
}
