//! Pool configuration types

use std::time::Duration;

use serde::{Deserialize, Serialize};
use spool_core::{OverflowPolicy, PoolError, Result};

/// Configuration for a single connection pool
///
/// Controls capacity, overflow behaviour, timeouts and connection lifecycle.
/// Capacity and policy can be swapped on a live pool through
/// [`ResourcePool::reconfigure`](super::ResourcePool::reconfigure).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum number of connections (idle + in use) the pool may hold
    max_size: usize,
    /// What to do when every slot is taken
    policy: OverflowPolicy,
    /// Default time in milliseconds `get()` waits under the blocking policy
    acquire_timeout_ms: u64,
    /// Timeout in milliseconds before an idle connection is closed
    idle_timeout_ms: u64,
    /// Maximum lifetime of a connection in milliseconds before it's recycled
    max_lifetime_ms: Option<u64>,
    /// Whether idle connections are health checked before being handed out
    test_on_acquire: bool,
}

impl PoolConfig {
    /// Create a new pool configuration with the given capacity
    ///
    /// A capacity of zero is allowed: every acquisition waits (or fails fast)
    /// until the capacity is raised.
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            policy: OverflowPolicy::Block,
            acquire_timeout_ms: 30_000, // 30 seconds default
            idle_timeout_ms: 600_000,   // 10 minutes default
            max_lifetime_ms: None,
            test_on_acquire: false,
        }
    }

    /// Set the capacity
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Set the overflow policy
    pub fn with_policy(mut self, policy: OverflowPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the acquire timeout in milliseconds
    pub fn with_acquire_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.acquire_timeout_ms = timeout_ms;
        self
    }

    /// Set the idle timeout in milliseconds
    pub fn with_idle_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.idle_timeout_ms = timeout_ms;
        self
    }

    /// Set the maximum connection lifetime in milliseconds
    pub fn with_max_lifetime_ms(mut self, lifetime_ms: u64) -> Self {
        self.max_lifetime_ms = Some(lifetime_ms);
        self
    }

    /// Enable or disable health checks on idle connections before reuse
    pub fn with_test_on_acquire(mut self, test: bool) -> Self {
        self.test_on_acquire = test;
        self
    }

    pub(crate) fn set_max_size(&mut self, max_size: usize) {
        self.max_size = max_size;
    }

    pub(crate) fn set_policy(&mut self, policy: OverflowPolicy) {
        self.policy = policy;
    }

    /// Get the capacity
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Get the overflow policy
    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Get the acquire timeout as a Duration
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    /// Get the idle timeout as a Duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Get the maximum lifetime as a Duration if set
    pub fn max_lifetime(&self) -> Option<Duration> {
        self.max_lifetime_ms.map(Duration::from_millis)
    }

    /// Check whether idle connections are health checked before reuse
    pub fn test_on_acquire(&self) -> bool {
        self.test_on_acquire
    }

    /// Reject timeouts that would make the pool unusable
    pub fn validate(&self) -> Result<()> {
        if self.acquire_timeout_ms == 0 {
            return Err(PoolError::Configuration(
                "acquire_timeout_ms must be greater than 0".into(),
            ));
        }
        if self.idle_timeout_ms == 0 {
            return Err(PoolError::Configuration(
                "idle_timeout_ms must be greater than 0".into(),
            ));
        }
        if self.max_lifetime_ms == Some(0) {
            return Err(PoolError::Configuration(
                "max_lifetime_ms must be greater than 0 when set".into(),
            ));
        }
        Ok(())
    }
}

impl Default for PoolConfig {
    /// Create a default pool configuration
    ///
    /// Defaults:
    /// - max_size: 10
    /// - policy: block
    /// - acquire_timeout: 30 seconds
    /// - idle_timeout: 10 minutes
    /// - max_lifetime: None
    /// - test_on_acquire: false
    fn default() -> Self {
        Self::new(10)
    }
}
