//! Registry-wide pool settings

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use spool_core::{Destination, OverflowPolicy, PoolError, Result};

use crate::pool::PoolConfig;

/// Per-destination exceptions to the global settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DestinationOverride {
    /// Capacity pinned for this destination; global capacity changes skip it
    pub max_size: Option<usize>,
    pub policy: Option<OverflowPolicy>,
}

/// One immutable configuration snapshot for every pool in a registry
///
/// New pools are built from it with [`config_for`](Self::config_for);
/// existing pools follow capacity and policy changes when a new snapshot
/// is applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Default capacity of every pool
    pub connection_pool_size: usize,
    pub policy: OverflowPolicy,
    pub acquire_timeout_ms: u64,
    pub idle_timeout_ms: u64,
    pub max_lifetime_ms: Option<u64>,
    pub test_on_acquire: bool,
    pub overrides: HashMap<Destination, DestinationOverride>,
    /// Destinations listed individually in a stats report
    pub max_reported_destinations: usize,
}

impl PoolSettings {
    pub fn new(connection_pool_size: usize) -> Self {
        Self {
            connection_pool_size,
            ..Self::default()
        }
    }

    pub fn with_policy(mut self, policy: OverflowPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_override(mut self, destination: Destination, rule: DestinationOverride) -> Self {
        self.overrides.insert(destination, rule);
        self
    }

    /// Check whether a destination's capacity is pinned by an override
    pub fn has_capacity_override(&self, destination: &Destination) -> bool {
        self.overrides
            .get(destination)
            .is_some_and(|rule| rule.max_size.is_some())
    }

    /// Build the pool configuration for a destination
    pub fn config_for(&self, destination: &Destination) -> PoolConfig {
        let rule = self.overrides.get(destination);
        let max_size = rule
            .and_then(|rule| rule.max_size)
            .unwrap_or(self.connection_pool_size);
        let policy = rule.and_then(|rule| rule.policy).unwrap_or(self.policy);

        let config = PoolConfig::new(max_size)
            .with_policy(policy)
            .with_acquire_timeout_ms(self.acquire_timeout_ms)
            .with_idle_timeout_ms(self.idle_timeout_ms)
            .with_test_on_acquire(self.test_on_acquire);
        match self.max_lifetime_ms {
            Some(lifetime_ms) => config.with_max_lifetime_ms(lifetime_ms),
            None => config,
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.config_for(&Destination::new("")).validate()?;
        if self.max_reported_destinations == 0 {
            return Err(PoolError::Configuration(
                "max_reported_destinations must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

impl Default for PoolSettings {
    /// Defaults match [`PoolConfig::default`], reporting up to 20
    /// destinations individually
    fn default() -> Self {
        let config = PoolConfig::default();
        Self {
            connection_pool_size: config.max_size(),
            policy: config.policy(),
            acquire_timeout_ms: config.acquire_timeout().as_millis() as u64,
            idle_timeout_ms: config.idle_timeout().as_millis() as u64,
            max_lifetime_ms: None,
            test_on_acquire: false,
            overrides: HashMap::new(),
            max_reported_destinations: 20,
        }
    }
}
