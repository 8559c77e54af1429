//! Destination-keyed pool registry

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use spool_core::{ConnectionFactory, Destination, Result};
use tokio::time::Instant;

use super::report::StatsReport;
use super::settings::PoolSettings;
use crate::pool::{PoolStats, PooledConnection, ResourcePool};

/// Owns one [`ResourcePool`] per destination
///
/// Pools are created lazily on first use and live as long as the registry.
/// Every pool shares the registry's factory and starts from the current
/// [`PoolSettings`].
pub struct PoolRegistry<F: ConnectionFactory> {
    factory: Arc<F>,
    settings: RwLock<PoolSettings>,
    pools: RwLock<HashMap<Destination, ResourcePool<F>>>,
}

impl<F: ConnectionFactory> PoolRegistry<F> {
    /// Create an empty registry
    pub fn new(factory: impl Into<Arc<F>>, settings: PoolSettings) -> Self {
        Self {
            factory: factory.into(),
            settings: RwLock::new(settings),
            pools: RwLock::new(HashMap::new()),
        }
    }

    /// Get the pool for a destination, creating it if needed
    ///
    /// Concurrent first calls for the same destination all get the same
    /// pool.
    pub fn get_pool(&self, destination: &Destination) -> ResourcePool<F> {
        if let Some(pool) = self.pools.read().get(destination) {
            return pool.clone();
        }

        let mut pools = self.pools.write();
        pools
            .entry(destination.clone())
            .or_insert_with(|| {
                let config = self.settings.read().config_for(destination);
                tracing::info!(
                    destination = %destination,
                    capacity = config.max_size(),
                    policy = ?config.policy(),
                    "creating connection pool"
                );
                ResourcePool::new(destination.clone(), config, Arc::clone(&self.factory))
            })
            .clone()
    }

    /// Acquire a connection to a destination, waiting until `deadline`
    pub async fn acquire(
        &self,
        destination: &Destination,
        deadline: Instant,
    ) -> Result<PooledConnection<F::Connection>> {
        self.get_pool(destination).acquire(deadline).await
    }

    /// Acquire a connection using the pool's default acquire timeout
    pub async fn get(&self, destination: &Destination) -> Result<PooledConnection<F::Connection>> {
        self.get_pool(destination).get().await
    }

    /// Push a new default capacity to every pool
    ///
    /// Destinations whose capacity is pinned by an override keep it. Pools
    /// created later use the new value too.
    #[tracing::instrument(skip(self))]
    pub fn apply_global_capacity(&self, capacity: usize) {
        let settings = {
            let mut settings = self.settings.write();
            settings.connection_pool_size = capacity;
            settings.clone()
        };

        let mut resized = 0;
        for pool in self.pools() {
            if settings.has_capacity_override(pool.destination()) {
                continue;
            }
            pool.set_capacity(capacity);
            resized += 1;
        }
        tracing::info!(resized, "applied global pool capacity");
    }

    /// Replace the settings, reconfiguring every existing pool
    ///
    /// Returns false when the snapshot equals the current one.
    pub fn apply_settings(&self, settings: &PoolSettings) -> bool {
        {
            let mut current = self.settings.write();
            if *current == *settings {
                return false;
            }
            *current = settings.clone();
        }

        let pools = self.pools();
        for pool in &pools {
            pool.reconfigure(settings.config_for(pool.destination()));
        }
        tracing::info!(
            pools = pools.len(),
            capacity = settings.connection_pool_size,
            policy = ?settings.policy,
            "applied pool settings"
        );
        true
    }

    /// Get a copy of the current settings
    pub fn settings(&self) -> PoolSettings {
        self.settings.read().clone()
    }

    fn pools(&self) -> Vec<ResourcePool<F>> {
        self.pools.read().values().cloned().collect()
    }

    /// Iterate over a snapshot of every pool's statistics
    ///
    /// The set of pools is fixed when the iterator is created; each pool's
    /// statistics are read lazily as the iterator advances.
    pub fn stats_iter(&self) -> impl Iterator<Item = (Destination, PoolStats)> + use<F> {
        self.pools()
            .into_iter()
            .map(|pool| (pool.destination().clone(), pool.stats()))
    }

    /// Visit every pool's statistics
    pub fn for_each_stats(&self, mut visit: impl FnMut(&Destination, PoolStats)) {
        for (destination, stats) in self.stats_iter() {
            visit(&destination, stats);
        }
    }

    /// Sum of every pool's statistics
    pub fn aggregate_stats(&self) -> PoolStats {
        let mut total = PoolStats::default();
        self.for_each_stats(|_, stats| total.merge(&stats));
        total
    }

    /// Build a statistics report, listing at most the configured number of
    /// destinations individually
    pub fn report(&self) -> StatsReport {
        let limit = self.settings.read().max_reported_destinations;
        StatsReport::collect(self.stats_iter(), limit)
    }

    /// Drain every pool concurrently
    #[tracing::instrument(skip(self))]
    pub async fn drain_all(&self) {
        let pools = self.pools();
        tracing::info!(pools = pools.len(), "draining all connection pools");
        futures::future::join_all(pools.iter().map(|pool| pool.drain())).await;
    }

    pub fn destinations(&self) -> Vec<Destination> {
        self.pools.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.pools.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.read().is_empty()
    }
}
