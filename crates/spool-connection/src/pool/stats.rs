//! Pool statistics types

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Upper bounds in milliseconds of the wait-time buckets; one more bucket
/// catches everything slower
pub const WAIT_BUCKETS_MS: [u64; 8] = [1, 5, 10, 50, 100, 500, 1000, 5000];

const BUCKET_COUNT: usize = WAIT_BUCKETS_MS.len() + 1;

/// Fixed-bucket histogram of time spent obtaining a connection
#[derive(Debug, Default)]
pub struct WaitHistogram {
    buckets: [AtomicU64; BUCKET_COUNT],
}

impl WaitHistogram {
    pub fn record(&self, waited: Duration) {
        let ms = waited.as_millis();
        let index = WAIT_BUCKETS_MS
            .iter()
            .position(|&bound| ms <= u128::from(bound))
            .unwrap_or(WAIT_BUCKETS_MS.len());
        self.buckets[index].fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> WaitHistogramSnapshot {
        WaitHistogramSnapshot {
            bounds_ms: WAIT_BUCKETS_MS.to_vec(),
            counts: self
                .buckets
                .iter()
                .map(|bucket| bucket.load(Ordering::Relaxed))
                .collect(),
        }
    }
}

/// Point-in-time copy of a [`WaitHistogram`]
///
/// `counts[i]` holds samples `<= bounds_ms[i]`; the last count has no bound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitHistogramSnapshot {
    bounds_ms: Vec<u64>,
    counts: Vec<u64>,
}

impl WaitHistogramSnapshot {
    pub fn bounds_ms(&self) -> &[u64] {
        &self.bounds_ms
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Total number of samples
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Add another snapshot's samples bucket by bucket
    pub fn merge(&mut self, other: &WaitHistogramSnapshot) {
        if self.counts.len() < other.counts.len() {
            self.counts.resize(other.counts.len(), 0);
        }
        for (mine, theirs) in self.counts.iter_mut().zip(&other.counts) {
            *mine += theirs;
        }
    }
}

impl Default for WaitHistogramSnapshot {
    fn default() -> Self {
        Self {
            bounds_ms: WAIT_BUCKETS_MS.to_vec(),
            counts: vec![0; BUCKET_COUNT],
        }
    }
}

/// Live counters for one destination's pool
///
/// Every field is updated with an independent atomic operation, so a
/// snapshot is consistent per counter but not across counters: it may
/// briefly show e.g. more `created` than `idle + active`.
#[derive(Debug, Default)]
pub struct DestinationStats {
    created: AtomicU64,
    destroyed: AtomicU64,
    errors: AtomicU64,
    timeouts: AtomicU64,
    exhausted: AtomicU64,
    acquired: AtomicU64,
    idle: AtomicUsize,
    in_use: AtomicUsize,
    waiting: AtomicUsize,
    capacity: AtomicUsize,
    wait_times: WaitHistogram,
}

impl DestinationStats {
    pub(crate) fn record_created(&self) {
        self.created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_destroyed(&self) {
        self.destroyed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_exhausted(&self) {
        self.exhausted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_acquired(&self, waited: Duration) {
        self.acquired.fetch_add(1, Ordering::Relaxed);
        self.wait_times.record(waited);
    }

    pub(crate) fn set_gauges(&self, idle: usize, in_use: usize, waiting: usize, capacity: usize) {
        self.idle.store(idle, Ordering::Relaxed);
        self.in_use.store(in_use, Ordering::Relaxed);
        self.waiting.store(waiting, Ordering::Relaxed);
        self.capacity.store(capacity, Ordering::Relaxed);
    }

    /// Connections opened so far
    pub fn created(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    /// Connections torn down so far
    pub fn destroyed(&self) -> u64 {
        self.destroyed.load(Ordering::Relaxed)
    }

    /// Failed connection attempts
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Acquisitions that gave up waiting
    pub fn timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }

    /// Acquisitions rejected by the fail-fast policy
    pub fn exhausted(&self) -> u64 {
        self.exhausted.load(Ordering::Relaxed)
    }

    /// Copy every counter and gauge into a [`PoolStats`]
    pub fn snapshot(&self) -> PoolStats {
        let idle = self.idle.load(Ordering::Relaxed);
        let active = self.in_use.load(Ordering::Relaxed);
        PoolStats {
            total: idle + active,
            idle,
            active,
            waiting: self.waiting.load(Ordering::Relaxed),
            capacity: self.capacity.load(Ordering::Relaxed),
            created: self.created(),
            destroyed: self.destroyed(),
            errors: self.errors(),
            timeouts: self.timeouts(),
            exhausted: self.exhausted(),
            acquired: self.acquired.load(Ordering::Relaxed),
            wait_times: self.wait_times.snapshot(),
        }
    }
}

/// Statistics about a connection pool's state
///
/// Provides insight into pool utilization and health. Gauges (`idle`,
/// `active`, `waiting`, `capacity`) describe the moment of the snapshot;
/// the remaining counters only ever grow.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PoolStats {
    /// Total number of connections (idle + active)
    total: usize,
    /// Number of idle connections available in the pool
    idle: usize,
    /// Number of connections currently in use
    active: usize,
    /// Number of requests waiting for a connection
    waiting: usize,
    /// Current capacity limit
    capacity: usize,
    created: u64,
    destroyed: u64,
    errors: u64,
    timeouts: u64,
    exhausted: u64,
    acquired: u64,
    wait_times: WaitHistogramSnapshot,
}

impl PoolStats {
    /// Create pool statistics holding only gauges
    pub fn new(idle: usize, active: usize, waiting: usize, capacity: usize) -> Self {
        Self {
            total: idle + active,
            idle,
            active,
            waiting,
            capacity,
            ..Self::default()
        }
    }

    /// Get the total number of connections
    pub fn total(&self) -> usize {
        self.total
    }

    /// Get the number of idle connections
    pub fn idle(&self) -> usize {
        self.idle
    }

    /// Get the number of active (in-use) connections
    pub fn active(&self) -> usize {
        self.active
    }

    /// Get the number of waiting requests
    pub fn waiting(&self) -> usize {
        self.waiting
    }

    /// Get the capacity limit
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn created(&self) -> u64 {
        self.created
    }

    pub fn destroyed(&self) -> u64 {
        self.destroyed
    }

    pub fn errors(&self) -> u64 {
        self.errors
    }

    pub fn timeouts(&self) -> u64 {
        self.timeouts
    }

    pub fn exhausted(&self) -> u64 {
        self.exhausted
    }

    pub fn acquired(&self) -> u64 {
        self.acquired
    }

    pub fn wait_times(&self) -> &WaitHistogramSnapshot {
        &self.wait_times
    }

    /// Calculate pool utilization as a percentage (0.0 to 1.0)
    ///
    /// Returns 0.0 if total is 0 to avoid division by zero.
    pub fn utilization(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.active as f64 / self.total as f64
        }
    }

    /// Check if the pool is fully utilized (no idle connection and no room
    /// to open another)
    pub fn is_full(&self) -> bool {
        self.idle == 0 && self.total > 0 && self.total >= self.capacity
    }

    /// Fold another pool's statistics into this one
    pub fn merge(&mut self, other: &PoolStats) {
        self.total += other.total;
        self.idle += other.idle;
        self.active += other.active;
        self.waiting += other.waiting;
        self.capacity += other.capacity;
        self.created += other.created;
        self.destroyed += other.destroyed;
        self.errors += other.errors;
        self.timeouts += other.timeouts;
        self.exhausted += other.exhausted;
        self.acquired += other.acquired;
        self.wait_times.merge(&other.wait_times);
    }
}
