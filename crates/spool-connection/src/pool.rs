//! Bounded connection pools
//!
//! This module provides one pool per destination with a live, swappable
//! capacity, two overflow policies and per-destination statistics.
//!
//! # Example
//!
//! ```ignore
//! use spool_connection::pool::{PoolConfig, ResourcePool};
//! use spool_core::{Destination, OverflowPolicy};
//!
//! let config = PoolConfig::new(8)
//!     .with_policy(OverflowPolicy::Block)
//!     .with_acquire_timeout_ms(5000);
//!
//! let pool = ResourcePool::new(Destination::new("db/orders"), config, factory);
//! let conn = pool.get().await?;
//! // Use connection...
//! // Connection returned to pool on drop
//! ```

mod config;
mod handle;
#[allow(clippy::module_inception)]
mod pool;
mod stats;
mod waiters;

#[cfg(test)]
mod tests;

pub use config::PoolConfig;
pub use handle::{HandleState, PooledConnection};
pub use pool::ResourcePool;
pub use stats::{
    DestinationStats, PoolStats, WAIT_BUCKETS_MS, WaitHistogram, WaitHistogramSnapshot,
};
