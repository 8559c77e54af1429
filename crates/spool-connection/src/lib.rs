//! Spool Connection - Connection pooling
//!
//! This crate handles bounded per-destination connection pools, the
//! registry that creates them on demand, and live reconfiguration.

mod listener;
pub mod pool;
pub mod registry;

pub use listener::ConfigListener;
pub use pool::{
    DestinationStats, HandleState, PoolConfig, PoolStats, PooledConnection, ResourcePool,
    WaitHistogramSnapshot,
};
pub use registry::{DestinationOverride, PoolRegistry, PoolSettings, StatsReport};
pub use spool_core::{
    ConnectError, ConnectionFactory, Destination, HandleId, OverflowPolicy, PoolError,
    PoolErrorKind, PoolId, Result,
};
