//! Pool registry
//!
//! Maps destinations to their pools, creating pools on demand, and applies
//! registry-wide settings to all of them.

#[allow(clippy::module_inception)]
mod registry;
mod report;
mod settings;


pub use registry::PoolRegistry;
pub use report::StatsReport;
pub use settings::{DestinationOverride, PoolSettings};
