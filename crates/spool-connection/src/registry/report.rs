//! Serializable statistics report

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use spool_core::Destination;

use crate::pool::PoolStats;

/// Statistics for a whole registry
///
/// `pool` sums every destination. Only the first destinations by name are
/// listed individually; the rest are counted in `omitted_destinations`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatsReport {
    pub pool: PoolStats,
    pub destinations: BTreeMap<Destination, PoolStats>,
    pub omitted_destinations: usize,
}

impl StatsReport {
    /// Build a report from per-destination statistics
    pub fn collect(
        stats: impl IntoIterator<Item = (Destination, PoolStats)>,
        max_destinations: usize,
    ) -> Self {
        let mut sorted: Vec<_> = stats.into_iter().collect();
        sorted.sort_by(|(a, _), (b, _)| a.cmp(b));

        let mut report = Self::default();
        for (destination, stats) in sorted {
            report.pool.merge(&stats);
            if report.destinations.len() < max_destinations {
                report.destinations.insert(destination, stats);
            } else {
                report.omitted_destinations += 1;
            }
        }
        report
    }

    pub fn destination_count(&self) -> usize {
        self.destinations.len() + self.omitted_destinations
    }
}
