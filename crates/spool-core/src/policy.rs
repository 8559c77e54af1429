//! Overflow policy selection

use serde::{Deserialize, Serialize};

/// What a pool does when every slot is taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Queue the caller and suspend until a handle is freed or the deadline
    /// elapses
    #[default]
    Block,
    /// Fail immediately with [`PoolError::Exhausted`](crate::PoolError::Exhausted)
    /// without suspending
    FailFast,
}

impl OverflowPolicy {
    /// Check whether callers may be suspended under this policy
    pub fn may_wait(&self) -> bool {
        matches!(self, OverflowPolicy::Block)
    }
}
