//! Error types for Spool

use std::time::Duration;

use thiserror::Error;

use crate::destination::{Destination, HandleId};

/// Error a connection factory reports when it cannot produce a connection
#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection refused: {0}")]
    Refused(String),

    #[error("Connect timeout: {0}")]
    Timeout(String),

    #[error("{0}")]
    Other(String),
}

/// Error type for pool operations
///
/// Every acquisition failure reaches the caller. `Exhausted` and `Timeout`
/// are deliberately distinct: the first means the pool is too small, the
/// second that the backend is too slow to hand connections back.
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Failed to connect to {destination}: {source}")]
    ConnectFailed {
        destination: Destination,
        #[source]
        source: ConnectError,
    },

    #[error("Timed out waiting for a connection to {destination} (waited {waited:?})")]
    Timeout {
        destination: Destination,
        waited: Duration,
    },

    #[error("Connection pool for {destination} is exhausted (capacity: {capacity})")]
    Exhausted {
        destination: Destination,
        capacity: usize,
    },

    #[error("Connection pool for {0} is draining")]
    Draining(Destination),

    #[error("Invalid handle {handle}: {reason}")]
    InvalidHandle {
        handle: HandleId,
        reason: &'static str,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Payload-free classification of a [`PoolError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolErrorKind {
    ConnectFailed,
    Timeout,
    Exhausted,
    Draining,
    InvalidHandle,
    Configuration,
}

impl PoolError {
    pub fn kind(&self) -> PoolErrorKind {
        match self {
            PoolError::ConnectFailed { .. } => PoolErrorKind::ConnectFailed,
            PoolError::Timeout { .. } => PoolErrorKind::Timeout,
            PoolError::Exhausted { .. } => PoolErrorKind::Exhausted,
            PoolError::Draining(_) => PoolErrorKind::Draining,
            PoolError::InvalidHandle { .. } => PoolErrorKind::InvalidHandle,
            PoolError::Configuration(_) => PoolErrorKind::Configuration,
        }
    }

    /// Check if retrying the acquisition later may succeed
    ///
    /// Invalid handles and configuration errors are caller bugs, and a
    /// draining pool never comes back.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind(),
            PoolErrorKind::ConnectFailed | PoolErrorKind::Timeout | PoolErrorKind::Exhausted
        )
    }
}

/// Result type alias for pool operations
pub type Result<T> = std::result::Result<T, PoolError>;
