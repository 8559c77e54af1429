//! Borrowed connection handles

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Weak;
use std::time::Duration;

use spool_core::{HandleId, PoolId, Result};
use tokio::time::Instant;

/// Lifecycle state of a pooled connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleState {
    /// Parked in the pool's idle set
    Idle,
    /// Borrowed by exactly one caller
    InUse,
    /// Flagged unusable by its borrower; destroyed on release
    Broken,
}

/// A physical connection together with its lifetime bookkeeping
pub(crate) struct Handle<C> {
    id: HandleId,
    connection: C,
    state: HandleState,
    created_at: Instant,
    last_used_at: Instant,
    /// Whether the borrower got to use it since it was last parked
    handed_out: bool,
}

impl<C> Handle<C> {
    pub(crate) fn new(id: HandleId, connection: C) -> Self {
        let now = Instant::now();
        Self {
            id,
            connection,
            state: HandleState::InUse,
            created_at: now,
            last_used_at: now,
            handed_out: false,
        }
    }

    pub(crate) fn id(&self) -> HandleId {
        self.id
    }

    pub(crate) fn is_broken(&self) -> bool {
        self.state == HandleState::Broken
    }

    pub(crate) fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub(crate) fn idle_for(&self) -> Duration {
        self.last_used_at.elapsed()
    }

    pub(crate) fn mark_in_use(&mut self) {
        self.state = HandleState::InUse;
        self.handed_out = false;
    }

    /// Park the handle
    ///
    /// The idle clock restarts only if the borrower actually had it; a
    /// checkout abandoned during validation keeps the old timestamp.
    pub(crate) fn mark_idle(&mut self) {
        self.state = HandleState::Idle;
        if self.handed_out {
            self.last_used_at = Instant::now();
        }
        self.handed_out = false;
    }

    pub(crate) fn into_connection(self) -> C {
        self.connection
    }
}

/// Implemented by the pool a handle was borrowed from
pub(crate) trait Reclaim<C>: Send + Sync {
    fn reclaim(&self, handle: Handle<C>) -> Result<()>;
}

/// A connection borrowed from a pool
///
/// Exclusively owned by the borrower. When dropped, the connection is
/// automatically returned to its pool, on every exit path including
/// cancellation of the surrounding task. If the pool is already gone the
/// connection is simply closed.
pub struct PooledConnection<C> {
    handle: Option<Handle<C>>,
    pool_id: PoolId,
    pool: Weak<dyn Reclaim<C>>,
}

impl<C> PooledConnection<C> {
    pub(crate) fn new(handle: Handle<C>, pool_id: PoolId, pool: Weak<dyn Reclaim<C>>) -> Self {
        Self {
            handle: Some(handle),
            pool_id,
            pool,
        }
    }

    fn handle(&self) -> &Handle<C> {
        self.handle.as_ref().expect("connection taken")
    }

    /// Get the connection's identity within its pool
    pub fn id(&self) -> HandleId {
        self.handle().id
    }

    /// Get the identity of the pool this connection belongs to
    pub fn pool_id(&self) -> PoolId {
        self.pool_id
    }

    /// Get the connection's lifecycle state
    pub fn state(&self) -> HandleState {
        self.handle().state
    }

    /// Time since the physical connection was opened
    pub fn age(&self) -> Duration {
        self.handle().age()
    }

    pub(crate) fn idle_for(&self) -> Duration {
        self.handle().idle_for()
    }

    /// Flag the connection as unusable
    ///
    /// A broken connection is destroyed instead of pooled when released,
    /// freeing its slot for the next caller.
    pub fn mark_broken(&mut self) {
        if let Some(handle) = self.handle.as_mut() {
            handle.state = HandleState::Broken;
        }
    }

    /// Return the connection to its pool now
    ///
    /// Equivalent to dropping it, but surfaces
    /// [`PoolError::InvalidHandle`](spool_core::PoolError::InvalidHandle)
    /// instead of logging it.
    pub fn release(mut self) -> Result<()> {
        match (self.handle.take(), self.pool.upgrade()) {
            (Some(handle), Some(pool)) => pool.reclaim(handle),
            _ => Ok(()),
        }
    }

    pub(crate) fn mark_handed_out(&mut self) {
        if let Some(handle) = self.handle.as_mut() {
            handle.handed_out = true;
        }
    }

    /// Take the handle out without returning it anywhere
    pub(crate) fn detach(&mut self) -> Option<Handle<C>> {
        self.handle.take()
    }
}

impl<C> Deref for PooledConnection<C> {
    type Target = C;

    fn deref(&self) -> &Self::Target {
        &self.handle().connection
    }
}

impl<C> DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.handle.as_mut().expect("connection taken").connection
    }
}

impl<C> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take()
            && let Some(pool) = self.pool.upgrade()
        {
            let id = handle.id;
            if let Err(e) = pool.reclaim(handle) {
                tracing::error!(handle_id = %id, error = %e, "failed to return connection to pool");
            }
        }
    }
}

impl<C> fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("PooledConnection");
        if let Some(handle) = &self.handle {
            s.field("id", &handle.id).field("state", &handle.state);
        }
        s.field("pool_id", &self.pool_id).finish()
    }
}
