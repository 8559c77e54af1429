//! Connection pool implementation

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use spool_core::{
    ConnectionFactory, Destination, HandleId, OverflowPolicy, PoolError, PoolId, Result,
};
use tokio::sync::Notify;
use tokio::time::Instant;

use super::config::PoolConfig;
use super::handle::{Handle, PooledConnection, Reclaim};
use super::stats::{DestinationStats, PoolStats};
use super::waiters::{Grant, Ticket, WaitQueue};

/// Everything guarded by the pool lock
///
/// `idle.len() + borrowed.len() + creating <= config.max_size()` holds
/// whenever the lock is released, except after a capacity decrease while
/// borrowed handles are still out.
struct PoolState<C> {
    config: PoolConfig,
    idle: VecDeque<Handle<C>>,
    borrowed: HashSet<HandleId>,
    /// Slots reserved for connections being opened
    creating: usize,
    waiters: WaitQueue<C>,
    draining: bool,
}

impl<C> PoolState<C> {
    fn occupied(&self) -> usize {
        self.idle.len() + self.borrowed.len() + self.creating
    }

    fn has_room(&self) -> bool {
        self.occupied() < self.config.max_size()
    }

    fn is_quiescent(&self) -> bool {
        self.borrowed.is_empty() && self.creating == 0
    }

    fn is_expired(&self, handle: &Handle<C>) -> bool {
        self.config
            .max_lifetime()
            .is_some_and(|max_lifetime| handle.age() > max_lifetime)
    }

    /// Serve queued waiters from idle handles or free slots, oldest first
    fn dispatch(&mut self) {
        while !self.waiters.is_empty() {
            if let Some(handle) = self.idle.pop_front() {
                let id = handle.id();
                self.borrowed.insert(id);
                if let Some(Grant::Handle(handle)) = self.waiters.offer(Grant::Handle(handle)) {
                    self.borrowed.remove(&id);
                    self.idle.push_front(handle);
                }
            } else if self.has_room() {
                self.creating += 1;
                if self.waiters.offer(Grant::Slot).is_some() {
                    self.creating -= 1;
                }
            } else {
                break;
            }
        }
    }

    /// Take back a handle that was borrowed
    ///
    /// The longest waiter gets it directly; otherwise it is parked if it
    /// still fits under the capacity. Returns the handle when it has to be
    /// destroyed instead.
    fn restore(&mut self, mut handle: Handle<C>) -> Option<Handle<C>> {
        self.borrowed.remove(&handle.id());

        if self.draining || handle.is_broken() || self.is_expired(&handle) {
            // The slot is free now, someone queued may open a replacement
            self.dispatch();
            return Some(handle);
        }
        if self.occupied() >= self.config.max_size() {
            return Some(handle);
        }

        handle.mark_idle();
        let id = handle.id();
        self.borrowed.insert(id);
        let Some(Grant::Handle(handle)) = self.waiters.offer(Grant::Handle(handle)) else {
            return None;
        };
        self.borrowed.remove(&id);
        self.idle.push_back(handle);
        None
    }

    /// Settle a grant whose waiter is gone
    fn reclaim_grant(&mut self, grant: Grant<C>) -> Option<Handle<C>> {
        match grant {
            Grant::Handle(handle) => self.restore(handle),
            Grant::Slot => {
                self.creating -= 1;
                self.dispatch();
                None
            }
            Grant::Closed => None,
        }
    }

    /// Evict idle handles until the pool fits its capacity again
    fn trim_idle(&mut self) -> Vec<Handle<C>> {
        let mut evicted = Vec::new();
        while self.occupied() > self.config.max_size() {
            match self.idle.pop_front() {
                Some(handle) => evicted.push(handle),
                None => break,
            }
        }
        evicted
    }
}

struct Shared<F: ConnectionFactory> {
    id: PoolId,
    destination: Destination,
    factory: Arc<F>,
    state: Mutex<PoolState<F::Connection>>,
    stats: DestinationStats,
    next_handle_id: AtomicU64,
    drained: Notify,
}

impl<F: ConnectionFactory> Shared<F> {
    fn publish(&self, state: &PoolState<F::Connection>) {
        self.stats.set_gauges(
            state.idle.len(),
            state.borrowed.len(),
            state.waiters.len(),
            state.config.max_size(),
        );
    }

    fn destroy(&self, handle: Handle<F::Connection>) {
        tracing::debug!(
            destination = %self.destination,
            handle_id = %handle.id(),
            "destroying connection"
        );
        self.stats.record_destroyed();
        self.factory
            .destroy(&self.destination, handle.into_connection());
    }

    /// Publish gauges, then destroy and wake drainers outside the lock
    fn finish(
        &self,
        state: parking_lot::MutexGuard<'_, PoolState<F::Connection>>,
        doomed: Option<Handle<F::Connection>>,
    ) {
        self.publish(&state);
        let quiescent = state.draining && state.is_quiescent();
        drop(state);

        if let Some(handle) = doomed {
            self.destroy(handle);
        }
        if quiescent {
            self.drained.notify_waiters();
        }
    }

    fn release(&self, handle: Handle<F::Connection>) -> Result<()> {
        let id = handle.id();
        let mut state = self.state.lock();
        if !state.borrowed.contains(&id) {
            return Err(PoolError::InvalidHandle {
                handle: id,
                reason: "handle is not borrowed from this pool",
            });
        }
        let doomed = state.restore(handle);
        self.finish(state, doomed);
        tracing::trace!(destination = %self.destination, handle_id = %id, "connection released");
        Ok(())
    }

    fn free_slot(&self) {
        let mut state = self.state.lock();
        state.creating -= 1;
        state.dispatch();
        self.finish(state, None);
    }
}

impl<F: ConnectionFactory> Reclaim<F::Connection> for Shared<F> {
    fn reclaim(&self, handle: Handle<F::Connection>) -> Result<()> {
        self.release(handle)
    }
}

impl<F: ConnectionFactory> Drop for Shared<F> {
    fn drop(&mut self) {
        let idle: Vec<_> = self.state.get_mut().idle.drain(..).collect();
        for handle in idle {
            self.destroy(handle);
        }
    }
}

/// A reserved creation slot
///
/// Released again if the acquisition is abandoned or the factory fails, so
/// a cancelled connect never leaks capacity.
struct SlotReservation<F: ConnectionFactory> {
    shared: Arc<Shared<F>>,
    armed: bool,
}

impl<F: ConnectionFactory> SlotReservation<F> {
    fn new(shared: Arc<Shared<F>>) -> Self {
        Self {
            shared,
            armed: true,
        }
    }

    /// Consume the slot while already holding the lock
    fn settle(mut self, state: &mut PoolState<F::Connection>) {
        self.armed = false;
        state.creating -= 1;
    }
}

impl<F: ConnectionFactory> Drop for SlotReservation<F> {
    fn drop(&mut self) {
        if self.armed {
            self.shared.free_slot();
        }
    }
}

/// A queued acquisition
///
/// Dropping it before it is settled removes the entry from the queue, or,
/// if a grant raced in, hands that grant straight back to the pool.
struct PendingWaiter<'a, F: ConnectionFactory> {
    shared: &'a Shared<F>,
    ticket: Ticket<F::Connection>,
    settled: bool,
}

impl<F: ConnectionFactory> Drop for PendingWaiter<'_, F> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut state = self.shared.state.lock();
        let doomed = if state.waiters.remove(self.ticket.id) {
            None
        } else {
            match self.ticket.rx.try_recv() {
                Ok(grant) => state.reclaim_grant(grant),
                Err(_) => None,
            }
        };
        self.shared.finish(state, doomed);
    }
}

/// How an acquisition is going to be satisfied
enum Checkout<F: ConnectionFactory> {
    /// An existing connection
    Reused(PooledConnection<F::Connection>),
    /// Room to open a new one
    Slot(SlotReservation<F>),
}

/// A bounded pool of connections to one destination
///
/// The pool hands out at most `max_size` connections at a time. When it is
/// saturated, the configured [`OverflowPolicy`] decides whether callers
/// queue (strictly first come, first served) or fail immediately.
/// Capacity and policy can be changed at any time without pausing traffic.
///
/// Cloning is cheap and yields another handle to the same pool.
pub struct ResourcePool<F: ConnectionFactory> {
    shared: Arc<Shared<F>>,
}

impl<F: ConnectionFactory> Clone for ResourcePool<F> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<F: ConnectionFactory> ResourcePool<F> {
    /// Create a new, empty pool for a destination
    ///
    /// No connection is opened until the first acquisition.
    pub fn new(destination: Destination, config: PoolConfig, factory: impl Into<Arc<F>>) -> Self {
        let shared = Shared {
            id: PoolId::new(),
            destination,
            factory: factory.into(),
            state: Mutex::new(PoolState {
                config,
                idle: VecDeque::new(),
                borrowed: HashSet::new(),
                creating: 0,
                waiters: WaitQueue::new(),
                draining: false,
            }),
            stats: DestinationStats::default(),
            next_handle_id: AtomicU64::new(0),
            drained: Notify::new(),
        };
        shared.publish(&shared.state.lock());
        Self {
            shared: Arc::new(shared),
        }
    }

    pub fn id(&self) -> PoolId {
        self.shared.id
    }

    pub fn destination(&self) -> &Destination {
        &self.shared.destination
    }

    /// Get the live configuration
    pub fn config(&self) -> PoolConfig {
        self.shared.state.lock().config.clone()
    }

    pub fn capacity(&self) -> usize {
        self.shared.state.lock().config.max_size()
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.shared.state.lock().config.policy()
    }

    pub fn is_draining(&self) -> bool {
        self.shared.state.lock().draining
    }

    /// Get current pool statistics
    pub fn stats(&self) -> PoolStats {
        self.shared.stats.snapshot()
    }

    /// Get the live counters backing [`stats`](Self::stats)
    pub fn destination_stats(&self) -> &DestinationStats {
        &self.shared.stats
    }

    /// Get a connection, waiting at most the configured acquire timeout
    pub async fn get(&self) -> Result<PooledConnection<F::Connection>> {
        let timeout = self.shared.state.lock().config.acquire_timeout();
        self.acquire(Instant::now() + timeout).await
    }

    /// Get a connection from the pool
    ///
    /// This will:
    /// 1. Reuse an idle connection if one is available
    /// 2. If none available and under capacity, open a new connection
    /// 3. Otherwise apply the overflow policy: wait in line until `deadline`
    ///    or fail with [`PoolError::Exhausted`] right away
    ///
    /// Idle connections past their lifetime or failing their health check
    /// are destroyed and replaced transparently.
    #[tracing::instrument(skip_all, fields(destination = %self.shared.destination))]
    pub async fn acquire(&self, deadline: Instant) -> Result<PooledConnection<F::Connection>> {
        let started = Instant::now();
        let mut checkout = self.checkout(deadline).await?;

        let mut conn = loop {
            match checkout {
                Checkout::Reused(conn) => {
                    if self.is_reusable(&conn).await {
                        break conn;
                    }
                    checkout = match self.evict(conn) {
                        Some(reservation) => Checkout::Slot(reservation),
                        None => self.checkout(deadline).await?,
                    };
                }
                Checkout::Slot(reservation) => break self.connect(reservation).await?,
            }
        };
        conn.mark_handed_out();

        self.shared.stats.record_acquired(started.elapsed());
        tracing::debug!(handle_id = %conn.id(), "connection acquired");
        Ok(conn)
    }

    async fn checkout(&self, deadline: Instant) -> Result<Checkout<F>> {
        let ticket = {
            let mut state = self.shared.state.lock();
            if state.draining {
                return Err(PoolError::Draining(self.shared.destination.clone()));
            }

            if let Some(mut handle) = state.idle.pop_front() {
                handle.mark_in_use();
                state.borrowed.insert(handle.id());
                self.shared.publish(&state);
                return Ok(Checkout::Reused(self.wrap(handle)));
            }

            if state.has_room() {
                state.creating += 1;
                return Ok(Checkout::Slot(SlotReservation::new(Arc::clone(
                    &self.shared,
                ))));
            }

            let capacity = state.config.max_size();
            if !state.config.policy().may_wait() {
                drop(state);
                self.shared.stats.record_exhausted();
                tracing::warn!(capacity, "connection pool exhausted");
                return Err(PoolError::Exhausted {
                    destination: self.shared.destination.clone(),
                    capacity,
                });
            }

            let ticket = state.waiters.enqueue();
            self.shared.publish(&state);
            tracing::debug!(
                capacity,
                waiting = state.waiters.len(),
                "connection pool saturated, queueing"
            );
            ticket
        };

        self.wait(ticket, deadline).await
    }

    async fn wait(&self, ticket: Ticket<F::Connection>, deadline: Instant) -> Result<Checkout<F>> {
        let started = Instant::now();
        let mut pending = PendingWaiter {
            shared: &*self.shared,
            ticket,
            settled: false,
        };

        match tokio::time::timeout_at(deadline, &mut pending.ticket.rx).await {
            Ok(Ok(grant)) => {
                pending.settled = true;
                match grant {
                    Grant::Handle(mut handle) => {
                        handle.mark_in_use();
                        Ok(Checkout::Reused(self.wrap(handle)))
                    }
                    Grant::Slot => Ok(Checkout::Slot(SlotReservation::new(Arc::clone(
                        &self.shared,
                    )))),
                    Grant::Closed => Err(PoolError::Draining(self.shared.destination.clone())),
                }
            }
            Ok(Err(_)) => {
                pending.settled = true;
                Err(PoolError::Draining(self.shared.destination.clone()))
            }
            Err(_) => {
                let waited = started.elapsed();
                self.shared.stats.record_timeout();
                tracing::warn!(
                    waited_ms = waited.as_millis() as u64,
                    "timed out waiting for a connection"
                );
                Err(PoolError::Timeout {
                    destination: self.shared.destination.clone(),
                    waited,
                })
            }
        }
    }

    async fn is_reusable(&self, conn: &PooledConnection<F::Connection>) -> bool {
        let (max_lifetime, idle_timeout, test_on_acquire) = {
            let state = self.shared.state.lock();
            (
                state.config.max_lifetime(),
                state.config.idle_timeout(),
                state.config.test_on_acquire(),
            )
        };

        if let Some(max_lifetime) = max_lifetime
            && conn.age() > max_lifetime
        {
            tracing::debug!(handle_id = %conn.id(), "connection exceeded max lifetime");
            return false;
        }
        if conn.idle_for() > idle_timeout {
            tracing::debug!(handle_id = %conn.id(), "connection idle too long");
            return false;
        }
        if test_on_acquire && !self.shared.factory.health_check(conn).await {
            tracing::warn!(handle_id = %conn.id(), "connection failed health check");
            return false;
        }
        true
    }

    /// Destroy a stale connection
    ///
    /// Its slot is kept for a replacement only if the pool still has room
    /// under the current capacity; otherwise the caller has to check out
    /// again.
    fn evict(&self, mut conn: PooledConnection<F::Connection>) -> Option<SlotReservation<F>> {
        let handle = conn.detach();
        let mut state = self.shared.state.lock();
        if let Some(handle) = &handle {
            state.borrowed.remove(&handle.id());
        }
        let replace = !state.draining && state.has_room();
        if replace {
            state.creating += 1;
        } else {
            state.dispatch();
        }
        self.shared.finish(state, handle);
        replace.then(|| SlotReservation::new(Arc::clone(&self.shared)))
    }

    async fn connect(
        &self,
        reservation: SlotReservation<F>,
    ) -> Result<PooledConnection<F::Connection>> {
        let draining = self.shared.state.lock().draining;
        if draining {
            drop(reservation);
            return Err(PoolError::Draining(self.shared.destination.clone()));
        }

        let connection = match self.shared.factory.create(&self.shared.destination).await {
            Ok(connection) => connection,
            Err(source) => {
                self.shared.stats.record_error();
                tracing::warn!(error = %source, "failed to open connection");
                drop(reservation);
                return Err(PoolError::ConnectFailed {
                    destination: self.shared.destination.clone(),
                    source,
                });
            }
        };

        let id = HandleId::new(self.shared.next_handle_id.fetch_add(1, Ordering::Relaxed));
        let handle = Handle::new(id, connection);
        self.shared.stats.record_created();

        let mut state = self.shared.state.lock();
        reservation.settle(&mut state);
        if state.draining {
            self.shared.finish(state, Some(handle));
            return Err(PoolError::Draining(self.shared.destination.clone()));
        }
        state.borrowed.insert(id);
        self.shared.publish(&state);
        drop(state);

        tracing::debug!(handle_id = %id, "opened new connection");
        Ok(self.wrap(handle))
    }

    fn wrap(&self, handle: Handle<F::Connection>) -> PooledConnection<F::Connection> {
        let shared: Weak<Shared<F>> = Arc::downgrade(&self.shared);
        let pool: Weak<dyn Reclaim<F::Connection>> = shared;
        PooledConnection::new(handle, self.shared.id, pool)
    }

    /// Return a connection to this pool
    ///
    /// Equivalent to dropping the connection, except that misuse is
    /// reported: a connection borrowed from a different pool is sent back to
    /// the pool it came from and [`PoolError::InvalidHandle`] is returned.
    pub fn release(&self, conn: PooledConnection<F::Connection>) -> Result<()> {
        if conn.pool_id() != self.shared.id {
            let handle = conn.id();
            tracing::error!(
                destination = %self.shared.destination,
                handle_id = %handle,
                "connection released to the wrong pool"
            );
            drop(conn);
            return Err(PoolError::InvalidHandle {
                handle,
                reason: "handle belongs to a different pool",
            });
        }
        conn.release()
    }

    /// Change the capacity limit
    ///
    /// Raising it immediately lets queued callers open connections, in
    /// arrival order. Lowering it destroys surplus idle connections now and
    /// surplus borrowed ones as they come back; a borrowed connection is
    /// never revoked.
    pub fn set_capacity(&self, capacity: usize) {
        self.update_config(|config| config.set_max_size(capacity));
    }

    /// Change the overflow policy
    ///
    /// Callers already queued keep waiting until served or timed out.
    pub fn set_policy(&self, policy: OverflowPolicy) {
        self.update_config(|config| config.set_policy(policy));
    }

    /// Replace the whole configuration
    pub fn reconfigure(&self, config: PoolConfig) {
        self.update_config(|current| *current = config);
    }

    fn update_config(&self, apply: impl FnOnce(&mut PoolConfig)) {
        let evicted = {
            let mut state = self.shared.state.lock();
            let previous = state.config.clone();
            apply(&mut state.config);
            if state.config == previous {
                return;
            }

            let evicted = state.trim_idle();
            state.dispatch();
            self.shared.publish(&state);

            if previous.max_size() != state.config.max_size() {
                tracing::info!(
                    destination = %self.shared.destination,
                    previous = previous.max_size(),
                    capacity = state.config.max_size(),
                    evicted = evicted.len(),
                    "connection pool resized"
                );
            }
            if previous.policy() != state.config.policy() {
                tracing::info!(
                    destination = %self.shared.destination,
                    policy = ?state.config.policy(),
                    "overflow policy changed"
                );
            }
            evicted
        };

        for handle in evicted {
            self.shared.destroy(handle);
        }
    }

    /// Close all idle connections in the pool
    ///
    /// Returns how many were closed.
    pub fn close_idle(&self) -> usize {
        let idle: Vec<_> = {
            let mut state = self.shared.state.lock();
            let idle = state.idle.drain(..).collect();
            state.dispatch();
            self.shared.publish(&state);
            idle
        };

        let count = idle.len();
        for handle in idle {
            self.shared.destroy(handle);
        }
        count
    }

    /// Shut the pool down
    ///
    /// Every later acquisition and every queued caller fails with
    /// [`PoolError::Draining`]. Idle connections are destroyed now; borrowed
    /// ones when they are returned. Resolves once nothing is borrowed or
    /// being opened. Calling it again is harmless.
    #[tracing::instrument(skip_all, fields(destination = %self.shared.destination))]
    pub async fn drain(&self) {
        let idle: Vec<_> = {
            let mut state = self.shared.state.lock();
            if !state.draining {
                tracing::info!(
                    borrowed = state.borrowed.len(),
                    idle = state.idle.len(),
                    "draining connection pool"
                );
            }
            state.draining = true;
            let rejected = state.waiters.close_all();
            if rejected > 0 {
                tracing::debug!(rejected, "rejected queued acquisitions");
            }
            let idle = state.idle.drain(..).collect();
            self.shared.publish(&state);
            idle
        };

        for handle in idle {
            self.shared.destroy(handle);
        }

        loop {
            let notified = self.shared.drained.notified();
            let quiescent = self.shared.state.lock().is_quiescent();
            if quiescent {
                break;
            }
            notified.await;
        }
        tracing::debug!("connection pool drained");
    }
}
