//! Tests for connection pool functionality

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use rstest::rstest;
use spool_core::{
    ConnectError, ConnectionFactory, Destination, OverflowPolicy, PoolError, PoolErrorKind,
};
use futures::poll;
use tokio::sync::{Notify, mpsc};
use tokio::time::Instant;

use super::config::PoolConfig;
use super::handle::HandleState;
use super::pool::ResourcePool;
use super::stats::{PoolStats, WaitHistogram};

/// Mock connection for testing
#[derive(Debug)]
struct MockConnection {
    id: usize,
}

/// Mock factory that counts connections created and destroyed
struct MockConnectionFactory {
    created: AtomicUsize,
    destroyed: AtomicUsize,
    refuse: AtomicBool,
    healthy: AtomicBool,
    /// Health checks park on `health_gate` while set
    hold_health: AtomicBool,
    health_gate: Notify,
}

impl MockConnectionFactory {
    fn new() -> Self {
        Self {
            created: AtomicUsize::new(0),
            destroyed: AtomicUsize::new(0),
            refuse: AtomicBool::new(false),
            healthy: AtomicBool::new(true),
            hold_health: AtomicBool::new(false),
            health_gate: Notify::new(),
        }
    }

    fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    fn destroyed(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectionFactory for MockConnectionFactory {
    type Connection = MockConnection;

    async fn create(
        &self,
        _destination: &Destination,
    ) -> std::result::Result<MockConnection, ConnectError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(ConnectError::Refused("mock backend is down".into()));
        }
        let id = self.created.fetch_add(1, Ordering::SeqCst);
        Ok(MockConnection { id })
    }

    fn destroy(&self, _destination: &Destination, _connection: MockConnection) {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
    }

    async fn health_check(&self, _connection: &MockConnection) -> bool {
        if self.hold_health.load(Ordering::SeqCst) {
            self.health_gate.notified().await;
        }
        self.healthy.load(Ordering::SeqCst)
    }
}

fn create_pool(
    config: PoolConfig,
) -> (ResourcePool<MockConnectionFactory>, Arc<MockConnectionFactory>) {
    let factory = Arc::new(MockConnectionFactory::new());
    let pool = ResourcePool::new(Destination::new("db/test"), config, Arc::clone(&factory));
    (pool, factory)
}

async fn wait_for_waiters(pool: &ResourcePool<MockConnectionFactory>, count: usize) {
    while pool.stats().waiting() != count {
        tokio::task::yield_now().await;
    }
}

// =============================================================================
// PoolConfig tests
// =============================================================================

#[test]
fn test_pool_config_creation() {
    let config = PoolConfig::new(10);
    assert_eq!(config.max_size(), 10);
    assert_eq!(config.policy(), OverflowPolicy::Block);
    assert_eq!(config.acquire_timeout(), Duration::from_millis(30_000));
    assert_eq!(config.idle_timeout(), Duration::from_millis(600_000));
    assert!(config.max_lifetime().is_none());
    assert!(!config.test_on_acquire());
}

#[test]
fn test_pool_config_builders() {
    let config = PoolConfig::new(1)
        .with_max_size(5)
        .with_policy(OverflowPolicy::FailFast)
        .with_acquire_timeout_ms(5000)
        .with_idle_timeout_ms(60000)
        .with_max_lifetime_ms(3600000)
        .with_test_on_acquire(true);

    assert_eq!(config.max_size(), 5);
    assert_eq!(config.policy(), OverflowPolicy::FailFast);
    assert_eq!(config.acquire_timeout(), Duration::from_millis(5000));
    assert_eq!(config.idle_timeout(), Duration::from_millis(60000));
    assert_eq!(config.max_lifetime(), Some(Duration::from_millis(3600000)));
    assert!(config.test_on_acquire());
}

#[test]
fn test_pool_config_default() {
    let config = PoolConfig::default();
    assert_eq!(config.max_size(), 10);
    assert_eq!(config.policy(), OverflowPolicy::Block);
    assert!(config.validate().is_ok());
}

#[test]
fn test_pool_config_zero_capacity_is_valid() {
    assert!(PoolConfig::new(0).validate().is_ok());
}

#[test]
fn test_pool_config_rejects_zero_timeouts() {
    let err = PoolConfig::new(1)
        .with_acquire_timeout_ms(0)
        .validate()
        .unwrap_err();
    assert_eq!(err.kind(), PoolErrorKind::Configuration);

    assert!(PoolConfig::new(1).with_idle_timeout_ms(0).validate().is_err());
    assert!(PoolConfig::new(1).with_max_lifetime_ms(0).validate().is_err());
}

#[test]
fn test_pool_config_serialization() {
    let config = PoolConfig::new(10)
        .with_policy(OverflowPolicy::FailFast)
        .with_max_lifetime_ms(3600000);

    let json = serde_json::to_string(&config).expect("serialize");
    let deserialized: PoolConfig = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(deserialized, config);
}

#[test]
fn test_pool_config_partial_json_uses_defaults() {
    let config: PoolConfig =
        serde_json::from_str(r#"{"max_size": 3, "policy": "fail_fast"}"#).expect("deserialize");
    assert_eq!(config.max_size(), 3);
    assert_eq!(config.policy(), OverflowPolicy::FailFast);
    assert_eq!(config.acquire_timeout(), Duration::from_millis(30_000));
}

// =============================================================================
// PoolStats tests
// =============================================================================

#[test]
fn test_pool_stats_creation() {
    let stats = PoolStats::new(6, 4, 2, 12);
    assert_eq!(stats.total(), 10);
    assert_eq!(stats.idle(), 6);
    assert_eq!(stats.active(), 4);
    assert_eq!(stats.waiting(), 2);
    assert_eq!(stats.capacity(), 12);
}

#[test]
fn test_pool_stats_utilization() {
    let stats = PoolStats::new(5, 5, 0, 10);
    assert!((stats.utilization() - 0.5).abs() < 0.001);

    let full_stats = PoolStats::new(0, 10, 0, 10);
    assert!((full_stats.utilization() - 1.0).abs() < 0.001);

    let empty_stats = PoolStats::new(0, 0, 0, 10);
    assert!((empty_stats.utilization() - 0.0).abs() < 0.001);
}

#[test]
fn test_pool_stats_is_full() {
    assert!(PoolStats::new(0, 10, 5, 10).is_full());
    assert!(!PoolStats::new(5, 5, 0, 10).is_full());
    assert!(!PoolStats::new(0, 3, 0, 10).is_full());
    assert!(!PoolStats::new(0, 0, 0, 0).is_full());
}

#[test]
fn test_pool_stats_merge() {
    let mut total = PoolStats::new(1, 2, 0, 4);
    total.merge(&PoolStats::new(3, 1, 2, 4));
    assert_eq!(total, PoolStats::new(4, 3, 2, 8));
}

#[test]
fn test_pool_stats_serialization() {
    let stats = PoolStats::new(6, 4, 2, 10);
    let json = serde_json::to_string(&stats).expect("serialize");
    let deserialized: PoolStats = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(stats, deserialized);
}

#[test]
fn test_wait_histogram_buckets() {
    let histogram = WaitHistogram::default();
    histogram.record(Duration::ZERO);
    histogram.record(Duration::from_millis(7));
    histogram.record(Duration::from_millis(10));
    histogram.record(Duration::from_secs(60));

    let snapshot = histogram.snapshot();
    assert_eq!(snapshot.counts(), &[1, 0, 2, 0, 0, 0, 0, 0, 1]);
    assert_eq!(snapshot.total(), 4);
    assert_eq!(snapshot.bounds_ms().len() + 1, snapshot.counts().len());
}

// =============================================================================
// ResourcePool tests
// =============================================================================

#[tokio::test]
async fn test_pool_get_connection() {
    let (pool, factory) = create_pool(PoolConfig::new(5));

    let conn = pool.get().await.expect("get connection");
    assert_eq!(conn.id, 0);
    assert_eq!(conn.state(), HandleState::InUse);
    assert_eq!(conn.pool_id(), pool.id());

    let stats = pool.stats();
    assert_eq!(stats.active(), 1);
    assert_eq!(stats.idle(), 0);
    assert_eq!(stats.created(), 1);
    assert_eq!(stats.acquired(), 1);
    assert_eq!(factory.created(), 1);
}

#[tokio::test]
async fn test_pool_connection_return_and_reuse() {
    let (pool, factory) = create_pool(PoolConfig::new(5));

    let first_id = {
        let conn = pool.get().await.expect("get connection");
        conn.id()
    };

    assert_eq!(pool.stats().active(), 0);
    assert_eq!(pool.stats().idle(), 1);

    let conn = pool.get().await.expect("get connection");
    assert_eq!(conn.id(), first_id);
    assert_eq!(factory.created(), 1);
}

#[tokio::test]
async fn test_pool_explicit_release() {
    let (pool, _factory) = create_pool(PoolConfig::new(2));

    let conn = pool.get().await.expect("get connection");
    pool.release(conn).expect("release");
    assert_eq!(pool.stats().idle(), 1);
    assert_eq!(pool.stats().active(), 0);
}

#[tokio::test]
async fn test_pool_stats() {
    let (pool, _factory) = create_pool(PoolConfig::new(5));

    let stats = pool.stats();
    assert_eq!(stats.total(), 0);
    assert_eq!(stats.capacity(), 5);

    let _conn = pool.get().await.expect("get");
    let stats = pool.stats();
    assert_eq!(stats.total(), 1);
    assert_eq!(stats.idle(), 0);
    assert_eq!(stats.active(), 1);
    assert_eq!(stats.wait_times().total(), 1);
}

#[tokio::test]
async fn test_fail_fast_rejects_when_saturated() {
    let (pool, factory) = create_pool(PoolConfig::new(1).with_policy(OverflowPolicy::FailFast));

    let conn = pool.get().await.expect("first acquire");

    let err = pool.get().await.unwrap_err();
    assert_eq!(err.kind(), PoolErrorKind::Exhausted);
    assert!(err.to_string().contains("capacity: 1"));
    assert_eq!(pool.stats().exhausted(), 1);
    assert_eq!(pool.stats().waiting(), 0);

    drop(conn);
    let _conn = pool.get().await.expect("acquire after release");
    assert_eq!(factory.created(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_block_times_out_at_deadline() {
    let (pool, _factory) = create_pool(PoolConfig::new(1).with_acquire_timeout_ms(100));

    let _conn = pool.get().await.expect("first acquire");

    let started = Instant::now();
    let err = pool.get().await.unwrap_err();
    assert_eq!(err.kind(), PoolErrorKind::Timeout);
    assert!(started.elapsed() >= Duration::from_millis(100));
    match err {
        PoolError::Timeout { waited, .. } => assert!(waited >= Duration::from_millis(100)),
        other => panic!("unexpected error: {other}"),
    }

    let stats = pool.stats();
    assert_eq!(stats.timeouts(), 1);
    assert_eq!(stats.waiting(), 0);
}

#[tokio::test]
async fn test_waiters_are_served_in_arrival_order() {
    let (pool, _factory) = create_pool(PoolConfig::new(1));
    let order = Arc::new(Mutex::new(Vec::new()));

    let held = pool.get().await.expect("first acquire");

    let mut tasks = Vec::new();
    for i in 0..3 {
        let waiter_pool = pool.clone();
        let order = Arc::clone(&order);
        tasks.push(tokio::spawn(async move {
            let _conn = waiter_pool.get().await.expect("queued acquire");
            order.lock().push(i);
        }));
        wait_for_waiters(&pool, i + 1).await;
    }

    drop(held);
    for task in tasks {
        task.await.expect("task");
    }

    assert_eq!(*order.lock(), vec![0, 1, 2]);
    assert_eq!(pool.stats().idle(), 1);
}

#[tokio::test]
async fn test_cancelled_waiter_leaves_no_trace() {
    let (pool, _factory) = create_pool(PoolConfig::new(1));

    let held = pool.get().await.expect("first acquire");

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.get().await.map(|_| ()) })
    };
    wait_for_waiters(&pool, 1).await;

    waiter.abort();
    assert!(waiter.await.unwrap_err().is_cancelled());
    assert_eq!(pool.stats().waiting(), 0);

    drop(held);
    assert_eq!(pool.stats().idle(), 1);
    assert_eq!(pool.stats().active(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_outer_timeout_cancels_waiter() {
    let (pool, _factory) = create_pool(PoolConfig::new(1));

    let held = pool.get().await.expect("first acquire");

    let result = tokio::time::timeout(Duration::from_millis(10), pool.get()).await;
    assert!(result.is_err());
    assert_eq!(pool.stats().waiting(), 0);

    drop(held);
    let _conn = pool.get().await.expect("acquire after release");
}

#[tokio::test]
async fn test_handle_granted_to_cancelled_waiter_returns_to_pool() {
    let (pool, factory) = create_pool(PoolConfig::new(1));

    let held = pool.get().await.expect("first acquire");
    let mut waiter = Box::pin(pool.get());
    assert!(poll!(waiter.as_mut()).is_pending());
    assert_eq!(pool.stats().waiting(), 1);

    // The handle goes straight to the queued waiter, which never sees it
    drop(held);
    assert_eq!(pool.stats().waiting(), 0);
    drop(waiter);

    let stats = pool.stats();
    assert_eq!(stats.idle(), 1);
    assert_eq!(stats.active(), 0);
    assert_eq!(stats.waiting(), 0);
    assert_eq!(factory.destroyed(), 0);

    let conn = pool.get().await.expect("acquire after cancellation");
    assert_eq!(conn.id, 0);
    assert_eq!(factory.created(), 1);
}

#[tokio::test]
async fn test_slot_granted_to_cancelled_waiter_is_released() {
    let (pool, factory) = create_pool(PoolConfig::new(1));

    let _held = pool.get().await.expect("first acquire");
    let mut waiter = Box::pin(pool.get());
    assert!(poll!(waiter.as_mut()).is_pending());

    pool.set_capacity(2);
    assert_eq!(pool.stats().waiting(), 0);
    drop(waiter);

    // A leaked slot would leave no room and fail this checkout
    pool.set_policy(OverflowPolicy::FailFast);
    let conn = pool.get().await.expect("slot was released");
    assert_eq!(conn.id, 1);
    assert_eq!(factory.created(), 2);
    assert_eq!(pool.stats().active(), 2);
}

#[tokio::test]
async fn test_capacity_increase_wakes_exactly_added_waiters() {
    let (pool, factory) = create_pool(PoolConfig::new(1));
    let (tx, mut rx) = mpsc::unbounded_channel();

    let held = pool.get().await.expect("first acquire");

    for i in 0..3 {
        let waiter_pool = pool.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let conn = waiter_pool.get().await.expect("queued acquire");
            let _ = tx.send((i, conn));
        });
        wait_for_waiters(&pool, i + 1).await;
    }

    pool.set_capacity(3);
    assert_eq!(pool.capacity(), 3);

    let (first, _a) = rx.recv().await.expect("first waiter");
    let (second, _b) = rx.recv().await.expect("second waiter");
    assert_eq!((first, second), (0, 1));
    assert_eq!(pool.stats().waiting(), 1);
    assert_eq!(pool.stats().active(), 3);
    assert_eq!(factory.created(), 3);

    drop(held);
    let (third, _c) = rx.recv().await.expect("third waiter");
    assert_eq!(third, 2);
    assert_eq!(factory.created(), 3);
}

#[tokio::test]
async fn test_capacity_decrease_never_revokes_borrowed() {
    let (pool, factory) = create_pool(PoolConfig::new(3));

    let a = pool.get().await.expect("a");
    let b = pool.get().await.expect("b");
    let c = pool.get().await.expect("c");

    pool.set_capacity(1);
    assert_eq!(factory.destroyed(), 0);
    assert_eq!(pool.stats().active(), 3);

    drop(a);
    drop(b);
    assert_eq!(factory.destroyed(), 2);
    assert_eq!(pool.stats().idle(), 0);

    drop(c);
    assert_eq!(factory.destroyed(), 2);
    assert_eq!(pool.stats().idle(), 1);
}

#[tokio::test]
async fn test_capacity_decrease_trims_idle() {
    let (pool, factory) = create_pool(PoolConfig::new(3));

    {
        let _a = pool.get().await.expect("a");
        let _b = pool.get().await.expect("b");
        let _c = pool.get().await.expect("c");
    }
    assert_eq!(pool.stats().idle(), 3);

    pool.set_capacity(1);
    assert_eq!(factory.destroyed(), 2);
    assert_eq!(pool.stats().idle(), 1);
}

#[tokio::test]
async fn test_zero_capacity_blocks_until_raised() {
    let (pool, _factory) = create_pool(PoolConfig::new(0));

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.get().await.map(|conn| conn.id()) })
    };
    wait_for_waiters(&pool, 1).await;

    pool.set_capacity(1);
    assert!(waiter.await.expect("task").is_ok());
}

#[tokio::test]
async fn test_zero_capacity_fails_fast() {
    let (pool, factory) = create_pool(PoolConfig::new(0).with_policy(OverflowPolicy::FailFast));

    let err = pool.get().await.unwrap_err();
    assert_eq!(err.kind(), PoolErrorKind::Exhausted);
    assert_eq!(factory.created(), 0);
}

#[tokio::test]
async fn test_policy_switch_keeps_queued_waiters() {
    let (pool, _factory) = create_pool(PoolConfig::new(1));

    let held = pool.get().await.expect("first acquire");
    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.get().await.map(|_| ()) })
    };
    wait_for_waiters(&pool, 1).await;

    pool.set_policy(OverflowPolicy::FailFast);
    assert_eq!(pool.policy(), OverflowPolicy::FailFast);
    assert_eq!(
        pool.get().await.unwrap_err().kind(),
        PoolErrorKind::Exhausted
    );

    drop(held);
    assert!(waiter.await.expect("task").is_ok());
}

#[tokio::test]
async fn test_connect_failure_frees_slot() {
    let (pool, factory) = create_pool(PoolConfig::new(1).with_policy(OverflowPolicy::FailFast));

    factory.refuse.store(true, Ordering::SeqCst);
    let err = pool.get().await.unwrap_err();
    assert_eq!(err.kind(), PoolErrorKind::ConnectFailed);
    assert!(err.is_transient());
    assert!(err.to_string().contains("mock backend is down"));
    assert_eq!(pool.stats().errors(), 1);
    assert_eq!(pool.stats().total(), 0);

    factory.refuse.store(false, Ordering::SeqCst);
    let _conn = pool.get().await.expect("acquire after recovery");
}

#[tokio::test]
async fn test_broken_connection_is_destroyed() {
    let (pool, factory) = create_pool(PoolConfig::new(1));

    let mut conn = pool.get().await.expect("get");
    conn.mark_broken();
    assert_eq!(conn.state(), HandleState::Broken);
    drop(conn);

    assert_eq!(factory.destroyed(), 1);
    assert_eq!(pool.stats().idle(), 0);

    let conn = pool.get().await.expect("replacement");
    assert_eq!(conn.id, 1);
}

#[tokio::test(start_paused = true)]
async fn test_expired_connection_is_replaced() {
    let (pool, factory) = create_pool(PoolConfig::new(1).with_max_lifetime_ms(1000));

    drop(pool.get().await.expect("get"));
    assert_eq!(pool.stats().idle(), 1);

    tokio::time::advance(Duration::from_secs(2)).await;

    let conn = pool.get().await.expect("replacement");
    assert_eq!(conn.id, 1);
    assert_eq!(factory.destroyed(), 1);
    assert_eq!(pool.stats().total(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_idle_timeout_replaces_stale_connection() {
    let (pool, factory) = create_pool(PoolConfig::new(1).with_idle_timeout_ms(1000));

    drop(pool.get().await.expect("get"));
    tokio::time::advance(Duration::from_millis(500)).await;
    drop(pool.get().await.expect("still fresh"));
    assert_eq!(factory.created(), 1);

    tokio::time::advance(Duration::from_secs(2)).await;
    let _conn = pool.get().await.expect("replacement");
    assert_eq!(factory.created(), 2);
    assert_eq!(factory.destroyed(), 1);
}

#[tokio::test]
async fn test_failed_health_check_replaces_connection() {
    let (pool, factory) = create_pool(PoolConfig::new(1).with_test_on_acquire(true));

    drop(pool.get().await.expect("get"));
    factory.healthy.store(false, Ordering::SeqCst);

    let _conn = pool.get().await.expect("replacement");
    assert_eq!(factory.created(), 2);
    assert_eq!(factory.destroyed(), 1);
}

#[tokio::test]
async fn test_shrink_during_health_check_blocks_replacement() {
    let (pool, factory) = create_pool(
        PoolConfig::new(1)
            .with_policy(OverflowPolicy::FailFast)
            .with_test_on_acquire(true),
    );

    drop(pool.get().await.expect("get"));
    factory.hold_health.store(true, Ordering::SeqCst);
    factory.healthy.store(false, Ordering::SeqCst);

    let mut checking = Box::pin(pool.get());
    assert!(poll!(checking.as_mut()).is_pending());

    pool.set_capacity(0);
    factory.health_gate.notify_one();

    let err = checking.await.expect_err("no room for a replacement");
    assert_eq!(err.kind(), PoolErrorKind::Exhausted);
    assert_eq!(factory.created(), 1);
    assert_eq!(factory.destroyed(), 1);
    assert_eq!(pool.stats().total(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_health_check_keeps_idle_clock() {
    let (pool, factory) = create_pool(
        PoolConfig::new(1)
            .with_idle_timeout_ms(1000)
            .with_test_on_acquire(true),
    );

    drop(pool.get().await.expect("get"));
    tokio::time::advance(Duration::from_millis(900)).await;

    factory.hold_health.store(true, Ordering::SeqCst);
    let mut checking = Box::pin(pool.get());
    assert!(poll!(checking.as_mut()).is_pending());
    drop(checking);
    assert_eq!(pool.stats().idle(), 1);

    factory.hold_health.store(false, Ordering::SeqCst);
    tokio::time::advance(Duration::from_millis(200)).await;

    let conn = pool.get().await.expect("replacement");
    assert_eq!(conn.id, 1);
    assert_eq!(factory.created(), 2);
    assert_eq!(factory.destroyed(), 1);
}

#[tokio::test]
async fn test_close_idle() {
    let (pool, factory) = create_pool(PoolConfig::new(5));

    {
        let _conn1 = pool.get().await.expect("get");
        let _conn2 = pool.get().await.expect("get");
    }
    assert_eq!(pool.stats().idle(), 2);

    assert_eq!(pool.close_idle(), 2);
    assert_eq!(pool.stats().idle(), 0);
    assert_eq!(factory.destroyed(), 2);
}

#[tokio::test]
async fn test_drain_waits_for_borrowed_connections() {
    let (pool, factory) = create_pool(PoolConfig::new(1));

    let held = pool.get().await.expect("first acquire");
    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.get().await.map(|_| ()) })
    };
    wait_for_waiters(&pool, 1).await;

    let drain = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.drain().await })
    };
    while !pool.is_draining() {
        tokio::task::yield_now().await;
    }

    let err = waiter.await.expect("task").unwrap_err();
    assert_eq!(err.kind(), PoolErrorKind::Draining);
    assert_eq!(
        pool.get().await.unwrap_err().kind(),
        PoolErrorKind::Draining
    );

    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert!(!drain.is_finished());

    drop(held);
    drain.await.expect("drain task");
    assert_eq!(factory.destroyed(), 1);
    assert_eq!(pool.stats().total(), 0);

    pool.drain().await;
}

#[tokio::test]
async fn test_slot_granted_before_drain_skips_connect() {
    let (pool, factory) = create_pool(PoolConfig::new(1));

    let held = pool.get().await.expect("first acquire");
    let mut waiter = Box::pin(pool.get());
    assert!(poll!(waiter.as_mut()).is_pending());

    pool.set_capacity(2);
    let mut drain = Box::pin(pool.drain());
    assert!(poll!(drain.as_mut()).is_pending());

    let err = waiter.await.expect_err("pool is draining");
    assert_eq!(err.kind(), PoolErrorKind::Draining);
    assert_eq!(factory.created(), 1);

    drop(held);
    drain.await;
    assert_eq!(factory.destroyed(), 1);
    assert_eq!(pool.stats().total(), 0);
}

#[tokio::test]
async fn test_drain_destroys_idle_connections() {
    let (pool, factory) = create_pool(PoolConfig::new(2));

    {
        let _a = pool.get().await.expect("a");
        let _b = pool.get().await.expect("b");
    }
    pool.drain().await;
    assert_eq!(factory.destroyed(), 2);
    assert_eq!(pool.stats().idle(), 0);
}

#[tokio::test]
async fn test_release_to_wrong_pool_is_rejected() {
    let (origin, _factory) = create_pool(PoolConfig::new(1));
    let (other, _other_factory) = create_pool(PoolConfig::new(1));

    let conn = origin.get().await.expect("get");
    let err = other.release(conn).unwrap_err();
    assert_eq!(err.kind(), PoolErrorKind::InvalidHandle);
    assert!(!err.is_transient());

    assert_eq!(origin.stats().idle(), 1);
    assert_eq!(origin.stats().active(), 0);
    assert_eq!(other.stats().idle(), 0);
}

#[tokio::test]
async fn test_connection_outlives_pool() {
    let (pool, factory) = create_pool(PoolConfig::new(1));

    let conn = pool.get().await.expect("get");
    drop(pool);

    assert!(conn.release().is_ok());
    assert_eq!(factory.destroyed(), 0);
}

#[rstest]
#[case(OverflowPolicy::Block)]
#[case(OverflowPolicy::FailFast)]
#[tokio::test]
async fn test_idle_connection_served_under_either_policy(#[case] policy: OverflowPolicy) {
    let (pool, factory) = create_pool(PoolConfig::new(1).with_policy(policy));

    drop(pool.get().await.expect("get"));
    let _conn = pool.get().await.expect("reuse");
    assert_eq!(factory.created(), 1);
    assert_eq!(pool.stats().acquired(), 2);
}

#[rstest]
#[case(2, 2)]
#[case(5, 3)]
#[tokio::test]
async fn test_never_exceeds_capacity(#[case] capacity: usize, #[case] extra: usize) {
    let (pool, _factory) =
        create_pool(PoolConfig::new(capacity).with_policy(OverflowPolicy::FailFast));

    let mut held = Vec::new();
    for _ in 0..capacity {
        held.push(pool.get().await.expect("within capacity"));
    }
    for _ in 0..extra {
        assert_eq!(
            pool.get().await.unwrap_err().kind(),
            PoolErrorKind::Exhausted
        );
    }
    assert_eq!(pool.stats().total(), capacity);
    assert_eq!(pool.stats().exhausted(), extra as u64);
}
