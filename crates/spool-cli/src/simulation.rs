//! Simulated backend and workload driver

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use spool_connection::PoolRegistry;
use spool_core::{ConnectError, ConnectionFactory, Destination, PoolErrorKind};
use tokio::time::{Instant, sleep};

/// An in-memory stand-in for a network connection
#[derive(Debug)]
pub struct SimulatedConnection {
    pub destination: Destination,
    pub serial: u64,
}

/// Factory with configurable connect latency and periodic refusals
pub struct SimulatedFactory {
    connect_latency: Duration,
    fail_every: Option<u64>,
    attempts: AtomicU64,
}

impl SimulatedFactory {
    pub fn new(connect_latency: Duration, fail_every: Option<u64>) -> Self {
        Self {
            connect_latency,
            fail_every: fail_every.filter(|n| *n > 0),
            attempts: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl ConnectionFactory for SimulatedFactory {
    type Connection = SimulatedConnection;

    async fn create(
        &self,
        destination: &Destination,
    ) -> std::result::Result<SimulatedConnection, ConnectError> {
        sleep(self.connect_latency).await;
        let attempt = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
        if self.fail_every.is_some_and(|n| attempt % n == 0) {
            return Err(ConnectError::Refused(format!(
                "simulated refusal on attempt {attempt}"
            )));
        }
        Ok(SimulatedConnection {
            destination: destination.clone(),
            serial: attempt,
        })
    }

    fn destroy(&self, _destination: &Destination, connection: SimulatedConnection) {
        tracing::trace!(
            destination = %connection.destination,
            serial = connection.serial,
            "closing simulated connection"
        );
    }
}

/// Shape of a simulated run
#[derive(Debug, Clone)]
pub struct Workload {
    pub destinations: Vec<Destination>,
    pub tasks: usize,
    pub duration: Duration,
    pub hold: Duration,
    pub acquire_timeout: Duration,
}

/// What the callers of a run experienced
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Outcomes {
    pub acquired: u64,
    pub connect_failed: u64,
    pub timeouts: u64,
    pub exhausted: u64,
    pub draining: u64,
    pub other: u64,
}

impl Outcomes {
    fn record_failure(&mut self, kind: PoolErrorKind) {
        match kind {
            PoolErrorKind::ConnectFailed => self.connect_failed += 1,
            PoolErrorKind::Timeout => self.timeouts += 1,
            PoolErrorKind::Exhausted => self.exhausted += 1,
            PoolErrorKind::Draining => self.draining += 1,
            PoolErrorKind::InvalidHandle | PoolErrorKind::Configuration => self.other += 1,
        }
    }

    fn merge(&mut self, other: &Outcomes) {
        self.acquired += other.acquired;
        self.connect_failed += other.connect_failed;
        self.timeouts += other.timeouts;
        self.exhausted += other.exhausted;
        self.draining += other.draining;
        self.other += other.other;
    }

    pub fn failures(&self) -> u64 {
        self.connect_failed + self.timeouts + self.exhausted + self.draining + self.other
    }
}

/// Run callers against the registry until the workload's duration elapses
///
/// Each task cycles through the destinations, holding every connection it
/// gets for the configured time.
#[tracing::instrument(skip_all, fields(tasks = workload.tasks))]
pub async fn run_workload(
    registry: Arc<PoolRegistry<SimulatedFactory>>,
    workload: &Workload,
) -> Outcomes {
    if workload.destinations.is_empty() {
        return Outcomes::default();
    }

    let destinations: Arc<[Destination]> = workload.destinations.clone().into();
    let end = Instant::now() + workload.duration;

    let tasks = (0..workload.tasks).map(|task| {
        let registry = Arc::clone(&registry);
        let destinations = Arc::clone(&destinations);
        let hold = workload.hold;
        let acquire_timeout = workload.acquire_timeout;
        tokio::spawn(async move {
            let mut outcomes = Outcomes::default();
            let mut next = task;
            while Instant::now() < end {
                let destination = &destinations[next % destinations.len()];
                next += 1;
                match registry
                    .acquire(destination, Instant::now() + acquire_timeout)
                    .await
                {
                    Ok(conn) => {
                        outcomes.acquired += 1;
                        sleep(hold).await;
                        drop(conn);
                    }
                    Err(e) => {
                        tracing::debug!(task, error = %e, "simulated caller failed");
                        outcomes.record_failure(e.kind());
                        // Exhaustion returns immediately; don't spin
                        sleep(Duration::from_millis(1)).await;
                    }
                }
            }
            outcomes
        })
    });

    let mut total = Outcomes::default();
    for result in futures::future::join_all(tasks).await {
        match result {
            Ok(outcomes) => total.merge(&outcomes),
            Err(e) => tracing::error!(error = %e, "simulated caller panicked"),
        }
    }
    total
}
