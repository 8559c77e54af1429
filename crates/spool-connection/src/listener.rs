//! Live reconfiguration of a pool registry

use std::sync::{Arc, Weak};

use spool_core::ConnectionFactory;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::registry::{PoolRegistry, PoolSettings};

/// Background task applying configuration snapshots to a registry
///
/// Snapshots arrive through a [`watch`] channel, so a slow listener never
/// holds up the publisher; it only ever sees the latest value. The task ends
/// when the sender or the registry is dropped, or when the listener itself
/// is dropped.
pub struct ConfigListener {
    task: Option<JoinHandle<()>>,
}

impl ConfigListener {
    /// Start listening, applying the snapshot currently in the channel first
    pub fn spawn<F: ConnectionFactory>(
        registry: &Arc<PoolRegistry<F>>,
        mut updates: watch::Receiver<PoolSettings>,
    ) -> Self {
        let registry = Arc::downgrade(registry);
        let task = tokio::spawn(async move {
            let initial = updates.borrow_and_update().clone();
            if !apply_snapshot(&registry, &initial) {
                return;
            }
            while updates.changed().await.is_ok() {
                let snapshot = updates.borrow_and_update().clone();
                if !apply_snapshot(&registry, &snapshot) {
                    return;
                }
            }
            tracing::debug!("configuration source closed, listener stopping");
        });
        Self { task: Some(task) }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(|task| task.is_finished())
    }

    /// Stop listening and wait for the task to exit
    pub async fn stop(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
    }
}

impl Drop for ConfigListener {
    fn drop(&mut self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

/// Apply one snapshot; false once the registry is gone
fn apply_snapshot<F: ConnectionFactory>(
    registry: &Weak<PoolRegistry<F>>,
    snapshot: &PoolSettings,
) -> bool {
    let Some(registry) = registry.upgrade() else {
        tracing::debug!("pool registry dropped, listener stopping");
        return false;
    };

    if let Err(e) = snapshot.validate() {
        tracing::warn!(error = %e, "ignoring invalid pool settings");
        return true;
    }

    let current = registry.settings();
    if current == *snapshot {
        tracing::debug!("pool settings unchanged");
        return true;
    }

    let mut resized = current;
    resized.connection_pool_size = snapshot.connection_pool_size;
    if resized == *snapshot {
        registry.apply_global_capacity(snapshot.connection_pool_size);
    } else {
        registry.apply_settings(snapshot);
    }
    true
}
