//! Periodic health monitoring
//!
//! One monitor task runs while the connection is healthy. Each cycle it
//! sleeps for the ping interval, then probes the handle under the gate.
//! A failed probe hands off to the recovery controller and leaves the
//! monitor dormant until the next successful open restarts it.

use std::time::Instant;

use relink_core::RelinkError;

use crate::manager::ManagedConnection;

impl ManagedConnection {
    /// Stop any running monitor and start a fresh one.
    ///
    /// Starting always replaces the previous instance; monitor tasks
    /// never stack.
    pub(crate) fn restart_health_monitor(&self) {
        self.stop_health_monitor();

        // The task holds only a weak reference so a dropped manager
        // stops monitoring on its own
        let weak = self.weak_self.clone();
        let interval = self.config.ping_interval;
        let task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(manager) = weak.upgrade() else {
                    return;
                };
                if !manager.health_tick().await {
                    return;
                }
            }
        });
        *self.health_task.lock() = Some(task);
    }

    pub(crate) fn stop_health_monitor(&self) {
        if let Some(task) = self.health_task.lock().take() {
            task.abort();
        }
    }

    /// One monitor cycle. Returns false when the monitor should go
    /// dormant.
    async fn health_tick(&self) -> bool {
        if self.is_broken() {
            tracing::debug!(connection_id = %self.id, "ping skipped, manager is broken");
            return false;
        }

        let started = Instant::now();
        let slot = self.slot.lock().await;
        let outcome = match slot.handle.as_ref() {
            Some(handle) => handle.ping().await,
            None => Err(RelinkError::Connection("no open connection handle".into())),
        };
        drop(slot);

        match outcome {
            Ok(()) => {
                if self.is_broken() {
                    tracing::debug!(connection_id = %self.id, "ping succeeded but manager is broken");
                    return false;
                }
                tracing::trace!(
                    connection_id = %self.id,
                    latency_ms = started.elapsed().as_millis() as u64,
                    "ping ok"
                );
                true
            }
            Err(e) => {
                if self.is_broken() {
                    tracing::debug!(connection_id = %self.id, error = %e, "ping failed but manager is broken");
                    return false;
                }
                tracing::warn!(connection_id = %self.id, error = %e, "ping failed, starting recovery");
                if let Some(manager) = self.weak_self.upgrade() {
                    tokio::spawn(async move {
                        manager.recover().await;
                    });
                }
                false
            }
        }
    }
}
