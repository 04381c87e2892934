//! Reconnect loop bounded by a wall-clock recovery budget
//!
//! Recovery never surfaces errors to callers. Its only externally
//! visible outcome is either a `Connected` event when the link is
//! restored, or a single `Broken` event when the budget elapses first.

use std::sync::atomic::Ordering;

use crate::events::ConnectionEvent;
use crate::manager::ManagedConnection;

impl ManagedConnection {
    /// Reconnect until the link is restored or the manager breaks.
    ///
    /// Triggered by the health monitor when a ping fails; may also be
    /// called directly to force a reconnect cycle. Each attempt tears
    /// the old connection down best-effort, reopens, and on failure
    /// sleeps for the retry interval. The loop observes `broken` at the
    /// top of every iteration and terminates once the budget timer has
    /// fired.
    pub async fn recover(&self) {
        loop {
            if self.is_broken() {
                tracing::debug!(connection_id = %self.id, "recovery stopped, manager is broken");
                return;
            }

            self.arm_recovery_budget();

            if let Err(e) = self.close().await {
                tracing::debug!(connection_id = %self.id, error = %e, "teardown during recovery failed");
            }

            match self.open().await {
                Ok(()) => {
                    self.disarm_recovery_budget();
                    tracing::info!(connection_id = %self.id, "connection restored");
                    return;
                }
                Err(e) => {
                    tracing::debug!(connection_id = %self.id, error = %e, "reconnect attempt failed, retrying");
                    tokio::time::sleep(self.config.retry_interval).await;
                }
            }
        }
    }

    /// Arm the recovery-budget timer if it is not already running.
    ///
    /// The deadline is measured from the first detected problem;
    /// re-entry within the same recovery cycle never resets it.
    fn arm_recovery_budget(&self) {
        let mut task = self.budget_task.lock();
        if task.is_some() {
            tracing::debug!(connection_id = %self.id, "recovery budget already armed");
            return;
        }

        let weak = self.weak_self.clone();
        let budget = self.config.recovery_budget;
        *task = Some(tokio::spawn(async move {
            tokio::time::sleep(budget).await;
            if let Some(manager) = weak.upgrade() {
                manager.mark_broken();
            }
        }));
        tracing::debug!(
            connection_id = %self.id,
            budget_ms = budget.as_millis() as u64,
            "recovery budget armed"
        );
    }

    fn disarm_recovery_budget(&self) {
        if let Some(task) = self.budget_task.lock().take() {
            task.abort();
        }
    }

    /// The single irreversible transition.
    ///
    /// Safe to run without the gate: the flag only flips forward and
    /// every operation re-checks it at its next step. Idempotent; only
    /// the first call emits the `Broken` event.
    pub(crate) fn mark_broken(&self) {
        if self.broken.swap(true, Ordering::SeqCst) {
            return;
        }

        self.connected.store(false, Ordering::SeqCst);
        self.stop_health_monitor();
        // The budget timer that got us here finishes on its own
        self.budget_task.lock().take();

        tracing::error!(connection_id = %self.id, "recovery budget elapsed, connection manager is broken");
        self.emit(ConnectionEvent::Broken(
            "recovery budget elapsed before the connection could be restored".to_string(),
        ));
    }
}
