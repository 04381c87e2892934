//! The managed connection: exclusion gate, lifecycle, and query queuing

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex as SyncMutex;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use uuid::Uuid;

use relink_core::{ConnectParams, Connection, Driver, QueryResult, RelinkError, Result, Value};

use crate::config::ManagerConfig;
use crate::events::{self, ConnectionEvent};

/// Query used to verify liveness right after connecting
const VERIFY_QUERY: &str = "SELECT 1";

/// Exclusive slot for the connection handle.
///
/// The `tokio::sync::Mutex` around it is the exclusion gate: locking is
/// acquire, dropping the guard is release, and tokio's FIFO wakeup gives
/// every waiter a bounded wait. The handle is never reachable outside a
/// held guard.
pub(crate) struct Slot {
    pub(crate) handle: Option<Arc<dyn Connection>>,
}

/// A single driver connection kept usable across failures.
///
/// Wraps one connection opened through a [`Driver`] and keeps it healthy:
/// periodic pings while connected, an automatic reconnect loop when a ping
/// fails, and a terminal broken state if reconnection does not succeed
/// within the recovery budget. Queries issued while the link is down are
/// suspended and transparently re-run once it is back.
///
/// Once broken, the manager stays broken; discard it and construct a new
/// one.
///
/// # Example
///
/// ```ignore
/// use relink_connection::{ManagedConnection, ManagerConfig};
///
/// let manager = ManagedConnection::new(driver, params, ManagerConfig::default());
/// manager.open().await?;
/// let rows = manager.query("SELECT id FROM jobs WHERE state = ?", &[state]).await?;
/// ```
pub struct ManagedConnection {
    pub(crate) id: Uuid,
    /// Self-reference handed to timer tasks so they never keep the
    /// manager alive
    pub(crate) weak_self: Weak<Self>,
    pub(crate) driver: Arc<dyn Driver>,
    pub(crate) params: ConnectParams,
    pub(crate) config: ManagerConfig,

    /// The exclusion gate over the connection handle
    pub(crate) slot: Mutex<Slot>,
    /// Fast-path flag for query routing; authoritative writes happen
    /// under the gate
    pub(crate) connected: AtomicBool,
    /// Forward-only terminal flag, written without the gate by the
    /// recovery-budget timer
    pub(crate) broken: AtomicBool,

    pub(crate) events: broadcast::Sender<ConnectionEvent>,
    /// At most one health monitor task at a time
    pub(crate) health_task: SyncMutex<Option<JoinHandle<()>>>,
    /// At most one recovery-budget timer at a time
    pub(crate) budget_task: SyncMutex<Option<JoinHandle<()>>>,
}

impl ManagedConnection {
    /// Create a manager for the given driver and parameters.
    ///
    /// The connection is not opened yet; call [`open`](Self::open).
    pub fn new(
        driver: Arc<dyn Driver>,
        params: ConnectParams,
        config: ManagerConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            id: Uuid::new_v4(),
            weak_self: weak_self.clone(),
            driver,
            params,
            config,
            slot: Mutex::new(Slot { handle: None }),
            connected: AtomicBool::new(false),
            broken: AtomicBool::new(false),
            events: events::channel(),
            health_task: SyncMutex::new(None),
            budget_task: SyncMutex::new(None),
        })
    }

    /// Create a manager with the default timing configuration.
    pub fn with_defaults(driver: Arc<dyn Driver>, params: ConnectParams) -> Arc<Self> {
        Self::new(driver, params, ManagerConfig::default())
    }

    /// Unique identifier of this manager instance.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Whether the underlying connection is currently usable.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Whether the manager has reached its terminal state.
    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::SeqCst)
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    /// Format a query string by substituting placeholders.
    ///
    /// Stateless pass-through to [`relink_core::format_query`]; no
    /// connection is involved.
    pub fn format(sql: &str, params: &[Value]) -> String {
        relink_core::format_query(sql, params)
    }

    pub(crate) fn emit(&self, event: ConnectionEvent) {
        tracing::debug!(connection_id = %self.id, event = ?event, "lifecycle event");
        // Fire-and-forget: a send error just means nobody is listening
        let _ = self.events.send(event);
    }

    /// Open the connection and start health monitoring.
    ///
    /// Connects through the driver, verifies liveness with a trivial
    /// round trip, then marks the manager connected and emits
    /// [`ConnectionEvent::Connected`]. On failure the health monitor is
    /// stopped, [`ConnectionEvent::Disconnected`] is emitted, and the
    /// driver error propagates.
    #[tracing::instrument(skip(self), fields(connection_id = %self.id, driver = %self.driver.name()))]
    pub async fn open(&self) -> Result<()> {
        if self.is_broken() {
            tracing::debug!("open refused, manager is broken");
            return Err(RelinkError::Broken);
        }

        let mut slot = self.slot.lock().await;

        // Replace any previous handle rather than leaking it
        if let Some(old) = slot.handle.take() {
            let _ = old.close().await;
        }

        let attempt = async {
            let handle = self.driver.connect(&self.params).await?;
            handle.query(VERIFY_QUERY, &[]).await?;
            Ok::<_, RelinkError>(handle)
        }
        .await;

        match attempt {
            Ok(handle) if !self.is_broken() => {
                slot.handle = Some(handle);
                self.restart_health_monitor();
                self.connected.store(true, Ordering::SeqCst);
                tracing::info!("connection established");
                self.emit(ConnectionEvent::Connected);
                Ok(())
            }
            outcome => {
                // Connect/verify failed, or the recovery budget expired
                // while the attempt was in flight
                let err = match outcome {
                    Ok(handle) => {
                        let _ = handle.close().await;
                        RelinkError::Broken
                    }
                    Err(e) => e,
                };
                self.stop_health_monitor();
                self.connected.store(false, Ordering::SeqCst);
                tracing::debug!(error = %err, "open failed");
                self.emit(ConnectionEvent::Disconnected);
                Err(err)
            }
        }
        // Gate released here on every path
    }

    /// Close the connection intentionally.
    ///
    /// Disconnection is announced before the network close completes so
    /// waiters observe it promptly even when closing is slow. An
    /// intentional close never triggers recovery.
    #[tracing::instrument(skip(self), fields(connection_id = %self.id))]
    pub async fn close(&self) -> Result<()> {
        if self.is_broken() {
            tracing::debug!("close refused, manager is broken");
            return Err(RelinkError::Broken);
        }

        let mut slot = self.slot.lock().await;

        self.stop_health_monitor();
        self.connected.store(false, Ordering::SeqCst);
        self.emit(ConnectionEvent::Disconnected);

        if let Some(handle) = slot.handle.take() {
            handle.close().await?;
        }

        if self.is_broken() {
            // The budget timer fired while the close was in flight; the
            // close itself succeeded but the manager is done for
            tracing::debug!("close succeeded but manager broke meanwhile");
            return Err(RelinkError::Broken);
        }

        tracing::debug!("connection closed");
        Ok(())
    }

    /// Run a query, waiting out any reconnect in progress.
    ///
    /// While connected the query is forwarded under the gate and its
    /// result or error returned as-is; a failing query does not trigger
    /// recovery (only pings do). While disconnected the caller suspends,
    /// without holding the gate, until the connection comes back (the
    /// query then re-runs from the top) or the manager breaks
    /// ([`RelinkError::ConnectionLost`]).
    #[tracing::instrument(skip(self, params), fields(connection_id = %self.id))]
    pub async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        loop {
            if self.is_broken() {
                tracing::debug!("query refused, manager is broken");
                return Err(RelinkError::ConnectionLost);
            }

            if self.is_connected() {
                let slot = self.slot.lock().await;
                if let Some(handle) = slot.handle.as_ref() {
                    tracing::debug!("query started");
                    return handle.query(sql, params).await;
                }
                // The connected flag raced with a teardown; wait below
                drop(slot);
            }

            tracing::debug!("query paused, waiting for connection");
            let mut events = self.events.subscribe();
            // Re-check after subscribing so a notification sent between
            // the checks above and the subscription is not lost
            if self.is_broken() {
                return Err(RelinkError::ConnectionLost);
            }
            if self.is_connected() {
                continue;
            }
            loop {
                match events.recv().await {
                    Ok(ConnectionEvent::Connected) => break,
                    Ok(ConnectionEvent::Broken(reason)) => {
                        tracing::debug!(reason = %reason, "query abandoned, manager broke while queued");
                        return Err(RelinkError::ConnectionLost);
                    }
                    Ok(ConnectionEvent::Disconnected) => continue,
                    // Lagged or closed: re-check state from the top
                    Err(_) => break,
                }
            }
        }
    }
}

impl Drop for ManagedConnection {
    fn drop(&mut self) {
        if let Some(task) = self.health_task.get_mut().take() {
            task.abort();
        }
        if let Some(task) = self.budget_task.get_mut().take() {
            task.abort();
        }
    }
}
