//! Lifecycle events
//!
//! The manager fans out its lifecycle notifications over a bounded
//! broadcast channel. Queued queries subscribe while waiting for the
//! connection to come back; external observers may subscribe as well.

use tokio::sync::broadcast;

/// Capacity of the lifecycle event channel.
///
/// Waiters re-check manager state whenever they lag, so a small buffer
/// is sufficient even with many subscribers.
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Observable lifecycle notification.
///
/// These three signals are the whole externally visible contract;
/// health-check and recovery internals never surface directly.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// The connection was established and verified usable
    Connected,
    /// The connection is down, either intentionally closed or lost
    Disconnected,
    /// Terminal: recovery did not succeed within its budget
    Broken(String),
}

impl ConnectionEvent {
    /// Whether this event marks the terminal state.
    pub fn is_broken(&self) -> bool {
        matches!(self, ConnectionEvent::Broken(_))
    }
}

pub(crate) fn channel() -> broadcast::Sender<ConnectionEvent> {
    broadcast::channel(EVENT_CHANNEL_CAPACITY).0
}
