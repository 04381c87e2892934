//! Manager timing configuration

use std::time::Duration;

/// Timing configuration for a managed connection.
///
/// All durations are fixed at construction; the manager exposes no
/// caller-driven timeouts.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Interval between liveness pings while connected
    pub ping_interval: Duration,
    /// Delay between reconnect attempts during recovery
    pub retry_interval: Duration,
    /// Wall-clock budget from the first detected problem until the
    /// manager is declared broken
    pub recovery_budget: Duration,
}

impl ManagerConfig {
    /// Create a configuration with the default timings.
    pub fn new() -> Self {
        Self {
            ping_interval: Duration::from_millis(500),
            retry_interval: Duration::from_secs(2),
            recovery_budget: Duration::from_secs(60),
        }
    }

    /// Set the ping interval.
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Set the reconnect retry interval.
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Set the recovery budget.
    pub fn with_recovery_budget(mut self, budget: Duration) -> Self {
        self.recovery_budget = budget;
        self
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self::new()
    }
}
