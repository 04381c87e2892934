//! Relink Connection - resilient single-connection management
//!
//! This crate wraps exactly one driver connection with:
//!
//! - mutual exclusion, so only one logical operation touches the
//!   underlying handle at a time
//! - continuous health monitoring via periodic pings
//! - automatic reconnection with a fixed retry interval, bounded by a
//!   wall-clock recovery budget
//! - a terminal `broken` state once that budget elapses
//! - transparent queuing of queries issued while the link is down

mod config;
mod events;
mod health;
mod manager;
mod recovery;

#[cfg(test)]
mod tests;

pub use config::ManagerConfig;
pub use events::ConnectionEvent;
pub use manager::ManagedConnection;
