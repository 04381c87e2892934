//! Relink Core - Core abstractions for the resilient connection manager
//!
//! This crate provides the fundamental traits and types shared between
//! database drivers and the connection manager. It defines:
//!
//! - `Driver` - Trait for connection primitives (connect)
//! - `Connection` - Trait for live connections (ping, query, close)
//! - `ConnectParams` - Opaque connection configuration
//! - Common types like `Value`, `Row`, `QueryResult`
//! - Stateless query-string formatting

mod connection;
mod error;
mod format;
mod params;
mod types;

pub use connection::*;
pub use error::*;
pub use format::*;
pub use params::*;
pub use types::*;
