//! Connection and driver traits

use crate::{ConnectParams, QueryResult, Result, Value};
use async_trait::async_trait;
use std::sync::Arc;

/// A live database connection.
///
/// Implementations are not required to be safe for concurrent use; the
/// manager serializes all access through its exclusion gate. Every method
/// eventually settles with success or failure, and no timeout is imposed
/// here: a hang in the primitive stalls the calling operation.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Get the driver name (e.g., "mysql", "postgres")
    fn driver_name(&self) -> &str;

    /// Liveness probe: a minimal round trip against the server
    async fn ping(&self) -> Result<()>;

    /// Execute a query and collect its rows
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult>;

    /// Close the connection
    async fn close(&self) -> Result<()>;

    /// Check if the connection is closed
    fn is_closed(&self) -> bool {
        false
    }
}

/// A connection primitive that can open new connections.
///
/// The manager recreates connections through this trait during recovery,
/// passing its `ConnectParams` through unmodified.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Unique identifier for this driver (e.g., "mysql", "postgres")
    fn name(&self) -> &'static str;

    /// Open a new connection
    async fn connect(&self, params: &ConnectParams) -> Result<Arc<dyn Connection>>;
}

#[async_trait]
impl<T: Driver> Driver for Arc<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    async fn connect(&self, params: &ConnectParams) -> Result<Arc<dyn Connection>> {
        (**self).connect(params).await
    }
}
