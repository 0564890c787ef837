pub mod fake;
pub mod profile;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::ResultSet;
pub use profile::ConnectionProfile;

/// Failure reported by a database driver.
///
/// Drivers classify at the source so the registry can map provisioning
/// failures onto the gateway taxonomy without string matching.
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("network failure: {0}")]
    Network(String),

    /// Vendor SQL error, message passed through verbatim.
    #[error("{0}")]
    Sql(String),

    #[error("connection is closed")]
    Closed,
}

pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// What one executed statement produced.
#[derive(Debug)]
pub enum RawOutcome {
    Rows(ResultSet),
    Count(u64),
}

/// Factory for physical connections to one engine family.
///
/// Exactly one driver instance is injected per process; the profile carries
/// the per-tenant host, credentials and dialect.
#[async_trait]
pub trait Driver: Send + Sync {
    async fn open(&self, profile: &ConnectionProfile) -> DriverResult<Box<dyn RawConnection>>;
}

/// One physical database connection.
///
/// Implementations are not required to be thread-safe; the pool and the
/// console manager guarantee exclusive access while a statement runs.
#[async_trait]
pub trait RawConnection: Send {
    /// Execute a single cleaned statement.
    ///
    /// `max_rows` bounds how many rows the driver materializes for a query
    /// (0 means unbounded). Drivers must stop fetching at the bound rather
    /// than truncating a fully loaded result.
    async fn execute(&mut self, sql: &str, max_rows: usize) -> DriverResult<RawOutcome>;

    async fn set_autocommit(&mut self, enabled: bool) -> DriverResult<()>;

    fn autocommit(&self) -> bool;

    async fn commit(&mut self) -> DriverResult<()>;

    async fn rollback(&mut self) -> DriverResult<()>;

    /// Cheap liveness probe. A `false` means the connection must be
    /// discarded, never reused.
    async fn ping(&mut self) -> bool;

    /// Close the physical connection. Idempotent.
    async fn close(&mut self);

    fn is_closed(&self) -> bool;
}
