use std::time::Duration;

use crate::core::Dialect;

/// Connection profile for one tenant database.
///
/// Supplied per connect request and held only in memory; nothing here is
/// persisted across restarts. Timeout defaults mirror what the engines
/// tolerate before a stuck socket starts hurting interactive callers.
#[derive(Debug, Clone)]
pub struct ConnectionProfile {
    /// Database host.
    pub host: String,

    /// Database port.
    pub port: u16,

    /// Username for authentication.
    pub username: String,

    /// Password for authentication.
    pub password: String,

    /// Target dialect.
    pub dialect: Dialect,

    /// Service name (Oracle-compatible mode only).
    pub service_name: Option<String>,

    /// Timeout for establishing one physical connection.
    pub connect_timeout: Duration,

    /// Socket-level read timeout, passed down to the driver.
    pub read_timeout: Duration,

    /// Wait limit when checking a connection out of the pool.
    pub checkout_timeout: Duration,

    /// Budget for the liveness probe on an idle connection.
    pub validation_timeout: Duration,

    /// Idle connections older than this are discarded on checkout.
    pub idle_timeout: Duration,

    /// Upper bound on physical connections per tenant.
    pub max_connections: usize,

    /// Connections kept warm after provisioning.
    pub min_idle: usize,
}

impl ConnectionProfile {
    pub fn new(host: &str, port: u16, username: &str, password: &str) -> Self {
        Self {
            host: host.to_string(),
            port,
            username: username.to_string(),
            password: password.to_string(),
            dialect: Dialect::Dm,
            service_name: None,
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(10),
            checkout_timeout: Duration::from_secs(5),
            validation_timeout: Duration::from_secs(3),
            idle_timeout: Duration::from_secs(600),
            max_connections: 10,
            min_idle: 2,
        }
    }

    /// Set the dialect.
    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    /// Set the service name (Oracle-compatible mode).
    pub fn service_name(mut self, name: &str) -> Self {
        self.service_name = Some(name.to_string());
        self
    }

    /// Set the physical connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the pool checkout wait limit.
    pub fn checkout_timeout(mut self, timeout: Duration) -> Self {
        self.checkout_timeout = timeout;
        self
    }

    /// Set the idle discard threshold.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the pool ceiling.
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the warm-connection floor.
    pub fn min_idle(mut self, min: usize) -> Self {
        self.min_idle = min;
        self
    }

    /// Validate the profile before provisioning a pool from it.
    pub fn validate(&self) -> Result<(), String> {
        if self.host.is_empty() {
            return Err("host cannot be empty".to_string());
        }
        if self.username.is_empty() {
            return Err("username cannot be empty".to_string());
        }
        if self.max_connections == 0 {
            return Err("max_connections must be > 0".to_string());
        }
        if self.min_idle > self.max_connections {
            return Err("min_idle cannot exceed max_connections".to_string());
        }
        if self.dialect == Dialect::Oracle && self.service_name.is_none() {
            return Err("Oracle-compatible connections require a service name".to_string());
        }
        Ok(())
    }

    /// Connect target for logging, password elided.
    pub fn display_target(&self) -> String {
        match (&self.dialect, &self.service_name) {
            (Dialect::Oracle, Some(svc)) => format!("{}:{}/{}", self.host, self.port, svc),
            _ => format!("{}:{}", self.host, self.port),
        }
    }
}
