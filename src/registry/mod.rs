pub mod pool;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{error, info};
use uuid::Uuid;

use crate::core::{Dialect, GateError, Result};
use crate::driver::{ConnectionProfile, Driver, DriverError};
pub use pool::{PoolGuard, TenantPool};

/// One registered tenant database.
pub struct TenantConnection {
    pub id: String,
    pub dialect: Dialect,
    pub pool: Arc<TenantPool>,
    pub created_at: DateTime<Utc>,
}

/// Owns the tenant -> pooled-connection map.
///
/// All methods are safe to call concurrently from arbitrary request tasks.
/// An entry is removed from the map before its pool is torn down, so a
/// `resolve` racing a `disconnect` either gets the live pool or nothing,
/// never a pool mid-teardown. Connections already checked out survive the
/// teardown until their guards return them.
pub struct ConnectionRegistry {
    driver: Arc<dyn Driver>,
    tenants: RwLock<HashMap<String, TenantConnection>>,
}

impl ConnectionRegistry {
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self {
            driver,
            tenants: RwLock::new(HashMap::new()),
        }
    }

    /// Register a tenant database, generating a fresh connection id.
    pub async fn connect(&self, profile: ConnectionProfile) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        self.connect_as(&id, profile).await?;
        Ok(id)
    }

    /// Register a tenant database under a caller-supplied id.
    ///
    /// Reconnecting an existing id is idempotent: the previous pool is
    /// fully torn down before the new one is provisioned.
    pub async fn connect_as(&self, id: &str, profile: ConnectionProfile) -> Result<()> {
        if self.exists(id).await {
            info!(id, "connection id already registered, tearing down old pool");
            self.disconnect(id).await;
        }

        let dialect = profile.dialect;
        let target = profile.display_target();
        info!(id, %target, ?dialect, "provisioning tenant pool");
        let start = Instant::now();

        let pool = TenantPool::provision(Arc::clone(&self.driver), profile)
            .await
            .map_err(|e| {
                error!(id, %target, elapsed_ms = start.elapsed().as_millis() as u64,
                    error = %e, "tenant pool provisioning failed");
                classify_provision_failure(e)
            })?;

        info!(id, elapsed_ms = start.elapsed().as_millis() as u64, "tenant pool ready");

        let mut tenants = self.tenants.write().await;
        tenants.insert(
            id.to_string(),
            TenantConnection {
                id: id.to_string(),
                dialect,
                pool: Arc::new(pool),
                created_at: Utc::now(),
            },
        );
        Ok(())
    }

    /// Remove a tenant and close its pool. No-op for an unknown id.
    ///
    /// The caller is responsible for closing the tenant's console session
    /// first (the gateway facade does this), so the console's connection is
    /// back in the pool before the pool is drained.
    pub async fn disconnect(&self, id: &str) {
        let removed = {
            let mut tenants = self.tenants.write().await;
            tenants.remove(id)
        };
        match removed {
            Some(tenant) => {
                tenant.pool.close_all().await;
                info!(id, "tenant disconnected, pool closed");
            }
            None => info!(id, "disconnect for unknown id ignored"),
        }
    }

    pub async fn exists(&self, id: &str) -> bool {
        self.tenants.read().await.contains_key(id)
    }

    pub async fn tenant_ids(&self) -> Vec<String> {
        self.tenants.read().await.keys().cloned().collect()
    }

    /// Pool for a tenant, or `None` after disconnect.
    pub async fn resolve(&self, id: &str) -> Option<Arc<TenantPool>> {
        self.tenants.read().await.get(id).map(|t| Arc::clone(&t.pool))
    }

    /// Registered dialect for a tenant.
    pub async fn dialect_of(&self, id: &str) -> Option<Dialect> {
        self.tenants.read().await.get(id).map(|t| t.dialect)
    }

    /// Tear down every tenant. Process-exit path.
    pub async fn shutdown(&self) {
        let drained: Vec<TenantConnection> = {
            let mut tenants = self.tenants.write().await;
            tenants.drain().map(|(_, t)| t).collect()
        };
        for tenant in drained {
            tenant.pool.close_all().await;
        }
    }
}

/// Map a provisioning failure onto the gateway taxonomy. A generic error
/// here would hide the difference between "wrong password" and "host down".
fn classify_provision_failure(e: DriverError) -> GateError {
    match e {
        DriverError::Auth(msg) => GateError::AuthRejected(msg),
        DriverError::Timeout(msg) => GateError::ConnectTimeout(msg),
        DriverError::Network(msg) => GateError::Unreachable(msg),
        DriverError::Sql(msg) => GateError::Driver(msg),
        DriverError::Closed => GateError::Driver("connection closed during provisioning".into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::fake::{ConnectFailure, FakeDriver};

    fn profile() -> ConnectionProfile {
        ConnectionProfile::new("db.local", 5236, "SYSDBA", "SYSDBA001").min_idle(2)
    }

    fn registry(driver: &FakeDriver) -> ConnectionRegistry {
        ConnectionRegistry::new(Arc::new(driver.clone()))
    }

    #[tokio::test]
    async fn test_connect_then_resolve() {
        let driver = FakeDriver::new();
        let reg = registry(&driver);

        let id = reg.connect(profile()).await.unwrap();
        assert!(reg.exists(&id).await);
        assert_eq!(reg.dialect_of(&id).await, Some(Dialect::Dm));

        let pool = reg.resolve(&id).await.expect("pool should resolve");
        let guard = pool.checkout().await.unwrap();
        guard.release().await;
    }

    #[tokio::test]
    async fn test_disconnect_releases_everything() {
        let driver = FakeDriver::new();
        let reg = registry(&driver);

        let id = reg.connect(profile()).await.unwrap();
        assert!(driver.open_connections() > 0);

        reg.disconnect(&id).await;
        assert!(!reg.exists(&id).await);
        assert!(reg.resolve(&id).await.is_none());
        assert_eq!(driver.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_unknown_id_is_noop() {
        let driver = FakeDriver::new();
        let reg = registry(&driver);
        reg.disconnect("nope").await;
    }

    #[tokio::test]
    async fn test_reconnect_same_id_tears_down_old_pool() {
        let driver = FakeDriver::new();
        let reg = registry(&driver);

        reg.connect_as("t1", profile()).await.unwrap();
        let first_opened = driver.total_opened();

        reg.connect_as("t1", profile()).await.unwrap();
        assert!(reg.exists("t1").await);
        // Old pool fully closed: only the new pool's warm connections remain.
        assert_eq!(driver.open_connections(), 2);
        assert!(driver.total_opened() > first_opened);
    }

    #[tokio::test]
    async fn test_connect_failure_is_classified_and_leaves_nothing() {
        let driver = FakeDriver::new();
        let reg = registry(&driver);

        driver.refuse_connections(ConnectFailure::Auth);
        match reg.connect_as("t1", profile()).await {
            Err(GateError::AuthRejected(_)) => {}
            other => panic!("expected auth rejection, got {other:?}"),
        }
        assert!(!reg.exists("t1").await);

        driver.refuse_connections(ConnectFailure::Timeout);
        assert!(matches!(
            reg.connect_as("t2", profile()).await,
            Err(GateError::ConnectTimeout(_))
        ));

        driver.refuse_connections(ConnectFailure::Network);
        assert!(matches!(
            reg.connect_as("t3", profile()).await,
            Err(GateError::Unreachable(_))
        ));

        assert_eq!(driver.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_drains_all_tenants() {
        let driver = FakeDriver::new();
        let reg = registry(&driver);

        reg.connect_as("a", profile()).await.unwrap();
        reg.connect_as("b", profile()).await.unwrap();

        reg.shutdown().await;
        assert!(!reg.exists("a").await);
        assert!(!reg.exists("b").await);
        assert_eq!(driver.open_connections(), 0);
    }
}
