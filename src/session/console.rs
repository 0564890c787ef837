use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use crate::core::{GateError, Result};
use crate::driver::RawConnection;
use crate::registry::{ConnectionRegistry, PoolGuard};

/// Long-lived, manually committed connection backing one tenant's SQL
/// console, plus its dirty flag.
///
/// `dirty` is true exactly when a write has executed on this connection
/// since the last commit/rollback.
pub struct ConsoleSession {
    guard: PoolGuard,
    dirty: bool,
}

type Slot = Option<ConsoleSession>;

/// Owns at most one console session per tenant.
///
/// Each tenant's slot sits behind its own async mutex, so concurrent
/// console calls for the same tenant queue instead of racing on the single
/// physical connection. Different tenants proceed independently.
pub struct ConsoleSessionManager {
    registry: Arc<ConnectionRegistry>,
    sessions: Mutex<HashMap<String, Arc<Mutex<Slot>>>>,
}

impl ConsoleSessionManager {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Exclusive access to the tenant's console session for the duration of
    /// one statement. Creates the session lazily; a session whose
    /// connection no longer answers its ping is replaced with a fresh
    /// checkout (the uncommitted work on it is already lost server-side,
    /// so the dirty flag resets).
    pub async fn acquire(&self, id: &str) -> Result<ConsoleLease> {
        let cell = {
            let mut sessions = self.sessions.lock().await;
            Arc::clone(
                sessions
                    .entry(id.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(None))),
            )
        };
        let mut slot = cell.lock_owned().await;

        let healthy = match slot.as_mut() {
            Some(session) => session.guard.conn().ping().await,
            None => false,
        };

        if !healthy {
            if let Some(stale) = slot.take() {
                info!(id, "console connection went stale, replacing");
                stale.guard.discard().await;
            }
            let Some(pool) = self.registry.resolve(id).await else {
                // Don't leave an empty slot behind for a tenant that was
                // never registered (or is already gone).
                drop(slot);
                self.sessions.lock().await.remove(id);
                return Err(GateError::UnknownTenant(id.to_string()));
            };
            let mut guard = pool.checkout().await?;
            guard
                .conn()
                .set_autocommit(false)
                .await
                .map_err(|e| GateError::Driver(e.to_string()))?;
            debug!(id, "console session created");
            *slot = Some(ConsoleSession { guard, dirty: false });
        }

        Ok(ConsoleLease { slot })
    }

    /// Fresh autocommit connection for a oneshot statement. The caller
    /// returns it to the pool via `release()` (or the guard's drop).
    pub async fn oneshot(&self, id: &str) -> Result<PoolGuard> {
        let pool = self
            .registry
            .resolve(id)
            .await
            .ok_or_else(|| GateError::UnknownTenant(id.to_string()))?;
        let mut guard = pool.checkout().await?;
        if !guard.conn().autocommit() {
            guard
                .conn()
                .set_autocommit(true)
                .await
                .map_err(|e| GateError::Driver(e.to_string()))?;
        }
        Ok(guard)
    }

    /// Whether the tenant's console has uncommitted writes. False when no
    /// console session exists.
    pub async fn is_dirty(&self, id: &str) -> bool {
        let cell = {
            let sessions = self.sessions.lock().await;
            sessions.get(id).cloned()
        };
        match cell {
            Some(cell) => cell.lock().await.as_ref().is_some_and(|s| s.dirty),
            None => false,
        }
    }

    /// Set the dirty flag on an existing console session.
    pub async fn mark_dirty(&self, id: &str, dirty: bool) {
        let cell = {
            let sessions = self.sessions.lock().await;
            sessions.get(id).cloned()
        };
        if let Some(cell) = cell
            && let Some(session) = cell.lock().await.as_mut()
        {
            session.dirty = dirty;
        }
    }

    /// Close the tenant's console session, returning its connection to the
    /// pool. Invoked by disconnect and by an explicit console reset. No-op
    /// when no session exists.
    pub async fn close_console(&self, id: &str) {
        let cell = {
            let mut sessions = self.sessions.lock().await;
            sessions.remove(id)
        };
        if let Some(cell) = cell {
            let mut slot = cell.lock().await;
            if let Some(session) = slot.take() {
                // release() rolls back anything pending and restores
                // autocommit before re-pooling.
                session.guard.release().await;
                info!(id, "console session closed");
            }
        }
    }
}

/// Exclusive lease on one tenant's console session.
///
/// Holding the lease blocks every other console operation for that tenant;
/// drop it as soon as the statement finishes.
pub struct ConsoleLease {
    slot: OwnedMutexGuard<Slot>,
}

impl ConsoleLease {
    fn session(&mut self) -> &mut ConsoleSession {
        self.slot.as_mut().expect("lease always holds a session")
    }

    pub fn conn(&mut self) -> &mut dyn RawConnection {
        self.session().guard.conn()
    }

    pub fn dirty(&self) -> bool {
        self.slot.as_ref().is_some_and(|s| s.dirty)
    }

    pub fn set_dirty(&mut self, dirty: bool) {
        self.session().dirty = dirty;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::fake::FakeDriver;
    use crate::driver::ConnectionProfile;

    async fn setup() -> (FakeDriver, Arc<ConnectionRegistry>, ConsoleSessionManager, String) {
        let driver = FakeDriver::new();
        let registry = Arc::new(ConnectionRegistry::new(Arc::new(driver.clone())));
        let id = registry
            .connect(ConnectionProfile::new("db.local", 5236, "SYSDBA", "SYSDBA001"))
            .await
            .unwrap();
        let consoles = ConsoleSessionManager::new(Arc::clone(&registry));
        (driver, registry, consoles, id)
    }

    #[tokio::test]
    async fn test_console_created_lazily_with_autocommit_off() {
        let (_driver, _reg, consoles, id) = setup().await;

        assert!(!consoles.is_dirty(&id).await);
        let mut lease = consoles.acquire(&id).await.unwrap();
        assert!(!lease.conn().autocommit());
        assert!(!lease.dirty());
    }

    #[tokio::test]
    async fn test_console_is_reused_across_acquires() {
        let (driver, _reg, consoles, id) = setup().await;

        drop(consoles.acquire(&id).await.unwrap());
        let opened = driver.total_opened();
        drop(consoles.acquire(&id).await.unwrap());
        assert_eq!(driver.total_opened(), opened);
    }

    #[tokio::test]
    async fn test_dirty_flag_roundtrip() {
        let (_driver, _reg, consoles, id) = setup().await;

        {
            let mut lease = consoles.acquire(&id).await.unwrap();
            lease.set_dirty(true);
        }
        assert!(consoles.is_dirty(&id).await);

        consoles.mark_dirty(&id, false).await;
        assert!(!consoles.is_dirty(&id).await);
    }

    #[tokio::test]
    async fn test_stale_console_replaced_and_dirty_reset() {
        let (driver, _reg, consoles, id) = setup().await;

        {
            let mut lease = consoles.acquire(&id).await.unwrap();
            lease.set_dirty(true);
        }
        driver.kill_connections();

        let lease = consoles.acquire(&id).await.unwrap();
        assert!(!lease.dirty());
    }

    #[tokio::test]
    async fn test_close_console_is_noop_without_session() {
        let (_driver, _reg, consoles, id) = setup().await;
        consoles.close_console(&id).await;
        assert!(!consoles.is_dirty(&id).await);
    }

    #[tokio::test]
    async fn test_unknown_tenant_is_distinct_error() {
        let (_driver, _reg, consoles, _id) = setup().await;
        assert!(matches!(
            consoles.acquire("missing").await.map(|_| ()),
            Err(GateError::UnknownTenant(_))
        ));
        assert!(matches!(
            consoles.oneshot("missing").await.map(|_| ()),
            Err(GateError::UnknownTenant(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_acquire_leaves_no_session_entry() {
        let (_driver, _reg, consoles, _id) = setup().await;

        for i in 0..20 {
            let ghost = format!("ghost-{i}");
            assert!(matches!(
                consoles.acquire(&ghost).await.map(|_| ()),
                Err(GateError::UnknownTenant(_))
            ));
        }
        assert!(consoles.sessions.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_oneshot_has_autocommit_on() {
        let (_driver, _reg, consoles, id) = setup().await;
        let mut guard = consoles.oneshot(&id).await.unwrap();
        assert!(guard.conn().autocommit());
        guard.release().await;
    }
}
