use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::warn;

use crate::core::{GateError, Result};
use crate::driver::{ConnectionProfile, Driver, DriverError, RawConnection};

/// Bounded pool of physical connections for one tenant.
///
/// Checkout prefers idle connections (discarding ones that idled too long
/// or fail their liveness probe), opens new ones under the ceiling, and
/// otherwise waits up to the checkout timeout. `close_all` flips the pool
/// into a closed state: idle connections are closed immediately and late
/// returns are closed instead of re-pooled, so a teardown racing a checkout
/// can never resurrect the pool.
pub struct TenantPool {
    profile: ConnectionProfile,
    driver: Arc<dyn Driver>,
    idle: Mutex<VecDeque<IdleConn>>,
    total: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
}

struct IdleConn {
    conn: Box<dyn RawConnection>,
    since: Instant,
}

impl TenantPool {
    /// Open a pool: validate the profile, run one trial connection to fail
    /// fast on bad credentials or an unreachable host, then warm up
    /// `min_idle` connections.
    pub async fn provision(
        driver: Arc<dyn Driver>,
        profile: ConnectionProfile,
    ) -> std::result::Result<Self, DriverError> {
        if let Err(msg) = profile.validate() {
            return Err(DriverError::Network(msg));
        }

        // Trial connection: open, probe, close. Nothing is retained on
        // failure.
        let mut trial = open_with_timeout(&*driver, &profile).await?;
        let alive = trial.ping().await;
        trial.close().await;
        if !alive {
            return Err(DriverError::Network(
                "trial connection failed validation".to_string(),
            ));
        }

        let pool = Self {
            driver,
            idle: Mutex::new(VecDeque::new()),
            total: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicBool::new(false)),
            profile,
        };

        pool.warm_up().await?;
        Ok(pool)
    }

    async fn warm_up(&self) -> std::result::Result<(), DriverError> {
        let mut idle = self.idle.lock().await;
        while self.total.load(Ordering::SeqCst) < self.profile.min_idle {
            let conn = open_with_timeout(&*self.driver, &self.profile).await?;
            idle.push_back(IdleConn {
                conn,
                since: Instant::now(),
            });
            self.total.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    /// Check a connection out of the pool.
    pub async fn checkout(self: &Arc<Self>) -> Result<PoolGuard> {
        let start = Instant::now();

        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(GateError::PoolClosed);
            }

            if let Some(conn) = self.try_take_idle().await {
                return Ok(PoolGuard {
                    conn: Some(conn),
                    pool: Arc::clone(self),
                });
            }

            if let Some(conn) = self.try_open().await? {
                return Ok(PoolGuard {
                    conn: Some(conn),
                    pool: Arc::clone(self),
                });
            }

            if start.elapsed() > self.profile.checkout_timeout {
                return Err(GateError::PoolTimeout(format!(
                    "no connection became available within {:?}",
                    self.profile.checkout_timeout
                )));
            }

            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Pop an idle connection, discarding stale or dead ones on the way.
    async fn try_take_idle(&self) -> Option<Box<dyn RawConnection>> {
        let mut idle = self.idle.lock().await;
        while let Some(mut candidate) = idle.pop_front() {
            if candidate.since.elapsed() > self.profile.idle_timeout {
                candidate.conn.close().await;
                self.total.fetch_sub(1, Ordering::SeqCst);
                continue;
            }
            let probe = tokio::time::timeout(self.profile.validation_timeout, candidate.conn.ping());
            match probe.await {
                Ok(true) => return Some(candidate.conn),
                _ => {
                    candidate.conn.close().await;
                    self.total.fetch_sub(1, Ordering::SeqCst);
                }
            }
        }
        None
    }

    /// Open a new connection if under the ceiling.
    async fn try_open(&self) -> Result<Option<Box<dyn RawConnection>>> {
        if self.total.load(Ordering::SeqCst) >= self.profile.max_connections {
            return Ok(None);
        }
        let conn = open_with_timeout(&*self.driver, &self.profile)
            .await
            .map_err(|e| GateError::Driver(e.to_string()))?;
        self.total.fetch_add(1, Ordering::SeqCst);
        Ok(Some(conn))
    }

    /// Return a connection to the pool, or close it if the pool shut down
    /// or the connection itself died.
    async fn give_back(&self, mut conn: Box<dyn RawConnection>) {
        if self.closed.load(Ordering::SeqCst) || conn.is_closed() {
            conn.close().await;
            self.total.fetch_sub(1, Ordering::SeqCst);
            return;
        }
        let mut idle = self.idle.lock().await;
        idle.push_back(IdleConn {
            conn,
            since: Instant::now(),
        });
    }

    /// Tear the pool down: no new checkouts, idle connections closed now.
    /// Connections already checked out are closed when their guards return.
    pub async fn close_all(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let mut idle = self.idle.lock().await;
        while let Some(mut candidate) = idle.pop_front() {
            candidate.conn.close().await;
            self.total.fetch_sub(1, Ordering::SeqCst);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Physical connections currently owned by the pool (idle + checked out).
    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    pub fn profile(&self) -> &ConnectionProfile {
        &self.profile
    }
}

async fn open_with_timeout(
    driver: &dyn Driver,
    profile: &ConnectionProfile,
) -> std::result::Result<Box<dyn RawConnection>, DriverError> {
    match tokio::time::timeout(profile.connect_timeout, driver.open(profile)).await {
        Ok(result) => result,
        Err(_) => Err(DriverError::Timeout(format!(
            "no connection to {} within {:?}",
            profile.display_target(),
            profile.connect_timeout
        ))),
    }
}

/// RAII guard for a checked-out connection.
///
/// Prefer `release().await`; the `Drop` fallback cannot run async teardown
/// and has to decrement the pool count if the idle queue is contended.
pub struct PoolGuard {
    conn: Option<Box<dyn RawConnection>>,
    pool: Arc<TenantPool>,
}

impl PoolGuard {
    pub fn conn(&mut self) -> &mut dyn RawConnection {
        self.conn
            .as_deref_mut()
            .expect("connection already released")
    }

    /// Return the connection to the pool, rolling back any open manual
    /// transaction first so the next borrower starts clean.
    pub async fn release(mut self) {
        if let Some(mut conn) = self.conn.take() {
            if !conn.autocommit() && !conn.is_closed() {
                let _ = conn.rollback().await;
                let _ = conn.set_autocommit(true).await;
            }
            self.pool.give_back(conn).await;
        }
    }

    /// Close the underlying connection instead of re-pooling it.
    pub async fn discard(mut self) {
        if let Some(mut conn) = self.conn.take() {
            conn.close().await;
            self.pool.total.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for PoolGuard {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if self.pool.is_closed() || conn.is_closed() {
                self.pool.total.fetch_sub(1, Ordering::SeqCst);
                return;
            }
            // No async in Drop: re-pool only if the idle queue is free.
            match self.pool.idle.try_lock() {
                Ok(mut idle) => idle.push_back(IdleConn {
                    conn,
                    since: Instant::now(),
                }),
                Err(_) => {
                    warn!("pool guard dropped while idle queue busy; connection discarded");
                    self.pool.total.fetch_sub(1, Ordering::SeqCst);
                }
            }
        }
    }
}
