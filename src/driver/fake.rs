//! Scripted in-memory driver.
//!
//! Stands in for a live engine in the test suites: statements are answered
//! from a canned script, writes are tracked through commit/rollback, and
//! open/close counters support leak assertions. Not a SQL engine: lookups
//! are by exact statement text, with a permissive default for anything
//! unscripted.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::core::ResultSet;
use crate::driver::{ConnectionProfile, Driver, DriverError, DriverResult, RawConnection, RawOutcome};

/// Canned answer for one statement.
#[derive(Debug, Clone)]
pub enum Canned {
    Rows(ResultSet),
    Count(u64),
    Fail(String),
}

/// How scripted connection attempts should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectFailure {
    Auth,
    Timeout,
    Network,
}

#[derive(Default)]
struct FakeState {
    scripts: Mutex<HashMap<String, Canned>>,
    connect_failure: Mutex<Option<ConnectFailure>>,
    opened: AtomicUsize,
    closed: AtomicUsize,
    /// Bumped by `kill_connections`; stale generations fail their ping.
    generation: AtomicUsize,
    committed: Mutex<Vec<String>>,
}

/// Shared scripted driver; clones observe the same state.
#[derive(Clone, Default)]
pub struct FakeDriver {
    state: Arc<FakeState>,
}

impl FakeDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script an answer for an exact statement text.
    pub fn script(&self, sql: &str, outcome: Canned) {
        self.state
            .scripts
            .lock()
            .unwrap()
            .insert(sql.to_string(), outcome);
    }

    /// Script a vendor SQL failure for a statement.
    pub fn fail_statement(&self, sql: &str, message: &str) {
        self.script(sql, Canned::Fail(message.to_string()));
    }

    /// Make every subsequent connection attempt fail the given way.
    pub fn refuse_connections(&self, failure: ConnectFailure) {
        *self.state.connect_failure.lock().unwrap() = Some(failure);
    }

    /// Let connection attempts succeed again.
    pub fn accept_connections(&self) {
        *self.state.connect_failure.lock().unwrap() = None;
    }

    /// Invalidate every connection opened so far; their next ping fails.
    pub fn kill_connections(&self) {
        self.state.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Physical connections opened minus those closed or dropped.
    pub fn open_connections(&self) -> usize {
        let opened = self.state.opened.load(Ordering::SeqCst);
        let closed = self.state.closed.load(Ordering::SeqCst);
        opened.saturating_sub(closed)
    }

    pub fn total_opened(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }

    /// Writes that reached a commit (autocommit writes commit immediately).
    pub fn committed(&self) -> Vec<String> {
        self.state.committed.lock().unwrap().clone()
    }
}

#[async_trait]
impl Driver for FakeDriver {
    async fn open(&self, _profile: &ConnectionProfile) -> DriverResult<Box<dyn RawConnection>> {
        if let Some(failure) = *self.state.connect_failure.lock().unwrap() {
            return Err(match failure {
                ConnectFailure::Auth => DriverError::Auth("invalid username/password".into()),
                ConnectFailure::Timeout => DriverError::Timeout("login timed out".into()),
                ConnectFailure::Network => DriverError::Network("connection refused".into()),
            });
        }
        self.state.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeConnection {
            state: Arc::clone(&self.state),
            generation: self.state.generation.load(Ordering::SeqCst),
            autocommit: true,
            closed: false,
            pending: Vec::new(),
        }))
    }
}

struct FakeConnection {
    state: Arc<FakeState>,
    generation: usize,
    autocommit: bool,
    closed: bool,
    pending: Vec<String>,
}

impl FakeConnection {
    fn record_write(&mut self, sql: &str) {
        if self.autocommit {
            self.state.committed.lock().unwrap().push(sql.to_string());
        } else {
            self.pending.push(sql.to_string());
        }
    }
}

#[async_trait]
impl RawConnection for FakeConnection {
    async fn execute(&mut self, sql: &str, max_rows: usize) -> DriverResult<RawOutcome> {
        if self.closed {
            return Err(DriverError::Closed);
        }

        let canned = self.state.scripts.lock().unwrap().get(sql).cloned();
        match canned {
            Some(Canned::Rows(mut rs)) => {
                if max_rows > 0 && rs.rows.len() > max_rows {
                    rs.rows.truncate(max_rows);
                }
                Ok(RawOutcome::Rows(rs))
            }
            Some(Canned::Count(n)) => {
                self.record_write(sql);
                Ok(RawOutcome::Count(n))
            }
            Some(Canned::Fail(msg)) => Err(DriverError::Sql(msg)),
            None => {
                // Unscripted statements get a permissive default.
                if sql.trim_start().to_uppercase().starts_with("SELECT") {
                    Ok(RawOutcome::Rows(ResultSet::empty()))
                } else {
                    self.record_write(sql);
                    Ok(RawOutcome::Count(1))
                }
            }
        }
    }

    async fn set_autocommit(&mut self, enabled: bool) -> DriverResult<()> {
        if self.closed {
            return Err(DriverError::Closed);
        }
        self.autocommit = enabled;
        Ok(())
    }

    fn autocommit(&self) -> bool {
        self.autocommit
    }

    async fn commit(&mut self) -> DriverResult<()> {
        if self.closed {
            return Err(DriverError::Closed);
        }
        let mut committed = self.state.committed.lock().unwrap();
        committed.append(&mut self.pending);
        Ok(())
    }

    async fn rollback(&mut self) -> DriverResult<()> {
        if self.closed {
            return Err(DriverError::Closed);
        }
        self.pending.clear();
        Ok(())
    }

    async fn ping(&mut self) -> bool {
        !self.closed && self.generation == self.state.generation.load(Ordering::SeqCst)
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.state.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for FakeConnection {
    fn drop(&mut self) {
        if !self.closed {
            self.closed = true;
            self.state.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}
