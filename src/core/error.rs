use thiserror::Error;

use crate::conflict::ConflictRecord;

/// Gateway error taxonomy.
///
/// Provisioning failures (`AuthRejected`, `ConnectTimeout`, `Unreachable`)
/// abort the whole connect operation and never leave a pool registered.
/// Session-state failures are distinct from statement failures so callers
/// can tell "reconnect" apart from "fix your SQL". `Integrity` carries the
/// structured conflict report instead of an opaque message.
#[derive(Error, Debug)]
pub enum GateError {
    #[error("authentication rejected: {0}")]
    AuthRejected(String),

    #[error("connection attempt timed out: {0}")]
    ConnectTimeout(String),

    #[error("database unreachable: {0}")]
    Unreachable(String),

    #[error("no connection id supplied with this request")]
    NoTenant,

    #[error("unknown connection id '{0}'")]
    UnknownTenant(String),

    #[error("console connection is closed, reconnect required")]
    ConsoleClosed,

    #[error("connection pool for this tenant is shut down")]
    PoolClosed,

    #[error("connection pool exhausted: {0}")]
    PoolTimeout(String),

    #[error("SQL execution failed: {0}")]
    Statement(String),

    #[error("data integrity conflict across {} relation(s)", .0.len())]
    Integrity(Vec<ConflictRecord>),

    #[error("driver error: {0}")]
    Driver(String),
}

pub type Result<T> = std::result::Result<T, GateError>;
