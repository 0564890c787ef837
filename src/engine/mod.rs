pub mod cleanup;
pub mod dialect;
pub mod lob;

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::{Map as JsonMap, Value as JsonValue};
use tracing::debug;

use crate::core::{GateError, Result};
use crate::driver::{DriverError, RawConnection, RawOutcome};
use crate::registry::ConnectionRegistry;
use crate::session::{ConsoleSessionManager, SessionContext};
use cleanup::{clean_statement, clean_vendor_message, is_commit, is_rollback, truncate_sql};
use lob::shape_rows;

/// Hard ceiling on materialized rows per statement. Hitting it sets the
/// truncation flag on the result; it is never an error.
pub const MAX_RESULT_ROWS: usize = 5000;

/// Statement text kept in script outcomes, in characters.
const SCRIPT_SQL_PREVIEW: usize = 100;

/// Outcome of one executed statement.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionResult {
    Query {
        columns: Vec<String>,
        rows: Vec<JsonMap<String, JsonValue>>,
        truncated: bool,
    },
    Update {
        affected_rows: u64,
        dirty: bool,
    },
    Transaction {
        outcome: TxOutcome,
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxOutcome {
    Committed,
    RolledBack,
    /// A COMMIT/ROLLBACK arrived with nothing pending; reported, not sent
    /// to the database.
    NoOp,
}

/// Per-statement record of a script run.
#[derive(Debug, Serialize)]
pub struct StatementOutcome {
    /// 1-based position in the submitted script.
    pub index: usize,
    /// Truncated copy of the statement text.
    pub sql: String,
    pub success: bool,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ExecutionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of a best-effort script run.
#[derive(Debug, Serialize)]
pub struct ScriptReport {
    pub outcomes: Vec<StatementOutcome>,
    /// Console dirty state after the run; absent for oneshot scripts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dirty: Option<bool>,
}

/// Executes single statements, scripts, and atomic batches against a
/// tenant's connections, routing between the console session (manual
/// commit) and oneshot pool checkouts (autocommit).
pub struct SqlExecutionEngine {
    registry: Arc<ConnectionRegistry>,
    consoles: Arc<ConsoleSessionManager>,
}

impl SqlExecutionEngine {
    pub fn new(registry: Arc<ConnectionRegistry>, consoles: Arc<ConsoleSessionManager>) -> Self {
        Self { registry, consoles }
    }

    /// Execute one statement.
    ///
    /// In console mode a bare COMMIT/ROLLBACK is handled through the
    /// console state machine instead of being sent as SQL; any DML marks
    /// the console dirty. In oneshot mode the connection goes back to the
    /// pool on every exit path.
    pub async fn execute_statement(
        &self,
        ctx: &SessionContext,
        sql: &str,
        manual_commit: bool,
    ) -> Result<ExecutionResult> {
        let tenant = ctx.tenant()?;
        let cleaned = clean_statement(sql);
        if cleaned.is_empty() {
            return Err(GateError::Statement("statement is empty".to_string()));
        }
        debug!(tenant, manual_commit, sql = %truncate_sql(&cleaned, 60), "executing statement");

        if manual_commit {
            let mut lease = self.consoles.acquire(tenant).await?;

            if is_commit(&cleaned) {
                lease.conn().commit().await.map_err(|e| map_statement_error(e, true))?;
                lease.set_dirty(false);
                return Ok(ExecutionResult::Transaction {
                    outcome: TxOutcome::Committed,
                    message: "transaction committed".to_string(),
                });
            }
            if is_rollback(&cleaned) {
                if !lease.dirty() {
                    return Ok(ExecutionResult::Transaction {
                        outcome: TxOutcome::NoOp,
                        message: "no pending transaction to roll back".to_string(),
                    });
                }
                lease.conn().rollback().await.map_err(|e| map_statement_error(e, true))?;
                lease.set_dirty(false);
                return Ok(ExecutionResult::Transaction {
                    outcome: TxOutcome::RolledBack,
                    message: "transaction rolled back".to_string(),
                });
            }

            match run_shaped(lease.conn(), &cleaned, true).await? {
                Shaped::Query(result) => Ok(result),
                Shaped::Update(affected_rows) => {
                    lease.set_dirty(true);
                    Ok(ExecutionResult::Update {
                        affected_rows,
                        dirty: true,
                    })
                }
            }
        } else {
            let mut guard = self.consoles.oneshot(tenant).await?;
            let outcome = run_shaped(guard.conn(), &cleaned, false).await;
            guard.release().await;
            match outcome? {
                Shaped::Query(result) => Ok(result),
                Shaped::Update(affected_rows) => Ok(ExecutionResult::Update {
                    affected_rows,
                    dirty: false,
                }),
            }
        }
    }

    /// Run a script sequentially on one connection, continuing past
    /// per-statement failures. Each outcome records what happened; one bad
    /// statement never stops the remainder.
    pub async fn execute_script(
        &self,
        ctx: &SessionContext,
        sqls: &[String],
        manual_commit: bool,
    ) -> Result<ScriptReport> {
        let tenant = ctx.tenant()?;
        if sqls.is_empty() {
            return Err(GateError::Statement("script is empty".to_string()));
        }

        if manual_commit {
            let mut lease = self.consoles.acquire(tenant).await?;
            let initial_dirty = lease.dirty();
            let (outcomes, dirty) = run_script_on(lease.conn(), sqls, true, initial_dirty).await;
            lease.set_dirty(dirty);
            Ok(ScriptReport {
                outcomes,
                dirty: Some(dirty),
            })
        } else {
            let mut guard = self.consoles.oneshot(tenant).await?;
            let (outcomes, _) = run_script_on(guard.conn(), sqls, false, false).await;
            guard.release().await;
            Ok(ScriptReport {
                outcomes,
                dirty: None,
            })
        }
    }

    /// Run statements as one atomic batch on a dedicated connection:
    /// autocommit off, any failure rolls back everything executed so far.
    /// Independent of console state. Returns total affected rows.
    pub async fn execute_batch(&self, ctx: &SessionContext, sqls: &[String]) -> Result<u64> {
        let tenant = ctx.tenant()?;
        if sqls.is_empty() {
            return Err(GateError::Statement("batch is empty".to_string()));
        }

        let mut guard = self.consoles.oneshot(tenant).await?;
        let result = run_batch_on(guard.conn(), sqls).await;
        // release() restores autocommit and rolls back if the batch bailed
        // before its own rollback could run.
        guard.release().await;
        result
    }

    /// Dirty state of the tenant's console session.
    pub async fn transaction_status(&self, ctx: &SessionContext) -> Result<bool> {
        let tenant = ctx.tenant()?;
        Ok(self.consoles.is_dirty(tenant).await)
    }

    /// Rewrite a query with pagination for the tenant's registered dialect.
    pub async fn paginate_query(
        &self,
        ctx: &SessionContext,
        sql: &str,
        offset: u64,
        limit: u64,
    ) -> Result<String> {
        let tenant = ctx.tenant()?;
        let dialect = self
            .registry
            .dialect_of(tenant)
            .await
            .ok_or_else(|| GateError::UnknownTenant(tenant.to_string()))?;
        Ok(dialect::paginate(dialect, sql, offset, limit))
    }
}

enum Shaped {
    Query(ExecutionResult),
    Update(u64),
}

async fn run_shaped(
    conn: &mut dyn RawConnection,
    sql: &str,
    console_mode: bool,
) -> Result<Shaped> {
    // One row past the cap so truncation is detectable; the driver stops
    // materializing there.
    match conn
        .execute(sql, MAX_RESULT_ROWS + 1)
        .await
        .map_err(|e| map_statement_error(e, console_mode))?
    {
        RawOutcome::Rows(rs) => {
            let (rows, truncated) = shape_rows(&rs, MAX_RESULT_ROWS);
            Ok(Shaped::Query(ExecutionResult::Query {
                columns: rs.columns.iter().map(|c| c.label.clone()).collect(),
                rows,
                truncated,
            }))
        }
        RawOutcome::Count(n) => Ok(Shaped::Update(n)),
    }
}

async fn run_script_on(
    conn: &mut dyn RawConnection,
    sqls: &[String],
    console_mode: bool,
    initial_dirty: bool,
) -> (Vec<StatementOutcome>, bool) {
    let mut outcomes = Vec::with_capacity(sqls.len());
    let mut dirty = initial_dirty;

    for (i, raw) in sqls.iter().enumerate() {
        let cleaned = clean_statement(raw);
        if cleaned.is_empty() {
            continue;
        }
        let started = Instant::now();
        let outcome = match run_shaped(conn, &cleaned, console_mode).await {
            Ok(Shaped::Query(result)) => StatementOutcome {
                index: i + 1,
                sql: truncate_sql(raw, SCRIPT_SQL_PREVIEW),
                success: true,
                duration_ms: started.elapsed().as_millis() as u64,
                result: Some(result),
                error: None,
            },
            Ok(Shaped::Update(affected_rows)) => {
                if console_mode {
                    dirty = true;
                }
                StatementOutcome {
                    index: i + 1,
                    sql: truncate_sql(raw, SCRIPT_SQL_PREVIEW),
                    success: true,
                    duration_ms: started.elapsed().as_millis() as u64,
                    result: Some(ExecutionResult::Update {
                        affected_rows,
                        dirty,
                    }),
                    error: None,
                }
            }
            Err(e) => StatementOutcome {
                index: i + 1,
                sql: truncate_sql(raw, SCRIPT_SQL_PREVIEW),
                success: false,
                duration_ms: started.elapsed().as_millis() as u64,
                result: None,
                error: Some(e.to_string()),
            },
        };
        outcomes.push(outcome);
    }

    (outcomes, dirty)
}

async fn run_batch_on(conn: &mut dyn RawConnection, sqls: &[String]) -> Result<u64> {
    conn.set_autocommit(false)
        .await
        .map_err(|e| map_statement_error(e, false))?;

    let mut total = 0u64;
    for raw in sqls {
        let cleaned = clean_statement(raw);
        if cleaned.is_empty() {
            continue;
        }
        match conn.execute(&cleaned, 0).await {
            Ok(RawOutcome::Count(n)) => total += n,
            // Queries in a batch contribute nothing to the count.
            Ok(RawOutcome::Rows(_)) => {}
            Err(e) => {
                let _ = conn.rollback().await;
                return Err(map_statement_error(e, false));
            }
        }
    }

    conn.commit().await.map_err(|e| map_statement_error(e, false))?;
    conn.set_autocommit(true)
        .await
        .map_err(|e| map_statement_error(e, false))?;
    Ok(total)
}

/// Map a driver failure during execution onto the gateway taxonomy.
///
/// A closed connection only means "reconnect your console" when the
/// statement ran on the console session; on a pooled oneshot connection it
/// is an ordinary driver failure.
fn map_statement_error(e: DriverError, console_mode: bool) -> GateError {
    match e {
        DriverError::Sql(msg) => GateError::Statement(clean_vendor_message(&msg)),
        DriverError::Closed if console_mode => GateError::ConsoleClosed,
        other => GateError::Driver(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ColumnMeta, ResultSet, SqlValue};
    use crate::driver::ConnectionProfile;
    use crate::driver::fake::{Canned, FakeDriver};

    struct Fixture {
        driver: FakeDriver,
        engine: SqlExecutionEngine,
        ctx: SessionContext,
    }

    async fn fixture() -> Fixture {
        let driver = FakeDriver::new();
        let registry = Arc::new(ConnectionRegistry::new(Arc::new(driver.clone())));
        let id = registry
            .connect(ConnectionProfile::new("db.local", 5236, "SYSDBA", "SYSDBA001"))
            .await
            .unwrap();
        let consoles = Arc::new(ConsoleSessionManager::new(Arc::clone(&registry)));
        let engine = SqlExecutionEngine::new(registry, consoles);
        Fixture {
            driver,
            engine,
            ctx: SessionContext::bind(id),
        }
    }

    fn id_rows(n: usize) -> Canned {
        let columns = vec![ColumnMeta::new("ID")];
        let rows = (0..n).map(|i| vec![SqlValue::Integer(i as i64)]).collect();
        Canned::Rows(ResultSet::new(columns, rows))
    }

    #[tokio::test]
    async fn test_query_returns_shaped_rows() {
        let f = fixture().await;
        f.driver.script("SELECT ID FROM T", id_rows(3));

        match f
            .engine
            .execute_statement(&f.ctx, "SELECT ID FROM T;", false)
            .await
            .unwrap()
        {
            ExecutionResult::Query {
                columns,
                rows,
                truncated,
            } => {
                assert_eq!(columns, vec!["ID"]);
                assert_eq!(rows.len(), 3);
                assert!(!truncated);
            }
            other => panic!("expected query result, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_row_cap_sets_truncation_flag() {
        let f = fixture().await;
        f.driver
            .script("SELECT ID FROM BIG", id_rows(MAX_RESULT_ROWS + 50));

        match f
            .engine
            .execute_statement(&f.ctx, "SELECT ID FROM BIG", false)
            .await
            .unwrap()
        {
            ExecutionResult::Query { rows, truncated, .. } => {
                assert_eq!(rows.len(), MAX_RESULT_ROWS);
                assert!(truncated);
            }
            other => panic!("expected query result, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_exactly_cap_rows_is_not_truncated() {
        let f = fixture().await;
        f.driver.script("SELECT ID FROM EDGE", id_rows(MAX_RESULT_ROWS));

        match f
            .engine
            .execute_statement(&f.ctx, "SELECT ID FROM EDGE", false)
            .await
            .unwrap()
        {
            ExecutionResult::Query { rows, truncated, .. } => {
                assert_eq!(rows.len(), MAX_RESULT_ROWS);
                assert!(!truncated);
            }
            other => panic!("expected query result, got {other:?}"),
        }
    }

    #[test]
    fn test_closed_connection_error_depends_on_mode() {
        assert!(matches!(
            map_statement_error(DriverError::Closed, true),
            GateError::ConsoleClosed
        ));
        assert!(matches!(
            map_statement_error(DriverError::Closed, false),
            GateError::Driver(_)
        ));
    }

    #[tokio::test]
    async fn test_oneshot_update_commits_and_stays_clean() {
        let f = fixture().await;
        f.driver.script("DELETE FROM T WHERE ID = 1", Canned::Count(1));

        let result = f
            .engine
            .execute_statement(&f.ctx, "DELETE FROM T WHERE ID = 1;", false)
            .await
            .unwrap();
        assert!(matches!(
            result,
            ExecutionResult::Update {
                affected_rows: 1,
                dirty: false
            }
        ));
        assert_eq!(f.driver.committed(), vec!["DELETE FROM T WHERE ID = 1"]);
        assert!(!f.engine.transaction_status(&f.ctx).await.unwrap());
    }

    #[tokio::test]
    async fn test_console_dml_marks_dirty_until_commit() {
        let f = fixture().await;
        f.driver.script("INSERT INTO T VALUES (1)", Canned::Count(1));

        f.engine
            .execute_statement(&f.ctx, "INSERT INTO T VALUES (1)", true)
            .await
            .unwrap();
        assert!(f.engine.transaction_status(&f.ctx).await.unwrap());
        assert!(f.driver.committed().is_empty());

        let result = f
            .engine
            .execute_statement(&f.ctx, "COMMIT;", true)
            .await
            .unwrap();
        assert!(matches!(
            result,
            ExecutionResult::Transaction {
                outcome: TxOutcome::Committed,
                ..
            }
        ));
        assert!(!f.engine.transaction_status(&f.ctx).await.unwrap());
        assert_eq!(f.driver.committed(), vec!["INSERT INTO T VALUES (1)"]);
    }

    #[tokio::test]
    async fn test_rollback_discards_console_writes() {
        let f = fixture().await;
        f.driver.script("INSERT INTO T VALUES (1)", Canned::Count(1));

        f.engine
            .execute_statement(&f.ctx, "INSERT INTO T VALUES (1)", true)
            .await
            .unwrap();
        let result = f
            .engine
            .execute_statement(&f.ctx, "ROLLBACK", true)
            .await
            .unwrap();
        assert!(matches!(
            result,
            ExecutionResult::Transaction {
                outcome: TxOutcome::RolledBack,
                ..
            }
        ));
        assert!(!f.engine.transaction_status(&f.ctx).await.unwrap());
        assert!(f.driver.committed().is_empty());
    }

    #[tokio::test]
    async fn test_rollback_while_clean_is_reported_noop() {
        let f = fixture().await;
        let result = f
            .engine
            .execute_statement(&f.ctx, "ROLLBACK;", true)
            .await
            .unwrap();
        assert!(matches!(
            result,
            ExecutionResult::Transaction {
                outcome: TxOutcome::NoOp,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_script_continues_past_failure() {
        let f = fixture().await;
        f.driver.script("INSERT INTO T VALUES (1)", Canned::Count(1));
        f.driver.fail_statement("INSERT INTO T VALUES (2)", "unique constraint violated");
        f.driver.script("INSERT INTO T VALUES (3)", Canned::Count(1));

        let script: Vec<String> = vec![
            "INSERT INTO T VALUES (1);".into(),
            "INSERT INTO T VALUES (2);".into(),
            "INSERT INTO T VALUES (3);".into(),
        ];
        let report = f.engine.execute_script(&f.ctx, &script, false).await.unwrap();

        assert_eq!(report.outcomes.len(), 3);
        assert!(report.outcomes[0].success);
        assert!(!report.outcomes[1].success);
        assert!(
            report.outcomes[1]
                .error
                .as_deref()
                .unwrap()
                .contains("unique constraint")
        );
        assert!(report.outcomes[2].success);
        assert_eq!(report.outcomes[2].index, 3);
    }

    #[tokio::test]
    async fn test_console_script_folds_dirty_once() {
        let f = fixture().await;
        f.driver.script("UPDATE T SET A = 1", Canned::Count(2));

        let script: Vec<String> = vec!["SELECT ID FROM T".into(), "UPDATE T SET A = 1".into()];
        let report = f.engine.execute_script(&f.ctx, &script, true).await.unwrap();

        assert_eq!(report.dirty, Some(true));
        assert!(f.engine.transaction_status(&f.ctx).await.unwrap());
    }

    #[tokio::test]
    async fn test_batch_is_atomic_on_failure() {
        let f = fixture().await;
        f.driver.script("INSERT INTO T VALUES (1)", Canned::Count(1));
        f.driver.fail_statement("INSERT INTO T VALUES (2)", "violation of foreign key constraint");

        let batch: Vec<String> = vec![
            "INSERT INTO T VALUES (1)".into(),
            "INSERT INTO T VALUES (2)".into(),
        ];
        let err = f.engine.execute_batch(&f.ctx, &batch).await.unwrap_err();
        assert!(matches!(err, GateError::Statement(_)));

        // The successful first statement was rolled back with the rest.
        assert!(f.driver.committed().is_empty());
    }

    #[tokio::test]
    async fn test_batch_commits_and_sums_counts() {
        let f = fixture().await;
        f.driver.script("INSERT INTO T VALUES (1)", Canned::Count(1));
        f.driver.script("UPDATE T SET A = 2", Canned::Count(3));

        let batch: Vec<String> = vec![
            "INSERT INTO T VALUES (1);".into(),
            "UPDATE T SET A = 2;".into(),
        ];
        let total = f.engine.execute_batch(&f.ctx, &batch).await.unwrap();
        assert_eq!(total, 4);
        assert_eq!(f.driver.committed().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_tenant_is_explicit() {
        let f = fixture().await;
        let ctx = SessionContext::unbound();
        assert!(matches!(
            f.engine.execute_statement(&ctx, "SELECT 1", false).await,
            Err(GateError::NoTenant)
        ));

        let ctx = SessionContext::bind("no-such-tenant");
        assert!(matches!(
            f.engine.execute_statement(&ctx, "SELECT 1", false).await,
            Err(GateError::UnknownTenant(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_statement_rejected() {
        let f = fixture().await;
        assert!(matches!(
            f.engine
                .execute_statement(&f.ctx, "  -- just a comment\n", false)
                .await,
            Err(GateError::Statement(_))
        ));
    }

    #[tokio::test]
    async fn test_paginate_query_uses_registered_dialect() {
        let f = fixture().await;
        let paged = f
            .engine
            .paginate_query(&f.ctx, "SELECT * FROM T", 0, 10)
            .await
            .unwrap();
        assert_eq!(paged, "SELECT * FROM T LIMIT 10 OFFSET 0");
    }
}
