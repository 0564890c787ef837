// ============================================================================
// SqlGate Library
// ============================================================================

pub mod conflict;
pub mod core;
pub mod driver;
pub mod engine;
pub mod registry;
pub mod session;

// Re-export main types for convenience
pub use core::{ColumnMeta, Dialect, GateError, Result, ResultSet, SqlValue};

pub use conflict::{ConflictAnalyzer, ConflictCount, ConflictRecord, MetadataProvider};
pub use driver::{profile::ConnectionProfile, Driver, RawConnection, RawOutcome};
pub use engine::{ExecutionResult, ScriptReport, SqlExecutionEngine, StatementOutcome, TxOutcome};
pub use registry::ConnectionRegistry;
pub use session::{ConsoleSessionManager, SessionContext};

use std::sync::Arc;

use serde_json::{Map as JsonMap, Value as JsonValue};

// ============================================================================
// Gateway - the top-level entry point
// ============================================================================

/// Wires the registry, console manager, execution engine and conflict
/// analyzer together behind one handle. All operations that touch a
/// database take a [`SessionContext`] naming the tenant.
pub struct Gateway {
    registry: Arc<ConnectionRegistry>,
    consoles: Arc<ConsoleSessionManager>,
    engine: SqlExecutionEngine,
    analyzer: ConflictAnalyzer,
}

impl Gateway {
    pub fn new(driver: Arc<dyn Driver>, metadata: Arc<dyn MetadataProvider>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(driver));
        let consoles = Arc::new(ConsoleSessionManager::new(Arc::clone(&registry)));
        let engine = SqlExecutionEngine::new(Arc::clone(&registry), Arc::clone(&consoles));
        Self {
            registry,
            consoles,
            engine,
            analyzer: ConflictAnalyzer::new(metadata),
        }
    }

    // ------------------------------------------------------------------
    // Tenant lifecycle
    // ------------------------------------------------------------------

    /// Register a tenant and warm up its pool. Returns the generated
    /// tenant id.
    pub async fn connect(&self, profile: ConnectionProfile) -> Result<String> {
        self.registry.connect(profile).await
    }

    /// Register (or replace) a tenant under a caller-supplied id.
    pub async fn connect_as(&self, id: &str, profile: ConnectionProfile) -> Result<()> {
        self.consoles.close_console(id).await;
        self.registry.connect_as(id, profile).await
    }

    /// Tear down a tenant: its console session first, then its pool.
    pub async fn disconnect(&self, id: &str) {
        self.consoles.close_console(id).await;
        self.registry.disconnect(id).await;
    }

    pub async fn is_connected(&self, id: &str) -> bool {
        self.registry.exists(id).await
    }

    /// Close every console and pool. The gateway is unusable afterwards.
    pub async fn shutdown(&self) {
        for id in self.registry.tenant_ids().await {
            self.consoles.close_console(&id).await;
        }
        self.registry.shutdown().await;
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    pub async fn execute(
        &self,
        ctx: &SessionContext,
        sql: &str,
        manual_commit: bool,
    ) -> Result<ExecutionResult> {
        self.engine.execute_statement(ctx, sql, manual_commit).await
    }

    pub async fn execute_script(
        &self,
        ctx: &SessionContext,
        sqls: &[String],
        manual_commit: bool,
    ) -> Result<ScriptReport> {
        self.engine.execute_script(ctx, sqls, manual_commit).await
    }

    pub async fn execute_batch(&self, ctx: &SessionContext, sqls: &[String]) -> Result<u64> {
        self.engine.execute_batch(ctx, sqls).await
    }

    /// Whether the tenant's console has uncommitted work.
    pub async fn transaction_status(&self, ctx: &SessionContext) -> Result<bool> {
        self.engine.transaction_status(ctx).await
    }

    pub async fn paginate_query(
        &self,
        ctx: &SessionContext,
        sql: &str,
        offset: u64,
        limit: u64,
    ) -> Result<String> {
        self.engine.paginate_query(ctx, sql, offset, limit).await
    }

    /// Drop the tenant's console session, rolling back anything pending.
    /// The next manual-commit statement opens a fresh one.
    pub async fn reset_console(&self, ctx: &SessionContext) -> Result<()> {
        let tenant = ctx.tenant()?;
        self.consoles.close_console(tenant).await;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Conflict diagnostics
    // ------------------------------------------------------------------

    /// Explain an integrity failure against `schema.table`. See
    /// [`ConflictAnalyzer::analyze`].
    pub async fn explain_conflict(
        &self,
        error: Option<&str>,
        schema: &str,
        table: &str,
        pk_value: Option<&str>,
        row: Option<&JsonMap<String, JsonValue>>,
    ) -> Result<Vec<ConflictRecord>> {
        self.analyzer.analyze(error, schema, table, pk_value, row).await
    }

    /// Turn a write failure into the error to propagate, structured when
    /// possible. See [`ConflictAnalyzer::diagnose`].
    pub async fn diagnose_write_failure(
        &self,
        error: &str,
        schema: &str,
        table: &str,
        pk_value: Option<&str>,
        row: Option<&JsonMap<String, JsonValue>>,
    ) -> GateError {
        self.analyzer.diagnose(error, schema, table, pk_value, row).await
    }

    /// Explain a failed multi-row write. See
    /// [`ConflictAnalyzer::analyze_batch`].
    pub async fn explain_batch_conflict(
        &self,
        schema: &str,
        table: &str,
        rows: &[JsonMap<String, JsonValue>],
    ) -> Result<Vec<ConflictRecord>> {
        self.analyzer.analyze_batch(schema, table, rows).await
    }
}
