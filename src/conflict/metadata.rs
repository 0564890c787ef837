use async_trait::async_trait;

use crate::core::Result;

/// One foreign-key edge: `table.column` references `ref_table.ref_column`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyEdge {
    pub table: String,
    pub column: String,
    pub ref_table: String,
    pub ref_column: String,
}

/// Schema metadata consumed by conflict analysis.
///
/// Implemented outside this core by the vendor-specific metadata
/// collaborator (catalog queries differ per engine and are plain SQL
/// templating).
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// Foreign keys declared on other tables that reference `table`.
    async fn child_references(&self, schema: &str, table: &str) -> Result<Vec<ForeignKeyEdge>>;

    /// Foreign keys declared on `table` itself.
    async fn foreign_keys(&self, schema: &str, table: &str) -> Result<Vec<ForeignKeyEdge>>;

    /// Primary-key column of `table`, if it has a single-column key.
    async fn primary_key_column(&self, schema: &str, table: &str) -> Result<Option<String>>;

    /// Rows in `schema.table` where `column` equals `value`.
    async fn count_matching(
        &self,
        schema: &str,
        table: &str,
        column: &str,
        value: &str,
    ) -> Result<u64>;
}
