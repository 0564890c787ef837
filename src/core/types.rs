use serde::{Deserialize, Serialize};

use crate::core::SqlValue;

/// Target engine dialect for a tenant connection.
///
/// Statement cleanup is uniform across dialects; pagination, identifier
/// quoting and the validation query differ and are keyed off this value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Dialect {
    /// The native DM-style engine.
    Dm,
    /// Oracle-compatible mode (service-name connect strings, ROWNUM paging).
    Oracle,
}

impl Dialect {
    /// Query used to validate a freshly opened physical connection.
    pub fn validation_query(&self) -> &'static str {
        match self {
            Self::Dm => "SELECT 1",
            Self::Oracle => "SELECT 1 FROM DUAL",
        }
    }
}

impl Default for Dialect {
    fn default() -> Self {
        Self::Dm
    }
}

/// Metadata for one result-set column, as reported by the driver.
///
/// `label` is the column heading (alias-aware); `name`, `schema` and `table`
/// identify the underlying column when the driver can resolve it, and are
/// empty strings otherwise. LOB reference handles need all four.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMeta {
    pub label: String,
    pub name: String,
    pub schema: String,
    pub table: String,
}

impl ColumnMeta {
    pub fn new(label: impl Into<String>) -> Self {
        let label = label.into();
        Self {
            name: label.clone(),
            label,
            schema: String::new(),
            table: String::new(),
        }
    }

    pub fn with_source(
        label: impl Into<String>,
        schema: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        let label = label.into();
        Self {
            name: label.clone(),
            label,
            schema: schema.into(),
            table: table.into(),
        }
    }
}

/// A materialized result set straight from the driver, before shaping.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    pub columns: Vec<ColumnMeta>,
    pub rows: Vec<Vec<SqlValue>>,
}

impl ResultSet {
    pub fn new(columns: Vec<ColumnMeta>, rows: Vec<Vec<SqlValue>>) -> Self {
        Self { columns, rows }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}
