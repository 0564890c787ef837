pub mod metadata;

use std::sync::Arc;

use serde::ser::{Serialize, SerializeStruct, Serializer};
use serde_json::{Map as JsonMap, Value as JsonValue};
use tracing::warn;

use crate::core::{GateError, Result};
use crate::engine::cleanup::clean_vendor_message;
pub use metadata::{ForeignKeyEdge, MetadataProvider};

/// Substrings and vendor codes that identify an integrity-constraint
/// failure. Includes the DM engine's localized wording alongside the
/// Oracle-compatible codes (-2291 parent missing, -2292 children present).
const INTEGRITY_MARKERS: [&str; 8] = [
    "integrity constraint",
    "violation of foreign key",
    "-2291",
    "-2292",
    "引用",
    "参考",
    "约束",
    "违反",
];

/// How many rows block an operation, or that the required parent row is
/// absent. `Missing` dominates any numeric count when records merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictCount {
    Count(u64),
    Missing,
}

/// One foreign-key relationship that blocked a write.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictRecord {
    /// The table on the other end of the relationship.
    pub table: String,
    /// The column on that table.
    pub column: String,
    pub count: ConflictCount,
    /// The conflicting values, deduplicated.
    pub values: Vec<String>,
}

impl Serialize for ConflictRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("ConflictRecord", 4)?;
        s.serialize_field("table", &self.table)?;
        s.serialize_field("column", &self.column)?;
        match self.count {
            ConflictCount::Count(n) => s.serialize_field("count", &n)?,
            ConflictCount::Missing => s.serialize_field("count", "MISSING")?,
        }
        s.serialize_field("values", &self.values)?;
        s.end()
    }
}

/// Does an error message look like an integrity-constraint violation?
pub fn is_integrity_violation(message: &str) -> bool {
    INTEGRITY_MARKERS.iter().any(|m| message.contains(m))
}

/// Turns opaque integrity failures into structured conflict reports by
/// probing the schema's foreign-key graph.
pub struct ConflictAnalyzer {
    metadata: Arc<dyn MetadataProvider>,
}

impl ConflictAnalyzer {
    pub fn new(metadata: Arc<dyn MetadataProvider>) -> Self {
        Self { metadata }
    }

    /// Reconstruct which relationships blocked a write against
    /// `schema.table`.
    ///
    /// `error` of `None` forces analysis unconditionally (the batch path);
    /// a message that does not look like an integrity violation is
    /// returned cleaned, without any metadata probing. Case A (a pk value
    /// is known, the delete/update path) counts child rows referencing it;
    /// Case B (a row payload is known and Case A found nothing, the insert
    /// path)
    /// looks for foreign-key values with no parent row. If neither case
    /// yields a record, the cleaned original error surfaces.
    pub async fn analyze(
        &self,
        error: Option<&str>,
        schema: &str,
        table: &str,
        pk_value: Option<&str>,
        row: Option<&JsonMap<String, JsonValue>>,
    ) -> Result<Vec<ConflictRecord>> {
        let message = error.unwrap_or("");
        if error.is_some() && !is_integrity_violation(message) {
            return Err(GateError::Statement(clean_vendor_message(message)));
        }

        let mut conflicts = Vec::new();

        // Case A: something still references the row being removed. When
        // the caller only has the row payload, the pk value is derived
        // from it via the table's primary-key column.
        let pk = match pk_value {
            Some(v) => Some(v.to_string()),
            None => self.pk_value_from_row(schema, table, row).await,
        };
        if let Some(pk) = pk {
            match self.count_child_references(schema, table, &pk).await {
                Ok(mut found) => conflicts.append(&mut found),
                Err(e) => warn!(schema, table, error = %e, "child-reference probe failed"),
            }
        }

        // Case B: the row being written points at parents that are absent.
        if conflicts.is_empty()
            && let Some(row) = row
        {
            match self.find_missing_parents(schema, table, row).await {
                Ok(mut found) => conflicts.append(&mut found),
                Err(e) => warn!(schema, table, error = %e, "missing-parent probe failed"),
            }
        }

        if conflicts.is_empty() {
            let fallback = if message.is_empty() {
                "integrity constraint violated".to_string()
            } else {
                clean_vendor_message(message)
            };
            return Err(GateError::Statement(fallback));
        }
        Ok(conflicts)
    }

    /// Diagnose a failed write and produce the error the caller should
    /// propagate: structured [`GateError::Integrity`] when blocking
    /// relationships were found, the cleaned statement error otherwise.
    pub async fn diagnose(
        &self,
        error: &str,
        schema: &str,
        table: &str,
        pk_value: Option<&str>,
        row: Option<&JsonMap<String, JsonValue>>,
    ) -> GateError {
        match self.analyze(Some(error), schema, table, pk_value, row).await {
            Ok(records) => GateError::Integrity(records),
            Err(e) => e,
        }
    }

    /// Analyze every row of a failed batch and merge the findings into one
    /// consolidated diagnostic. An empty result means the failure was not
    /// attributable to missing parents.
    pub async fn analyze_batch(
        &self,
        schema: &str,
        table: &str,
        rows: &[JsonMap<String, JsonValue>],
    ) -> Result<Vec<ConflictRecord>> {
        let mut all = Vec::new();
        for row in rows {
            match self.find_missing_parents(schema, table, row).await {
                Ok(mut found) => all.append(&mut found),
                Err(e) => {
                    warn!(schema, table, error = %e, "batch conflict probe failed");
                    break;
                }
            }
        }
        Ok(merge_records(all))
    }

    async fn pk_value_from_row(
        &self,
        schema: &str,
        table: &str,
        row: Option<&JsonMap<String, JsonValue>>,
    ) -> Option<String> {
        let row = row?;
        match self.metadata.primary_key_column(schema, table).await {
            Ok(Some(column)) => row.get(&column).and_then(value_text),
            Ok(None) => None,
            Err(e) => {
                warn!(schema, table, error = %e, "primary-key lookup failed");
                None
            }
        }
    }

    async fn count_child_references(
        &self,
        schema: &str,
        table: &str,
        pk_value: &str,
    ) -> Result<Vec<ConflictRecord>> {
        let mut conflicts = Vec::new();
        for edge in self.metadata.child_references(schema, table).await? {
            let count = self
                .metadata
                .count_matching(schema, &edge.table, &edge.column, pk_value)
                .await?;
            if count > 0 {
                conflicts.push(ConflictRecord {
                    table: edge.table,
                    column: edge.column,
                    count: ConflictCount::Count(count),
                    values: vec![pk_value.to_string()],
                });
            }
        }
        Ok(conflicts)
    }

    async fn find_missing_parents(
        &self,
        schema: &str,
        table: &str,
        row: &JsonMap<String, JsonValue>,
    ) -> Result<Vec<ConflictRecord>> {
        let mut conflicts = Vec::new();
        for fk in self.metadata.foreign_keys(schema, table).await? {
            let Some(value) = row.get(&fk.column).and_then(value_text) else {
                continue;
            };
            let exists = self
                .metadata
                .count_matching(schema, &fk.ref_table, &fk.ref_column, &value)
                .await?;
            if exists == 0 {
                conflicts.push(ConflictRecord {
                    table: fk.ref_table,
                    column: fk.ref_column,
                    count: ConflictCount::Missing,
                    values: vec![value],
                });
            }
        }
        Ok(conflicts)
    }
}

/// Merge records by `(table, column)`: numeric counts add, `Missing`
/// overrides any count for that key, values union in first-seen order.
pub fn merge_records(records: Vec<ConflictRecord>) -> Vec<ConflictRecord> {
    let mut merged: Vec<ConflictRecord> = Vec::new();
    for record in records {
        match merged
            .iter_mut()
            .find(|m| m.table == record.table && m.column == record.column)
        {
            Some(existing) => {
                existing.count = match (existing.count, record.count) {
                    (ConflictCount::Count(a), ConflictCount::Count(b)) => {
                        ConflictCount::Count(a + b)
                    }
                    _ => ConflictCount::Missing,
                };
                for value in record.values {
                    if !existing.values.contains(&value) {
                        existing.values.push(value);
                    }
                }
            }
            None => merged.push(record),
        }
    }
    merged
}

fn value_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::Null => None,
        JsonValue::String(s) if s.is_empty() => None,
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
