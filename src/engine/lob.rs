//! Large-object shaping.
//!
//! Result rows never carry raw LOB payloads. When the row exposes a
//! row-locator column the LOB is replaced by a reference handle that a
//! separate streaming endpoint resolves later; otherwise a bounded inline
//! preview is emitted, and past the preview cap only a hint telling the
//! caller to re-query with a row locator.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::core::{ResultSet, SqlValue};

/// Character cap for inline text previews.
pub const TEXT_PREVIEW_CHARS: usize = 2048;

/// Byte cap for inline binary previews.
pub const BINARY_PREVIEW_BYTES: usize = 20 * 1024;

/// Column labels recognized as row locators.
const ROW_LOCATOR_LABELS: [&str; 2] = ["ROWID", "DB_INTERNAL_ID"];

/// Schema placeholder when the driver cannot resolve one; the streaming
/// endpoint substitutes the connection's current schema.
const CURRENT_SCHEMA: &str = "CURRENT_SCHEMA";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LobKind {
    Text,
    Binary,
}

impl LobKind {
    fn tag(&self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Binary => "BINARY",
        }
    }
}

/// Reference handle addressing one LOB cell by row locator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LobRef {
    pub schema: String,
    pub table: String,
    pub column: String,
    pub row_id: String,
    pub kind: LobKind,
}

impl LobRef {
    /// Wire form consumed by the streaming endpoint.
    pub fn encode(&self) -> String {
        format!(
            "[LOB_REF:schema={},table={},col={},rowId={},type={}]",
            self.schema,
            self.table,
            self.column,
            self.row_id,
            self.kind.tag()
        )
    }
}

/// Shape a result set into transport rows, applying the row cap and the
/// LOB protocol. Returns the shaped rows and whether the cap truncated the
/// result.
pub fn shape_rows(rs: &ResultSet, cap: usize) -> (Vec<JsonMap<String, JsonValue>>, bool) {
    let truncated = rs.rows.len() > cap;
    let mut shaped = Vec::with_capacity(rs.rows.len().min(cap));

    for row in rs.rows.iter().take(cap) {
        let row_id = find_row_locator(rs, row);
        let mut out = JsonMap::with_capacity(rs.columns.len());
        for (col, value) in rs.columns.iter().zip(row.iter()) {
            let cell = if value.is_lob() {
                shape_lob_cell(col, value, row_id.as_deref())
            } else {
                value.to_json()
            };
            out.insert(col.label.clone(), cell);
        }
        shaped.push(out);
    }

    (shaped, truncated)
}

/// Non-null value of the row's locator column, if the query selected one.
fn find_row_locator(rs: &ResultSet, row: &[SqlValue]) -> Option<String> {
    rs.columns.iter().zip(row.iter()).find_map(|(col, value)| {
        let is_locator = ROW_LOCATOR_LABELS
            .iter()
            .any(|l| col.label.eq_ignore_ascii_case(l));
        if is_locator && *value != SqlValue::Null {
            Some(value.display_string())
        } else {
            None
        }
    })
}

fn shape_lob_cell(
    col: &crate::core::ColumnMeta,
    value: &SqlValue,
    row_id: Option<&str>,
) -> JsonValue {
    // Strategy A: a row locator plus a resolvable table gives a reference
    // for true streaming retrieval.
    if let Some(row_id) = row_id
        && !col.table.is_empty()
    {
        let kind = match value {
            SqlValue::TextLob(_) => LobKind::Text,
            _ => LobKind::Binary,
        };
        let schema = if col.schema.is_empty() {
            CURRENT_SCHEMA.to_string()
        } else {
            col.schema.clone()
        };
        return JsonValue::from(
            LobRef {
                schema,
                table: col.table.clone(),
                column: col.name.clone(),
                row_id: row_id.to_string(),
                kind,
            }
            .encode(),
        );
    }

    // Strategy B: bounded inline preview.
    JsonValue::from(match value {
        SqlValue::TextLob(text) => text_preview(text),
        SqlValue::BinaryLob(bytes) | SqlValue::Bytes(bytes) => binary_preview(bytes),
        _ => unreachable!("shape_lob_cell called on non-LOB value"),
    })
}

fn text_preview(text: &str) -> String {
    if text.chars().count() <= TEXT_PREVIEW_CHARS {
        text.to_string()
    } else {
        let head: String = text.chars().take(TEXT_PREVIEW_CHARS).collect();
        format!("{head}...")
    }
}

fn binary_preview(bytes: &[u8]) -> String {
    if bytes.len() > BINARY_PREVIEW_BYTES {
        "[LOB_TIP:type=BINARY,msg=payload too large,hint=select a ROWID column to enable preview and download]"
            .to_string()
    } else {
        format!("[LOB_B64:data={}]", BASE64.encode(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ColumnMeta;

    fn lob_result(with_rowid: bool, value: SqlValue) -> ResultSet {
        let mut columns = vec![ColumnMeta::with_source("PAYLOAD", "HR", "DOCS")];
        let mut row = vec![value];
        if with_rowid {
            columns.push(ColumnMeta::new("ROWID"));
            row.push(SqlValue::Text("AAAw3Q".into()));
        }
        ResultSet::new(columns, vec![row])
    }

    #[test]
    fn test_reference_emitted_when_row_locator_present() {
        let rs = lob_result(true, SqlValue::TextLob("big text".into()));
        let (rows, truncated) = shape_rows(&rs, 100);
        assert!(!truncated);
        assert_eq!(
            rows[0]["PAYLOAD"],
            "[LOB_REF:schema=HR,table=DOCS,col=PAYLOAD,rowId=AAAw3Q,type=TEXT]"
        );
    }

    #[test]
    fn test_binary_reference_kind() {
        let rs = lob_result(true, SqlValue::BinaryLob(vec![0u8; 64]));
        let (rows, _) = shape_rows(&rs, 100);
        let cell = rows[0]["PAYLOAD"].as_str().unwrap();
        assert!(cell.ends_with("type=BINARY]"), "got {cell}");
    }

    #[test]
    fn test_missing_schema_falls_back_to_placeholder() {
        let mut rs = lob_result(true, SqlValue::TextLob("t".into()));
        rs.columns[0].schema = String::new();
        let (rows, _) = shape_rows(&rs, 100);
        assert!(
            rows[0]["PAYLOAD"]
                .as_str()
                .unwrap()
                .contains("schema=CURRENT_SCHEMA")
        );
    }

    #[test]
    fn test_text_preview_truncated_without_locator() {
        let long = "a".repeat(TEXT_PREVIEW_CHARS + 10);
        let rs = lob_result(false, SqlValue::TextLob(long));
        let (rows, _) = shape_rows(&rs, 100);
        let cell = rows[0]["PAYLOAD"].as_str().unwrap();
        assert_eq!(cell.chars().count(), TEXT_PREVIEW_CHARS + 3);
        assert!(cell.ends_with("..."));
    }

    #[test]
    fn test_small_binary_previewed_as_base64() {
        let rs = lob_result(false, SqlValue::BinaryLob(vec![1, 2, 3]));
        let (rows, _) = shape_rows(&rs, 100);
        assert_eq!(
            rows[0]["PAYLOAD"],
            format!("[LOB_B64:data={}]", BASE64.encode([1u8, 2, 3]))
        );
    }

    #[test]
    fn test_oversized_binary_yields_hint_not_bytes() {
        let rs = lob_result(false, SqlValue::BinaryLob(vec![0u8; BINARY_PREVIEW_BYTES + 1]));
        let (rows, _) = shape_rows(&rs, 100);
        let cell = rows[0]["PAYLOAD"].as_str().unwrap();
        assert!(cell.starts_with("[LOB_TIP:type=BINARY"));
        assert!(!cell.contains("data="));
    }

    #[test]
    fn test_row_cap_truncates() {
        let columns = vec![ColumnMeta::new("ID")];
        let rows = (0..10).map(|i| vec![SqlValue::Integer(i)]).collect();
        let rs = ResultSet::new(columns, rows);

        let (shaped, truncated) = shape_rows(&rs, 5);
        assert_eq!(shaped.len(), 5);
        assert!(truncated);
    }

    #[test]
    fn test_plain_values_pass_through() {
        let columns = vec![ColumnMeta::new("ID"), ColumnMeta::new("NAME")];
        let rs = ResultSet::new(
            columns,
            vec![vec![SqlValue::Integer(7), SqlValue::Text("alice".into())]],
        );
        let (rows, _) = shape_rows(&rs, 100);
        assert_eq!(rows[0]["ID"], 7);
        assert_eq!(rows[0]["NAME"], "alice");
    }
}
