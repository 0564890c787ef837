//! Dialect-specific textual transforms.
//!
//! Pure string functions, unit-testable without a live database. The only
//! cross-dialect differences this core carries are pagination and
//! identifier quoting; everything else in a statement passes through
//! untouched.

use crate::core::Dialect;

/// Wrap a query with pagination for the given dialect.
///
/// The native engine understands `LIMIT .. OFFSET ..`. The
/// Oracle-compatible dialect (11g-era) has no FETCH clause, so the query is
/// wrapped in the classic three-layer ROWNUM form: the inner layer is the
/// original query (its ORDER BY intact), the middle layer caps `ROWNUM` at
/// the end row, and the outer layer drops everything at or below the
/// offset.
pub fn paginate(dialect: Dialect, sql: &str, offset: u64, limit: u64) -> String {
    match dialect {
        Dialect::Dm => format!("{sql} LIMIT {limit} OFFSET {offset}"),
        Dialect::Oracle => {
            let end_row = offset + limit;
            format!(
                "SELECT * FROM ( SELECT TMP_PAGE.*, ROWNUM ROW_ID FROM ( {sql} ) TMP_PAGE \
                 WHERE ROWNUM <= {end_row} ) WHERE ROW_ID > {offset}"
            )
        }
    }
}

/// Quote an identifier, doubling embedded quotes. Both dialects use ANSI
/// double-quote folding.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Fully qualified, quoted `schema.table` reference.
pub fn qualified_table(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}
