//! Statement text preparation.
//!
//! Uniform across dialects: comments go, one trailing terminator goes, and
//! vendor noise is stripped from error messages before they surface.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// Block comments and line comments, multi-line aware.
    static ref COMMENT_RE: Regex = Regex::new(r"(?s)/\*.*?\*/|--[^\r\n]*").unwrap();

    /// Leading driver/vendor tags on error messages, e.g. "[driver] " or
    /// repeated "Error: " prefixes.
    static ref VENDOR_PREFIX_RE: Regex =
        Regex::new(r"(?i)^(\s*(\[[^\]]*\]|error:|sqlexception:)\s*)+").unwrap();

    static ref WHITESPACE_RE: Regex = Regex::new(r"\s+").unwrap();
}

/// Strip comments, surrounding whitespace, and a single trailing `;`.
pub fn clean_statement(sql: &str) -> String {
    let without_comments = COMMENT_RE.replace_all(sql, "\n");
    let mut cleaned = without_comments.trim();
    if let Some(stripped) = cleaned.strip_suffix(';') {
        cleaned = stripped.trim_end();
    }
    cleaned.to_string()
}

/// Recognize a bare transaction-control command after cleanup.
pub fn is_commit(sql: &str) -> bool {
    sql.eq_ignore_ascii_case("COMMIT")
}

pub fn is_rollback(sql: &str) -> bool {
    sql.eq_ignore_ascii_case("ROLLBACK")
}

/// Shorten statement text for log and script-outcome reporting.
pub fn truncate_sql(sql: &str, max_chars: usize) -> String {
    let trimmed = sql.trim();
    if trimmed.chars().count() <= max_chars {
        trimmed.to_string()
    } else {
        let head: String = trimmed.chars().take(max_chars).collect();
        format!("{head}...")
    }
}

/// Clean a vendor error message for surfacing: drop bracketed driver tags
/// and stock prefixes, collapse whitespace.
pub fn clean_vendor_message(msg: &str) -> String {
    let trimmed = msg.trim();
    let stripped = VENDOR_PREFIX_RE.replace(trimmed, "");
    let collapsed = WHITESPACE_RE.replace_all(stripped.trim(), " ");
    if collapsed.is_empty() {
        "unknown database error".to_string()
    } else {
        collapsed.to_string()
    }
}
