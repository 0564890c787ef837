use serde_json::Value as JsonValue;

/// Runtime value read from a result column.
///
/// The driver layer tags large-object columns (`TextLob`, `BinaryLob`) when
/// it reads the declared column type, so downstream code never has to sniff
/// vendor-specific runtime types. Plain `Bytes` covers short binary columns
/// (RAW and friends) that fit inline.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Text(String),
    Bytes(Vec<u8>),
    TextLob(String),
    BinaryLob(Vec<u8>),
}

impl SqlValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Integer(_) => "INTEGER",
            Self::Float(_) => "FLOAT",
            Self::Boolean(_) => "BOOLEAN",
            Self::Text(_) => "TEXT",
            Self::Bytes(_) => "BYTES",
            Self::TextLob(_) => "TEXT_LOB",
            Self::BinaryLob(_) => "BINARY_LOB",
        }
    }

    /// True for values that must go through the LOB shaping protocol
    /// instead of being inlined verbatim.
    pub fn is_lob(&self) -> bool {
        matches!(
            self,
            Self::Bytes(_) | Self::TextLob(_) | Self::BinaryLob(_)
        )
    }

    /// Convert a non-LOB value to its transport representation.
    ///
    /// LOB variants are handled by the shaping layer; calling this on one
    /// yields a placeholder rather than the raw payload.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Null => JsonValue::Null,
            Self::Integer(i) => JsonValue::from(*i),
            Self::Float(f) => {
                serde_json::Number::from_f64(*f).map_or(JsonValue::Null, JsonValue::Number)
            }
            Self::Boolean(b) => JsonValue::from(*b),
            Self::Text(s) => JsonValue::from(s.clone()),
            Self::Bytes(_) | Self::BinaryLob(_) => JsonValue::from("[BINARY]"),
            Self::TextLob(_) => JsonValue::from("[TEXT_LOB]"),
        }
    }

    /// Render as a plain string, for conflict-value reporting.
    pub fn display_string(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Integer(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Boolean(b) => b.to_string(),
            Self::Text(s) | Self::TextLob(s) => s.clone(),
            Self::Bytes(b) | Self::BinaryLob(b) => format!("<{} bytes>", b.len()),
        }
    }
}
