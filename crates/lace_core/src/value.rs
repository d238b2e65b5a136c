use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Maximum number of bytes a single text/blob cell may carry before it is
/// replaced by a placeholder. Mirrors the wire-size cap drivers enforce when
/// reading column data.
pub const MAX_FIELD_SIZE: usize = 1_048_576;

/// Typed database cell.
///
/// `is_null` is carried as its own variant rather than bolted onto every
/// other variant, so a typed cell can still be null without widening every
/// constructor into an `Option`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    /// JSON/JSONB stored as a string for exact round-trip preservation.
    Json(String),
    /// Decimal/numeric stored as a string to preserve exact precision.
    Decimal(String),
    /// Timestamp with time zone.
    DateTime(DateTime<Utc>),
    /// Date without a time component.
    Date(NaiveDate),
    /// Time without a date component.
    Time(NaiveTime),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Build a text value, replacing oversize payloads with a placeholder
    /// rather than carrying the full buffer.
    pub fn text_checked(s: impl Into<String>) -> Self {
        let s = s.into();
        if s.len() > MAX_FIELD_SIZE {
            Value::Text(format!("[DATA: {} bytes]", s.len()))
        } else {
            Value::Text(s)
        }
    }

    /// Build a blob value, replacing oversize payloads with a placeholder.
    pub fn bytes_checked(b: Vec<u8>) -> Self {
        if b.len() > MAX_FIELD_SIZE {
            Value::Text(format!("[DATA: {} bytes]", b.len()))
        } else {
            Value::Bytes(b)
        }
    }

    pub fn to_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(i) => Some(*i != 0),
            _ => None,
        }
    }

    pub fn to_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) => Some(*f as i64),
            Value::Bool(b) => Some(*b as i64),
            Value::Text(s) | Value::Decimal(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn to_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            Value::Text(s) | Value::Decimal(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn to_display_string(&self) -> String {
        self.to_display_string_truncated(1000)
    }

    /// Total rendering: never fails, never panics, always returns a string.
    /// Blobs render as raw text when every byte is printable ASCII or a
    /// UTF-8 continuation byte, else as a truncated hex literal.
    pub fn to_display_string_truncated(&self, max_len: usize) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Text(s) | Value::Json(s) | Value::Decimal(s) => {
                if s.chars().count() <= max_len {
                    s.clone()
                } else {
                    let truncated: String = s.chars().take(max_len).collect();
                    format!("{}...", truncated)
                }
            }
            Value::Bytes(b) => Self::display_blob(b),
            Value::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
            Value::Time(t) => t.format("%H:%M:%S").to_string(),
        }
    }

    fn display_blob(bytes: &[u8]) -> String {
        if bytes.is_empty() {
            return "x''".to_string();
        }

        if std::str::from_utf8(bytes).is_ok()
            && bytes
                .iter()
                .all(|b| b.is_ascii_graphic() || *b == b' ' || *b >= 0x80)
        {
            return String::from_utf8_lossy(bytes).into_owned();
        }

        let truncated = &bytes[..bytes.len().min(32)];
        let hex: String = truncated.iter().map(|b| format!("{:02x}", b)).collect();
        if bytes.len() > 32 {
            format!("x'{}…'", hex)
        } else {
            format!("x'{}'", hex)
        }
    }

    fn type_order(&self) -> u8 {
        match self {
            Value::Bool(_) => 0,
            Value::Int(_) => 1,
            Value::Float(_) => 2,
            Value::Decimal(_) => 3,
            Value::Text(_) => 4,
            Value::Json(_) => 5,
            Value::DateTime(_) => 6,
            Value::Date(_) => 7,
            Value::Time(_) => 8,
            Value::Bytes(_) => 9,
            Value::Null => 10,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_display_string())
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        use Value::*;

        match (self, other) {
            // Nulls sort last.
            (Null, Null) => Ordering::Equal,
            (Null, _) => Ordering::Greater,
            (_, Null) => Ordering::Less,

            (Bool(a), Bool(b)) => a.cmp(b),
            (Int(a), Int(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.total_cmp(b),
            (Text(a), Text(b)) => a.cmp(b),
            (Bytes(a), Bytes(b)) => a.cmp(b),
            (Json(a), Json(b)) => a.cmp(b),
            (Decimal(a), Decimal(b)) => a.cmp(b),
            (DateTime(a), DateTime(b)) => a.cmp(b),
            (Date(a), Date(b)) => a.cmp(b),
            (Time(a), Time(b)) => a.cmp(b),

            // Cross-type numeric promotion.
            (Int(a), Float(b)) => (*a as f64).total_cmp(b),
            (Float(a), Int(b)) => a.total_cmp(&(*b as f64)),

            _ => self.type_order().cmp(&other.type_order()),
        }
    }
}

impl Eq for Value {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_sorts_last() {
        let mut v = vec![Value::Int(5), Value::Null, Value::Int(1)];
        v.sort();
        assert_eq!(v, vec![Value::Int(1), Value::Int(5), Value::Null]);
    }

    #[test]
    fn display_is_total() {
        assert_eq!(Value::Null.to_display_string(), "NULL");
        assert_eq!(Value::Bytes(vec![]).to_display_string(), "x''");
        let hex = Value::Bytes(vec![0xff; 40]).to_display_string();
        assert!(hex.starts_with("x'") && hex.ends_with('…'));
    }

    #[test]
    fn oversize_text_becomes_placeholder() {
        let big = "a".repeat(MAX_FIELD_SIZE + 1);
        match Value::text_checked(big) {
            Value::Text(s) => assert!(s.starts_with("[DATA:")),
            _ => panic!("expected placeholder text"),
        }
    }

    #[test]
    fn int_float_cross_promotion() {
        assert_eq!(Value::Int(2).cmp(&Value::Float(2.5)), Ordering::Less);
    }
}
