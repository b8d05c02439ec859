//! Query-related data models.
//!
//! This module defines statement parameters and the engine-neutral shapes returned by
//! statements and queries.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A parameter value for parameterized statements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Param {
    /// NULL value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    Text(String),
    /// Binary data (base64 encoded in JSON)
    #[serde(with = "base64_bytes")]
    Bytes(Vec<u8>),
}

impl Param {
    /// Check if this parameter is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this parameter for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
        }
    }

    /// Interpret a command-line argument: null, booleans and numbers are recognized,
    /// anything else is text.
    pub fn parse_literal(s: &str) -> Self {
        if s.eq_ignore_ascii_case("null") {
            Self::Null
        } else if s.eq_ignore_ascii_case("true") {
            Self::Bool(true)
        } else if s.eq_ignore_ascii_case("false") {
            Self::Bool(false)
        } else if let Ok(v) = s.parse::<i64>() {
            Self::Int(v)
        } else if let Ok(v) = s.parse::<f64>() {
            Self::Float(v)
        } else {
            Self::Text(s.to_string())
        }
    }
}

impl From<bool> for Param {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Param {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<i64> for Param {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u32> for Param {
    fn from(v: u32) -> Self {
        Self::Int(v.into())
    }
}

impl From<f64> for Param {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Param {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Param {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<Vec<u8>> for Param {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl<T: Into<Param>> From<Option<T>> for Param {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

/// Custom serialization for binary data as base64.
mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Outcome of a statement that does not return rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExecResult {
    pub rows_affected: u64,
    /// Only reported by MySQL and SQLite.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_insert_id: Option<i64>,
}

impl From<sqlx::mysql::MySqlQueryResult> for ExecResult {
    fn from(result: sqlx::mysql::MySqlQueryResult) -> Self {
        Self {
            rows_affected: result.rows_affected(),
            last_insert_id: Some(result.last_insert_id())
                .filter(|id| *id != 0)
                .and_then(|id| i64::try_from(id).ok()),
        }
    }
}

impl From<sqlx::postgres::PgQueryResult> for ExecResult {
    fn from(result: sqlx::postgres::PgQueryResult) -> Self {
        Self {
            rows_affected: result.rows_affected(),
            last_insert_id: None,
        }
    }
}

impl From<sqlx::sqlite::SqliteQueryResult> for ExecResult {
    fn from(result: sqlx::sqlite::SqliteQueryResult) -> Self {
        Self {
            rows_affected: result.rows_affected(),
            last_insert_id: Some(result.last_insert_rowid()).filter(|id| *id != 0),
        }
    }
}

/// One result row, keyed by column name in select order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(serde_json::Map<String, JsonValue>);

impl Record {
    pub fn new(columns: serde_json::Map<String, JsonValue>) -> Self {
        Self(columns)
    }

    pub fn get(&self, column: &str) -> Option<&JsonValue> {
        self.0.get(column)
    }

    pub fn get_i64(&self, column: &str) -> Option<i64> {
        self.get(column).and_then(JsonValue::as_i64)
    }

    pub fn get_f64(&self, column: &str) -> Option<f64> {
        self.get(column).and_then(JsonValue::as_f64)
    }

    pub fn get_bool(&self, column: &str) -> Option<bool> {
        match self.get(column)? {
            JsonValue::Bool(v) => Some(*v),
            // SQLite and MySQL report booleans as integers
            JsonValue::Number(n) => n.as_i64().map(|v| v != 0),
            _ => None,
        }
    }

    pub fn get_str(&self, column: &str) -> Option<&str> {
        self.get(column).and_then(JsonValue::as_str)
    }

    /// True when the column exists and holds NULL.
    pub fn is_null(&self, column: &str) -> bool {
        matches!(self.get(column), Some(JsonValue::Null))
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_map(self) -> serde_json::Map<String, JsonValue> {
        self.0
    }
}

impl FromIterator<(String, JsonValue)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, JsonValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_from_conversions() {
        assert_eq!(Param::from(5), Param::Int(5));
        assert_eq!(Param::from("a"), Param::Text("a".to_string()));
        assert_eq!(Param::from(None::<i64>), Param::Null);
        assert_eq!(Param::from(Some(true)), Param::Bool(true));
        assert!(Param::from(None::<String>).is_null());
    }

    #[test]
    fn test_param_parse_literal() {
        assert_eq!(Param::parse_literal("NULL"), Param::Null);
        assert_eq!(Param::parse_literal("true"), Param::Bool(true));
        assert_eq!(Param::parse_literal("42"), Param::Int(42));
        assert_eq!(Param::parse_literal("2.5"), Param::Float(2.5));
        assert_eq!(Param::parse_literal("alice"), Param::Text("alice".to_string()));
    }

    #[test]
    fn test_param_bytes_serialize_as_base64() {
        let json = serde_json::to_string(&Param::Bytes(b"hi".to_vec())).unwrap();
        assert_eq!(json, "\"aGk=\"");
    }

    #[test]
    fn test_record_accessors() {
        let record: Record = [
            ("id".to_string(), serde_json::json!(7)),
            ("name".to_string(), serde_json::json!("bob")),
            ("flag".to_string(), serde_json::json!(1)),
            ("note".to_string(), JsonValue::Null),
        ]
        .into_iter()
        .collect();

        assert_eq!(record.get_i64("id"), Some(7));
        assert_eq!(record.get_str("name"), Some("bob"));
        assert_eq!(record.get_bool("flag"), Some(true));
        assert!(record.is_null("note"));
        assert!(!record.is_null("missing"));
        assert_eq!(record.columns().collect::<Vec<_>>(), ["id", "name", "flag", "note"]);
    }
}
