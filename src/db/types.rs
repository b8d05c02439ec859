//! Row decoding into engine-neutral records.
//!
//! Decoding is two-phase:
//! 1. `categorize_type` classifies the column type name into a logical category
//! 2. an engine-specific decoder extracts the value for that category
//!
//! SQLite columns are classified by the storage class of the value itself, since
//! expression columns carry no declared type.

use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, Record};
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Decode, Row, Type, TypeInfo, ValueRef};

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Uuid,
    Timestamp,
    TimestampTz,
    Date,
    Time,
    Null,
    Unknown,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, db: DatabaseType) -> TypeCategory {
    let lower = type_name.to_lowercase();

    if lower == "null" {
        return TypeCategory::Null;
    }

    // Checked before floats: "numeric" also reads as a float name
    if lower.contains("decimal") || lower.contains("numeric") {
        if db == DatabaseType::SQLite {
            return TypeCategory::Float;
        }
        return TypeCategory::Decimal;
    }

    if lower == "timestamptz" {
        return TypeCategory::TimestampTz;
    }
    if lower == "timestamp" || lower == "datetime" {
        return TypeCategory::Timestamp;
    }
    if lower == "date" {
        return TypeCategory::Date;
    }
    if lower == "time" {
        return TypeCategory::Time;
    }

    if (lower.contains("int") && lower != "interval")
        || lower.contains("serial")
        || lower.contains("tiny")
    {
        return TypeCategory::Integer;
    }

    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    if lower.contains("float") || lower.contains("double") || lower == "real" {
        return TypeCategory::Float;
    }

    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }

    if lower == "uuid" {
        return TypeCategory::Uuid;
    }

    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }

    if lower.contains("char") || lower.contains("text") || lower == "name" {
        return TypeCategory::Text;
    }

    TypeCategory::Unknown
}

/// Wrapper type for raw DECIMAL/NUMERIC values as strings.
/// Keeps the exact database representation.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        <String as Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::Postgres>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

/// Binary values are carried as base64 strings.
pub fn encode_binary(bytes: &[u8]) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    JsonValue::String(STANDARD.encode(bytes))
}

fn float_value(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

/// Map a decoded column, keeping SQL NULL as JSON null and failures as errors.
fn decoded<T>(
    value: Result<Option<T>, sqlx::Error>,
    map: impl FnOnce(T) -> JsonValue,
) -> DbResult<JsonValue> {
    Ok(value?.map_or(JsonValue::Null, map))
}

/// Conversion of a driver row into a [`Record`].
///
/// A column that cannot be decoded fails the whole row.
pub trait RowToRecord {
    fn to_record(&self) -> DbResult<Record>;
}

impl RowToRecord for MySqlRow {
    fn to_record(&self) -> DbResult<Record> {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let category = categorize_type(col.type_info().name(), DatabaseType::MySQL);
                let value = mysql::decode_column(self, idx, category)?;
                Ok::<_, DbError>((col.name().to_string(), value))
            })
            .collect()
    }
}

impl RowToRecord for PgRow {
    fn to_record(&self) -> DbResult<Record> {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let category = categorize_type(col.type_info().name(), DatabaseType::PostgreSQL);
                let value = postgres::decode_column(self, idx, category)?;
                Ok::<_, DbError>((col.name().to_string(), value))
            })
            .collect()
    }
}

impl RowToRecord for SqliteRow {
    fn to_record(&self) -> DbResult<Record> {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                Ok::<_, DbError>((col.name().to_string(), sqlite::decode_column(self, idx)?))
            })
            .collect()
    }
}

mod mysql {
    use super::*;

    pub fn decode_column(row: &MySqlRow, idx: usize, category: TypeCategory) -> DbResult<JsonValue> {
        match category {
            TypeCategory::Null => Ok(JsonValue::Null),
            TypeCategory::Decimal => decoded(row.try_get::<Option<RawDecimal>, _>(idx), |v| {
                JsonValue::String(v.0)
            }),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => decoded(row.try_get::<Option<bool>, _>(idx), JsonValue::Bool),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => {
                decoded(row.try_get::<Option<Vec<u8>>, _>(idx), |v| encode_binary(&v))
            }
            TypeCategory::Json => decoded(row.try_get::<Option<JsonValue>, _>(idx), |v| v),
            TypeCategory::Timestamp => decoded(
                row.try_get::<Option<chrono::NaiveDateTime>, _>(idx),
                |v| JsonValue::String(v.and_utc().to_rfc3339()),
            ),
            TypeCategory::TimestampTz => decoded(
                row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx),
                |v| JsonValue::String(v.to_rfc3339()),
            ),
            TypeCategory::Date => decoded(row.try_get::<Option<chrono::NaiveDate>, _>(idx), |v| {
                JsonValue::String(v.to_string())
            }),
            TypeCategory::Time => decoded(row.try_get::<Option<chrono::NaiveTime>, _>(idx), |v| {
                JsonValue::String(v.to_string())
            }),
            _ => decode_text(row, idx),
        }
    }

    // Signed first; unsigned columns reject signed decoding. The last attempt reports
    // the error.
    fn decode_integer(row: &MySqlRow, idx: usize) -> DbResult<JsonValue> {
        let number = |v: i64| JsonValue::Number(v.into());
        if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
            return Ok(v.map_or(JsonValue::Null, number));
        }
        if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
            return Ok(v.map_or(JsonValue::Null, |v| number(v.into())));
        }
        if let Ok(v) = row.try_get::<Option<i8>, _>(idx) {
            return Ok(v.map_or(JsonValue::Null, |v| number(v.into())));
        }
        if let Ok(v) = row.try_get::<Option<u64>, _>(idx) {
            return Ok(v.map_or(JsonValue::Null, |v| JsonValue::Number(v.into())));
        }
        if let Ok(v) = row.try_get::<Option<u32>, _>(idx) {
            return Ok(v.map_or(JsonValue::Null, |v| JsonValue::Number(v.into())));
        }
        decoded(row.try_get::<Option<u8>, _>(idx), |v| JsonValue::Number(v.into()))
    }

    fn decode_float(row: &MySqlRow, idx: usize) -> DbResult<JsonValue> {
        if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
            return Ok(v.map_or(JsonValue::Null, float_value));
        }
        decoded(row.try_get::<Option<f32>, _>(idx), |v| float_value(v.into()))
    }

    fn decode_text(row: &MySqlRow, idx: usize) -> DbResult<JsonValue> {
        if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
            return Ok(v.map_or(JsonValue::Null, JsonValue::String));
        }
        // VARBINARY-backed strings from expressions
        decoded(row.try_get::<Option<Vec<u8>>, _>(idx), |v| {
            match String::from_utf8(v) {
                Ok(s) => JsonValue::String(s),
                Err(e) => encode_binary(e.as_bytes()),
            }
        })
    }
}

mod postgres {
    use super::*;

    pub fn decode_column(row: &PgRow, idx: usize, category: TypeCategory) -> DbResult<JsonValue> {
        match category {
            TypeCategory::Null => Ok(JsonValue::Null),
            TypeCategory::Decimal => decoded(row.try_get::<Option<RawDecimal>, _>(idx), |v| {
                JsonValue::String(v.0)
            }),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => decoded(row.try_get::<Option<bool>, _>(idx), JsonValue::Bool),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => {
                decoded(row.try_get::<Option<Vec<u8>>, _>(idx), |v| encode_binary(&v))
            }
            TypeCategory::Json => decoded(row.try_get::<Option<JsonValue>, _>(idx), |v| v),
            TypeCategory::Uuid => decoded(row.try_get::<Option<uuid::Uuid>, _>(idx), |v| {
                JsonValue::String(v.to_string())
            }),
            TypeCategory::Timestamp => decoded(
                row.try_get::<Option<chrono::NaiveDateTime>, _>(idx),
                |v| JsonValue::String(v.and_utc().to_rfc3339()),
            ),
            TypeCategory::TimestampTz => decoded(
                row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx),
                |v| JsonValue::String(v.to_rfc3339()),
            ),
            TypeCategory::Date => decoded(row.try_get::<Option<chrono::NaiveDate>, _>(idx), |v| {
                JsonValue::String(v.to_string())
            }),
            TypeCategory::Time => decoded(row.try_get::<Option<chrono::NaiveTime>, _>(idx), |v| {
                JsonValue::String(v.to_string())
            }),
            // types without a decoder (inet, interval, ...) fail here; cast them to text
            _ => decoded(row.try_get::<Option<String>, _>(idx), JsonValue::String),
        }
    }

    fn decode_integer(row: &PgRow, idx: usize) -> DbResult<JsonValue> {
        if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
            return Ok(v.map_or(JsonValue::Null, |v| JsonValue::Number(v.into())));
        }
        if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
            return Ok(v.map_or(JsonValue::Null, |v| JsonValue::Number(v.into())));
        }
        decoded(row.try_get::<Option<i16>, _>(idx), |v| JsonValue::Number(v.into()))
    }

    fn decode_float(row: &PgRow, idx: usize) -> DbResult<JsonValue> {
        if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
            return Ok(v.map_or(JsonValue::Null, float_value));
        }
        decoded(row.try_get::<Option<f32>, _>(idx), |v| float_value(v.into()))
    }
}

mod sqlite {
    use super::*;

    pub fn decode_column(row: &SqliteRow, idx: usize) -> DbResult<JsonValue> {
        let raw = row.try_get_raw(idx)?;
        if raw.is_null() {
            return Ok(JsonValue::Null);
        }
        let storage = raw.type_info().name().to_uppercase();

        match storage.as_str() {
            "INTEGER" | "BOOLEAN" => {
                decoded(row.try_get_unchecked::<Option<i64>, _>(idx), |v| {
                    JsonValue::Number(v.into())
                })
            }
            "REAL" | "NUMERIC" => {
                decoded(row.try_get_unchecked::<Option<f64>, _>(idx), float_value)
            }
            "BLOB" => decoded(row.try_get_unchecked::<Option<Vec<u8>>, _>(idx), |v| {
                encode_binary(&v)
            }),
            _ => decoded(
                row.try_get_unchecked::<Option<String>, _>(idx),
                JsonValue::String,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorize_type_integer() {
        assert_eq!(
            categorize_type("INT", DatabaseType::MySQL),
            TypeCategory::Integer
        );
        assert_eq!(
            categorize_type("BIGINT", DatabaseType::PostgreSQL),
            TypeCategory::Integer
        );
        assert_eq!(
            categorize_type("TINYINT UNSIGNED", DatabaseType::MySQL),
            TypeCategory::Integer
        );
    }

    #[test]
    fn test_categorize_type_decimal() {
        assert_eq!(
            categorize_type("DECIMAL", DatabaseType::MySQL),
            TypeCategory::Decimal
        );
        assert_eq!(
            categorize_type("NUMERIC", DatabaseType::PostgreSQL),
            TypeCategory::Decimal
        );
        assert_eq!(
            categorize_type("numeric", DatabaseType::SQLite),
            TypeCategory::Float
        );
    }

    #[test]
    fn test_categorize_type_temporal() {
        assert_eq!(
            categorize_type("TIMESTAMPTZ", DatabaseType::PostgreSQL),
            TypeCategory::TimestampTz
        );
        assert_eq!(
            categorize_type("DATETIME", DatabaseType::MySQL),
            TypeCategory::Timestamp
        );
        assert_eq!(
            categorize_type("DATE", DatabaseType::MySQL),
            TypeCategory::Date
        );
    }

    #[test]
    fn test_categorize_type_text_and_null() {
        assert_eq!(
            categorize_type("VARCHAR", DatabaseType::MySQL),
            TypeCategory::Text
        );
        assert_eq!(
            categorize_type("NULL", DatabaseType::MySQL),
            TypeCategory::Null
        );
        assert_eq!(
            categorize_type("INET", DatabaseType::PostgreSQL),
            TypeCategory::Unknown
        );
    }

    #[test]
    fn test_encode_binary() {
        assert_eq!(
            encode_binary(b"hello world"),
            JsonValue::String("aGVsbG8gd29ybGQ=".to_string())
        );
        assert_eq!(encode_binary(&[]), JsonValue::String(String::new()));
    }

    #[test]
    fn test_float_value_non_finite_falls_back_to_string() {
        assert_eq!(float_value(1.5), serde_json::json!(1.5));
        assert_eq!(float_value(f64::NAN), JsonValue::String("NaN".to_string()));
    }
}
