//! Row decoding into [`SqlValue`].
//!
//! # Architecture
//!
//! Decoding uses a two-phase approach:
//! 1. `TypeCategory` classifies column types into logical categories
//! 2. Engine-specific decoders handle the actual value extraction
//!
//! SQLite is dynamically typed, so its decoder looks at the storage class of
//! each value rather than the declared column type.

use crate::db::Dialect;
use crate::models::{Row as ResultRow, SqlValue};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Decode, Row, Type, TypeInfo, ValueRef};

// =============================================================================
// Type Classification
// =============================================================================

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
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Unknown,
}

const INTEGER_TYPES: &[&str] = &[
    "int", "int2", "int4", "int8", "integer", "smallint", "bigint", "tinyint", "mediumint",
    "serial", "smallserial", "bigserial", "year",
];

const FLOAT_TYPES: &[&str] = &["float", "float4", "float8", "double", "double precision", "real"];

const TEXT_TYPES: &[&str] = &[
    "text", "varchar", "char", "bpchar", "name", "character", "character varying", "citext",
    "tinytext", "mediumtext", "longtext", "enum", "set",
];

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, dialect: Dialect) -> TypeCategory {
    let lower = type_name.trim().to_lowercase();
    // "INT UNSIGNED", "VARCHAR(20)" -> "int", "varchar"
    let base = lower
        .trim_end_matches(" unsigned")
        .split('(')
        .next()
        .unwrap_or_default()
        .trim();

    if base == "bool" || base == "boolean" {
        return TypeCategory::Boolean;
    }
    if base == "decimal" || base == "numeric" {
        // SQLite's NUMERIC affinity stores plain numbers
        if dialect == Dialect::Sqlite {
            return TypeCategory::Float;
        }
        return TypeCategory::Decimal;
    }
    if INTEGER_TYPES.contains(&base) {
        return TypeCategory::Integer;
    }
    if FLOAT_TYPES.contains(&base) {
        return TypeCategory::Float;
    }
    if base == "json" || base == "jsonb" {
        return TypeCategory::Json;
    }
    if base == "uuid" {
        return TypeCategory::Uuid;
    }
    match base {
        "date" => return TypeCategory::Date,
        "time" => return TypeCategory::Time,
        "timestamp" | "datetime" => return TypeCategory::Timestamp,
        "timestamptz" => return TypeCategory::TimestampTz,
        _ => {}
    }
    if base == "bytea" || base.contains("blob") || base.contains("binary") {
        return TypeCategory::Binary;
    }
    if TEXT_TYPES.contains(&base) {
        return TypeCategory::Text;
    }
    TypeCategory::Unknown
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// Wrapper type for raw DECIMAL/NUMERIC values as strings.
/// This preserves the exact database representation.
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

// =============================================================================
// Row Conversion Trait
// =============================================================================

/// Convert a driver row into an ordered result row.
pub trait DecodeRow {
    fn to_result_row(&self) -> ResultRow;
    /// `(name, declared type)` for every column.
    fn column_types(&self) -> Vec<(String, String)>;
}

impl DecodeRow for MySqlRow {
    fn to_result_row(&self) -> ResultRow {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let type_name = col.type_info().name();
                let category = categorize_type(type_name, Dialect::MySql);
                (col.name().to_string(), mysql::decode_column(self, idx, category))
            })
            .collect()
    }

    fn column_types(&self) -> Vec<(String, String)> {
        column_types(self.columns())
    }
}

impl DecodeRow for PgRow {
    fn to_result_row(&self) -> ResultRow {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let type_name = col.type_info().name();
                let category = categorize_type(type_name, Dialect::Postgres);
                (col.name().to_string(), postgres::decode_column(self, idx, category))
            })
            .collect()
    }

    fn column_types(&self) -> Vec<(String, String)> {
        column_types(self.columns())
    }
}

impl DecodeRow for SqliteRow {
    fn to_result_row(&self) -> ResultRow {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let declared = categorize_type(col.type_info().name(), Dialect::Sqlite);
                (col.name().to_string(), sqlite::decode_column(self, idx, declared))
            })
            .collect()
    }

    fn column_types(&self) -> Vec<(String, String)> {
        column_types(self.columns())
    }
}

/// `(name, type)` pairs for a column list (rows or prepared statements).
pub fn column_types<C: Column>(columns: &[C]) -> Vec<(String, String)> {
    columns
        .iter()
        .map(|c| (c.name().to_string(), c.type_info().name().to_string()))
        .collect()
}

// =============================================================================
// Engine-Specific Decoders
// =============================================================================

mod mysql {
    use super::*;

    pub fn decode_column(row: &MySqlRow, idx: usize, category: TypeCategory) -> SqlValue {
        if row.try_get_raw(idx).is_ok_and(|v| v.is_null()) {
            return SqlValue::Null;
        }
        match category {
            TypeCategory::Decimal => decode_decimal(row, idx),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => decode_boolean(row, idx),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => decode_binary(row, idx),
            TypeCategory::Json => decode_json(row, idx),
            TypeCategory::Date => row
                .try_get::<NaiveDate, _>(idx)
                .map(SqlValue::Date)
                .unwrap_or_else(|_| decode_text(row, idx)),
            TypeCategory::Time => row
                .try_get::<NaiveTime, _>(idx)
                .map(SqlValue::Time)
                .unwrap_or_else(|_| decode_text(row, idx)),
            TypeCategory::Timestamp | TypeCategory::TimestampTz => row
                .try_get::<NaiveDateTime, _>(idx)
                .map(SqlValue::DateTime)
                .unwrap_or_else(|_| decode_text(row, idx)),
            _ => decode_text(row, idx),
        }
    }

    fn decode_decimal(row: &MySqlRow, idx: usize) -> SqlValue {
        match row.try_get::<RawDecimal, _>(idx) {
            Ok(v) => SqlValue::Decimal(v.0),
            Err(e) => {
                tracing::error!("Failed to decode DECIMAL: {:?}", e);
                SqlValue::Null
            }
        }
    }

    fn decode_integer(row: &MySqlRow, idx: usize) -> SqlValue {
        // Try signed types
        if let Ok(v) = row.try_get::<i8, _>(idx) {
            return SqlValue::Int(v.into());
        }
        if let Ok(v) = row.try_get::<i16, _>(idx) {
            return SqlValue::Int(v.into());
        }
        if let Ok(v) = row.try_get::<i32, _>(idx) {
            return SqlValue::Int(v.into());
        }
        if let Ok(v) = row.try_get::<i64, _>(idx) {
            return SqlValue::Int(v);
        }
        // Try unsigned types
        if let Ok(v) = row.try_get::<u8, _>(idx) {
            return SqlValue::Int(v.into());
        }
        if let Ok(v) = row.try_get::<u16, _>(idx) {
            return SqlValue::Int(v.into());
        }
        if let Ok(v) = row.try_get::<u32, _>(idx) {
            return SqlValue::Int(v.into());
        }
        if let Ok(v) = row.try_get::<u64, _>(idx) {
            return SqlValue::UInt(v);
        }
        decode_text(row, idx)
    }

    fn decode_boolean(row: &MySqlRow, idx: usize) -> SqlValue {
        row.try_get::<bool, _>(idx)
            .map(SqlValue::Bool)
            .unwrap_or_else(|_| decode_integer(row, idx))
    }

    fn decode_float(row: &MySqlRow, idx: usize) -> SqlValue {
        if let Ok(v) = row.try_get::<f64, _>(idx) {
            return SqlValue::Float(v);
        }
        if let Ok(v) = row.try_get::<f32, _>(idx) {
            return SqlValue::Float(v.into());
        }
        SqlValue::Null
    }

    fn decode_binary(row: &MySqlRow, idx: usize) -> SqlValue {
        row.try_get::<Vec<u8>, _>(idx)
            .map(SqlValue::Bytes)
            .unwrap_or(SqlValue::Null)
    }

    fn decode_json(row: &MySqlRow, idx: usize) -> SqlValue {
        // MySQL JSON type should be decoded as serde_json::Value directly
        row.try_get::<serde_json::Value, _>(idx)
            .map(SqlValue::Json)
            .unwrap_or_else(|_| decode_text(row, idx))
    }

    /// Strings that sqlx reports as binary (utf8 vs binary collations) are
    /// read back as bytes and kept as text when valid UTF-8.
    fn decode_text(row: &MySqlRow, idx: usize) -> SqlValue {
        if let Ok(v) = row.try_get::<String, _>(idx) {
            return SqlValue::Text(v);
        }
        match row.try_get_unchecked::<Vec<u8>, _>(idx) {
            Ok(bytes) => match String::from_utf8(bytes) {
                Ok(s) => SqlValue::Text(s),
                Err(e) => SqlValue::Bytes(e.into_bytes()),
            },
            Err(_) => SqlValue::Null,
        }
    }
}

mod postgres {
    use super::*;
    use sqlx::postgres::PgValueFormat;

    pub fn decode_column(row: &PgRow, idx: usize, category: TypeCategory) -> SqlValue {
        if row.try_get_raw(idx).is_ok_and(|v| v.is_null()) {
            return SqlValue::Null;
        }
        match category {
            TypeCategory::Decimal => decode_decimal(row, idx),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => row
                .try_get::<bool, _>(idx)
                .map(SqlValue::Bool)
                .unwrap_or(SqlValue::Null),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => row
                .try_get::<Vec<u8>, _>(idx)
                .map(SqlValue::Bytes)
                .unwrap_or(SqlValue::Null),
            TypeCategory::Json => row
                .try_get::<serde_json::Value, _>(idx)
                .map(SqlValue::Json)
                .unwrap_or(SqlValue::Null),
            TypeCategory::Uuid => decode_uuid(row, idx),
            TypeCategory::Date => row
                .try_get::<NaiveDate, _>(idx)
                .map(SqlValue::Date)
                .unwrap_or(SqlValue::Null),
            TypeCategory::Time => row
                .try_get::<NaiveTime, _>(idx)
                .map(SqlValue::Time)
                .unwrap_or(SqlValue::Null),
            TypeCategory::Timestamp => row
                .try_get::<NaiveDateTime, _>(idx)
                .map(SqlValue::DateTime)
                .unwrap_or(SqlValue::Null),
            TypeCategory::TimestampTz => row
                .try_get::<DateTime<Utc>, _>(idx)
                .map(|v| SqlValue::TimestampTz(v.fixed_offset()))
                .unwrap_or(SqlValue::Null),
            _ => decode_text(row, idx),
        }
    }

    fn decode_decimal(row: &PgRow, idx: usize) -> SqlValue {
        match row.try_get_raw(idx).ok().and_then(decimal_text) {
            Some(s) => SqlValue::Decimal(s),
            None => {
                tracing::error!(column = idx, "Failed to decode NUMERIC");
                SqlValue::Null
            }
        }
    }

    /// Exact text of a NUMERIC value, from either wire format.
    fn decimal_text(value: PgValueRef<'_>) -> Option<String> {
        if value.format() == PgValueFormat::Text {
            return value.as_str().ok().map(str::to_string);
        }
        numeric_from_binary(value.as_bytes().ok()?)
    }

    /// Binary NUMERIC: ndigits, weight, sign, dscale, then base-10000 digits.
    pub(super) fn numeric_from_binary(bytes: &[u8]) -> Option<String> {
        let word = |i: usize| -> Option<i16> {
            let b = bytes.get(i * 2..i * 2 + 2)?;
            Some(i16::from_be_bytes([b[0], b[1]]))
        };
        let ndigits = word(0)?.max(0) as usize;
        let weight = i32::from(word(1)?);
        let sign = word(2)? as u16;
        let dscale = word(3)?.max(0) as usize;
        match sign {
            0xC000 => return Some("NaN".to_string()),
            0xD000 => return Some("Infinity".to_string()),
            0xF000 => return Some("-Infinity".to_string()),
            _ => {}
        }
        let digits: Vec<i16> = (0..ndigits).filter_map(|i| word(4 + i)).collect();
        let digit_at = |pos: i32| -> i16 {
            usize::try_from(pos)
                .ok()
                .and_then(|p| digits.get(p).copied())
                .unwrap_or(0)
        };

        let mut int_part = String::new();
        for pos in 0..=weight {
            let d = digit_at(pos);
            if int_part.is_empty() {
                int_part.push_str(&d.to_string());
            } else {
                int_part.push_str(&format!("{d:04}"));
            }
        }
        if int_part.is_empty() {
            int_part.push('0');
        }

        let mut frac = String::new();
        let mut pos = weight + 1;
        while frac.len() < dscale {
            frac.push_str(&format!("{:04}", digit_at(pos)));
            pos += 1;
        }
        frac.truncate(dscale);

        let mut out = String::new();
        if sign == 0x4000 {
            out.push('-');
        }
        out.push_str(&int_part);
        if dscale > 0 {
            out.push('.');
            out.push_str(&frac);
        }
        Some(out)
    }

    fn decode_integer(row: &PgRow, idx: usize) -> SqlValue {
        if let Ok(v) = row.try_get::<i16, _>(idx) {
            return SqlValue::Int(v.into());
        }
        if let Ok(v) = row.try_get::<i32, _>(idx) {
            return SqlValue::Int(v.into());
        }
        if let Ok(v) = row.try_get::<i64, _>(idx) {
            return SqlValue::Int(v);
        }
        SqlValue::Null
    }

    fn decode_float(row: &PgRow, idx: usize) -> SqlValue {
        if let Ok(v) = row.try_get::<f64, _>(idx) {
            return SqlValue::Float(v);
        }
        if let Ok(v) = row.try_get::<f32, _>(idx) {
            return SqlValue::Float(v.into());
        }
        SqlValue::Null
    }

    fn decode_uuid(row: &PgRow, idx: usize) -> SqlValue {
        let Ok(value) = row.try_get_raw(idx) else {
            return SqlValue::Null;
        };
        if value.format() == PgValueFormat::Text {
            return value
                .as_str()
                .map(|s| SqlValue::Text(s.to_string()))
                .unwrap_or(SqlValue::Null);
        }
        value
            .as_bytes()
            .ok()
            .and_then(|b| uuid::Uuid::from_slice(b).ok())
            .map(|u| SqlValue::Text(u.to_string()))
            .unwrap_or(SqlValue::Null)
    }

    /// Text-like and unknown types (enums, domains). Payloads that are not
    /// UTF-8 stay as bytes.
    fn decode_text(row: &PgRow, idx: usize) -> SqlValue {
        if let Ok(v) = row.try_get::<String, _>(idx) {
            return SqlValue::Text(v);
        }
        match row
            .try_get_raw(idx)
            .ok()
            .and_then(|v| v.as_bytes().ok().map(<[u8]>::to_vec))
        {
            Some(bytes) => match String::from_utf8(bytes) {
                Ok(s) => SqlValue::Text(s),
                Err(e) => SqlValue::Bytes(e.into_bytes()),
            },
            None => SqlValue::Null,
        }
    }
}

mod sqlite {
    use super::*;

    pub fn decode_column(row: &SqliteRow, idx: usize, declared: TypeCategory) -> SqlValue {
        let storage = match row.try_get_raw(idx) {
            Ok(v) if v.is_null() => return SqlValue::Null,
            Ok(v) => v.type_info().name().to_string(),
            Err(_) => return SqlValue::Null,
        };
        match storage.as_str() {
            "INTEGER" => match row.try_get::<i64, _>(idx) {
                Ok(v) if declared == TypeCategory::Boolean => SqlValue::Bool(v != 0),
                Ok(v) => SqlValue::Int(v),
                Err(_) => SqlValue::Null,
            },
            "REAL" => row
                .try_get::<f64, _>(idx)
                .map(SqlValue::Float)
                .unwrap_or(SqlValue::Null),
            "BLOB" => row
                .try_get::<Vec<u8>, _>(idx)
                .map(SqlValue::Bytes)
                .unwrap_or(SqlValue::Null),
            _ => match row.try_get::<String, _>(idx) {
                Ok(s) if declared == TypeCategory::Json => serde_json::from_str(&s)
                    .map(SqlValue::Json)
                    .unwrap_or(SqlValue::Text(s)),
                Ok(s) => SqlValue::Text(s),
                Err(_) => SqlValue::Null,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorize_type_integer() {
        assert_eq!(categorize_type("INT", Dialect::MySql), TypeCategory::Integer);
        assert_eq!(categorize_type("BIGINT UNSIGNED", Dialect::MySql), TypeCategory::Integer);
        assert_eq!(categorize_type("INT8", Dialect::Postgres), TypeCategory::Integer);
        assert_eq!(categorize_type("SERIAL", Dialect::Postgres), TypeCategory::Integer);
    }

    #[test]
    fn test_categorize_type_does_not_match_substrings() {
        assert_eq!(categorize_type("INTERVAL", Dialect::Postgres), TypeCategory::Unknown);
        assert_eq!(categorize_type("POINT", Dialect::Postgres), TypeCategory::Unknown);
    }

    #[test]
    fn test_categorize_type_decimal() {
        assert_eq!(categorize_type("DECIMAL", Dialect::MySql), TypeCategory::Decimal);
        assert_eq!(categorize_type("NUMERIC(10,2)", Dialect::Postgres), TypeCategory::Decimal);
        // SQLite NUMERIC is a float
        assert_eq!(categorize_type("numeric", Dialect::Sqlite), TypeCategory::Float);
    }

    #[test]
    fn test_categorize_temporal_types() {
        assert_eq!(categorize_type("DATE", Dialect::MySql), TypeCategory::Date);
        assert_eq!(categorize_type("DATETIME", Dialect::MySql), TypeCategory::Timestamp);
        assert_eq!(categorize_type("TIMESTAMPTZ", Dialect::Postgres), TypeCategory::TimestampTz);
        assert_eq!(categorize_type("TIME", Dialect::Postgres), TypeCategory::Time);
    }

    #[test]
    fn test_numeric_binary_decoding() {
        // 12345.67: ndigits=3, weight=1, sign=+, dscale=2, digits [1, 2345, 6700]
        let bytes: Vec<u8> = [3i16, 1, 0, 2, 1, 2345, 6700]
            .iter()
            .flat_map(|w| w.to_be_bytes())
            .collect();
        assert_eq!(postgres::numeric_from_binary(&bytes).as_deref(), Some("12345.67"));

        // -0.05: ndigits=1, weight=-1, sign=-, dscale=2, digits [500]
        let bytes: Vec<u8> = [1i16, -1, 0x4000, 2, 500]
            .iter()
            .flat_map(|w| w.to_be_bytes())
            .collect();
        assert_eq!(postgres::numeric_from_binary(&bytes).as_deref(), Some("-0.05"));
    }

    #[test]
    fn test_categorize_type_json_and_binary() {
        assert_eq!(categorize_type("jsonb", Dialect::Postgres), TypeCategory::Json);
        assert_eq!(categorize_type("BYTEA", Dialect::Postgres), TypeCategory::Binary);
        assert_eq!(categorize_type("VARBINARY", Dialect::MySql), TypeCategory::Binary);
        assert_eq!(categorize_type("LONGBLOB", Dialect::MySql), TypeCategory::Binary);
        assert_eq!(categorize_type("VARCHAR(20)", Dialect::MySql), TypeCategory::Text);
    }
}
