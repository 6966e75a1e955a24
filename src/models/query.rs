//! Query-related data models.
//!
//! Rows keep the column order of the result set; serialized to JSON they
//! become objects whose keys appear in that same order.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value as JsonValue;

/// A parameter value for parameterized queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParam {
    /// NULL value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
    /// Binary data, `{"bytes": "<base64>"}` in JSON. A bare string always
    /// decodes as [`QueryParam::String`].
    #[serde(with = "base64_bytes")]
    Bytes(Vec<u8>),
}

impl QueryParam {
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
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
        }
    }

    /// Interpret a CLI argument: `null`, `true`/`false`, integers and floats
    /// are typed; everything else is a string.
    pub fn infer(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("null") {
            Self::Null
        } else if raw.eq_ignore_ascii_case("true") {
            Self::Bool(true)
        } else if raw.eq_ignore_ascii_case("false") {
            Self::Bool(false)
        } else if let Ok(v) = raw.parse::<i64>() {
            Self::Int(v)
        } else if let Some(v) = raw.parse::<f64>().ok().filter(|v| v.is_finite()) {
            Self::Float(v)
        } else {
            Self::String(raw.to_string())
        }
    }
}

impl From<&str> for QueryParam {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for QueryParam {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<i64> for QueryParam {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<bool> for QueryParam {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

/// Binary parameters as a `{"bytes": "<base64>"}` object, so they stay
/// distinguishable from strings inside the untagged enum.
mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(deny_unknown_fields)]
    struct Tagged {
        bytes: String,
    }

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        Tagged {
            bytes: STANDARD.encode(bytes),
        }
        .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let Tagged { bytes } = Tagged::deserialize(deserializer)?;
        STANDARD.decode(&bytes).map_err(serde::de::Error::custom)
    }
}

/// A decoded cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    /// Exact decimal text as the server rendered it.
    Decimal(String),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    TimestampTz(DateTime<FixedOffset>),
    Json(JsonValue),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) | Self::Decimal(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::UInt(v) => i64::try_from(*v).ok(),
            Self::Bool(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    /// Convert to a JSON value (bytes as base64, temporal values as ISO text).
    pub fn to_json(&self) -> JsonValue {
        use base64::{Engine as _, engine::general_purpose::STANDARD};

        match self {
            Self::Null => JsonValue::Null,
            Self::Bool(v) => JsonValue::Bool(*v),
            Self::Int(v) => JsonValue::Number((*v).into()),
            Self::UInt(v) => JsonValue::Number((*v).into()),
            Self::Float(v) => serde_json::Number::from_f64(*v)
                .map(JsonValue::Number)
                .unwrap_or_else(|| JsonValue::String(v.to_string())),
            Self::Decimal(v) | Self::Text(v) => JsonValue::String(v.clone()),
            Self::Bytes(v) => JsonValue::String(STANDARD.encode(v)),
            Self::Date(v) => JsonValue::String(v.format("%Y-%m-%d").to_string()),
            Self::Time(v) => JsonValue::String(v.format("%H:%M:%S%.f").to_string()),
            Self::DateTime(v) => JsonValue::String(v.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
            Self::TimestampTz(v) => JsonValue::String(v.to_rfc3339()),
            Self::Json(v) => v.clone(),
        }
    }
}

impl Serialize for SqlValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// One result record: ordered `(column name, value)` pairs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    cells: Vec<(String, SqlValue)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: SqlValue) {
        self.cells.push((name.into(), value));
    }

    /// Look up a value by column name (first match).
    pub fn get(&self, name: &str) -> Option<&SqlValue> {
        self.cells.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(|(n, _)| n.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &SqlValue> {
        self.cells.iter().map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.cells.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

impl FromIterator<(String, SqlValue)> for Row {
    fn from_iter<T: IntoIterator<Item = (String, SqlValue)>>(iter: T) -> Self {
        Self {
            cells: iter.into_iter().collect(),
        }
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.cells.len()))?;
        for (name, value) in &self.cells {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Result-column metadata joined with catalog flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldInfo {
    pub name: String,
    pub data_type: String,
    pub is_primary_key: bool,
    pub is_unique: bool,
    pub is_auto_increment: bool,
    pub is_nullable: bool,
}

impl FieldInfo {
    /// Field with no catalog information (nullable, no key flags).
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            is_primary_key: false,
            is_unique: false,
            is_auto_increment: false,
            is_nullable: true,
        }
    }
}

/// Result of a query or statement.
///
/// Reads populate `rows` (and `fields` from `execute_query`); writes populate
/// `affected_rows`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResult {
    pub rows: Vec<Row>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<FieldInfo>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affected_rows: Option<u64>,
}

impl QueryResult {
    pub fn from_rows(rows: Vec<Row>) -> Self {
        Self {
            rows,
            fields: None,
            affected_rows: None,
        }
    }

    pub fn from_affected(affected_rows: u64) -> Self {
        Self {
            rows: Vec::new(),
            fields: None,
            affected_rows: Some(affected_rows),
        }
    }

    pub fn with_fields(mut self, fields: Vec<FieldInfo>) -> Self {
        self.fields = Some(fields);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_serializes_in_column_order() {
        let mut row = Row::new();
        row.push("z", SqlValue::Int(1));
        row.push("a", SqlValue::Text("x".into()));
        row.push("m", SqlValue::Null);
        let json = serde_json::to_string(&row).unwrap();
        assert_eq!(json, r#"{"z":1,"a":"x","m":null}"#);
    }

    #[test]
    fn test_bytes_serialize_as_base64() {
        let v = SqlValue::Bytes(vec![0xff, 0x0a]);
        assert_eq!(serde_json::to_value(&v).unwrap(), JsonValue::String("/wo=".into()));
    }

    #[test]
    fn test_param_json_forms() {
        let params: Vec<QueryParam> =
            serde_json::from_str(r#"[null, true, 7, 1.5, "/wo=", {"bytes": "/wo="}]"#).unwrap();
        assert_eq!(
            params,
            vec![
                QueryParam::Null,
                QueryParam::Bool(true),
                QueryParam::Int(7),
                QueryParam::Float(1.5),
                QueryParam::String("/wo=".into()),
                QueryParam::Bytes(vec![0xff, 0x0a]),
            ]
        );
        assert_eq!(
            serde_json::to_string(&QueryParam::Bytes(vec![0xff, 0x0a])).unwrap(),
            r#"{"bytes":"/wo="}"#
        );
        assert!(serde_json::from_str::<QueryParam>(r#"{"bytes": "not base64!"}"#).is_err());
    }

    #[test]
    fn test_param_inference() {
        assert_eq!(QueryParam::infer("NULL"), QueryParam::Null);
        assert_eq!(QueryParam::infer("42"), QueryParam::Int(42));
        assert_eq!(QueryParam::infer("1.5"), QueryParam::Float(1.5));
        assert_eq!(QueryParam::infer("true"), QueryParam::Bool(true));
        assert_eq!(QueryParam::infer("inf"), QueryParam::String("inf".into()));
        assert_eq!(QueryParam::infer("O'Reilly"), QueryParam::String("O'Reilly".into()));
    }

    #[test]
    fn test_query_result_skips_empty_options() {
        let r = QueryResult::from_affected(3);
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["affected_rows"], 3);
        assert!(json.get("fields").is_none());
    }
}
