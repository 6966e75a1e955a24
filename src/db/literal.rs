//! SQL literal and identifier rendering.
//!
//! Everything that splices a value into SQL text goes through this module:
//! column defaults, dump `INSERT`s and the parameter interpolation used by the
//! SSH-backed SQLite adapter, which has no native binding.

use crate::db::Dialect;
use crate::error::{AdapterError, AdapterResult};
use crate::models::{QueryParam, SqlValue};
use std::fmt::Write as _;

/// Default-value keywords emitted verbatim.
const DEFAULT_KEYWORDS: &[&str] = &["CURRENT_TIMESTAMP", "NULL", "TRUE", "FALSE"];

/// Quote an identifier: `"name"` for PostgreSQL/SQLite, `` `name` `` for MySQL.
pub fn quote_ident(dialect: Dialect, name: &str) -> String {
    let q = match dialect {
        Dialect::MySql => '`',
        Dialect::Postgres | Dialect::Sqlite => '"',
    };
    let mut out = String::with_capacity(name.len() + 2);
    out.push(q);
    for c in name.chars() {
        if c == q {
            out.push(q);
        }
        out.push(c);
    }
    out.push(q);
    out
}

/// Quote a string literal, doubling single quotes.
///
/// MySQL treats backslash as an escape character inside literals, so it is
/// doubled there as well.
pub fn quote_string(dialect: Dialect, value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        match c {
            '\'' => out.push_str("''"),
            '\\' if dialect == Dialect::MySql => out.push_str("\\\\"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// True for plain decimal literals: `-12`, `3.5`, `+1e10`, `.5`.
///
/// Words such as `inf` or `NaN` and hex forms are not numeric here.
pub fn is_numeric_literal(s: &str) -> bool {
    let b = s.as_bytes();
    let mut i = 0;
    if matches!(b.first(), Some(b'+' | b'-')) {
        i += 1;
    }
    let int_start = i;
    while i < b.len() && b[i].is_ascii_digit() {
        i += 1;
    }
    let mut digits = i - int_start;
    if i < b.len() && b[i] == b'.' {
        i += 1;
        let frac_start = i;
        while i < b.len() && b[i].is_ascii_digit() {
            i += 1;
        }
        digits += i - frac_start;
    }
    if digits == 0 {
        return false;
    }
    if i < b.len() && matches!(b[i], b'e' | b'E') {
        i += 1;
        if i < b.len() && matches!(b[i], b'+' | b'-') {
            i += 1;
        }
        let exp_start = i;
        while i < b.len() && b[i].is_ascii_digit() {
            i += 1;
        }
        if i == exp_start {
            return false;
        }
    }
    i == b.len()
}

/// Render a column default.
///
/// Keywords (`CURRENT_TIMESTAMP`, `NULL`, `TRUE`, `FALSE`, plus `NOW()` on
/// PostgreSQL) and numeric literals are emitted unquoted; anything else
/// becomes a string literal.
pub fn default_literal(dialect: Dialect, raw: &str) -> String {
    let trimmed = raw.trim();
    let upper = trimmed.to_ascii_uppercase();
    if DEFAULT_KEYWORDS.contains(&upper.as_str())
        || (dialect == Dialect::Postgres && upper == "NOW()")
    {
        return upper;
    }
    if is_numeric_literal(trimmed) {
        return trimmed.to_string();
    }
    quote_string(dialect, raw)
}

fn bool_literal(dialect: Dialect, v: bool) -> &'static str {
    match (dialect, v) {
        (Dialect::Sqlite, true) => "1",
        (Dialect::Sqlite, false) => "0",
        (_, true) => "TRUE",
        (_, false) => "FALSE",
    }
}

fn float_literal(dialect: Dialect, v: f64) -> String {
    if v.is_finite() {
        let s = v.to_string();
        // Keep the literal typed as a float on engines that distinguish.
        if s.contains(['.', 'e', 'E']) { s } else { format!("{s}.0") }
    } else if dialect == Dialect::Postgres {
        let word = if v.is_nan() {
            "NaN"
        } else if v > 0.0 {
            "Infinity"
        } else {
            "-Infinity"
        };
        format!("'{word}'::float8")
    } else {
        "NULL".to_string()
    }
}

/// Render binary data: `X'..'` on MySQL/SQLite, a `bytea` escape on PostgreSQL.
pub fn bytes_literal(dialect: Dialect, bytes: &[u8]) -> String {
    let mut hex = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(hex, "{b:02x}");
    }
    match dialect {
        Dialect::Postgres => format!("'\\x{hex}'::bytea"),
        Dialect::MySql | Dialect::Sqlite => format!("X'{hex}'"),
    }
}

/// Render a decoded value as a SQL literal for dumps.
pub fn value_literal(dialect: Dialect, value: &SqlValue) -> String {
    match value {
        SqlValue::Null => "NULL".to_string(),
        SqlValue::Bool(v) => bool_literal(dialect, *v).to_string(),
        SqlValue::Int(v) => v.to_string(),
        SqlValue::UInt(v) => v.to_string(),
        SqlValue::Float(v) => float_literal(dialect, *v),
        SqlValue::Decimal(v) if is_numeric_literal(v) => v.clone(),
        SqlValue::Decimal(v) | SqlValue::Text(v) => quote_string(dialect, v),
        SqlValue::Bytes(v) => bytes_literal(dialect, v),
        SqlValue::Date(v) => format!("'{}'", v.format("%Y-%m-%d")),
        SqlValue::Time(v) => format!("'{}'", v.format("%H:%M:%S%.f")),
        SqlValue::DateTime(v) => format!("'{}'", v.format("%Y-%m-%d %H:%M:%S%.f")),
        SqlValue::TimestampTz(v) => match dialect {
            // DATETIME/TIMESTAMP columns reject offsets on older servers.
            Dialect::MySql => format!("'{}'", v.naive_utc().format("%Y-%m-%d %H:%M:%S%.f")),
            _ => format!("'{}'", v.format("%Y-%m-%d %H:%M:%S%.f%:z")),
        },
        SqlValue::Json(v) => quote_string(dialect, &v.to_string()),
    }
}

/// Render a bound parameter as a SQL literal.
pub fn param_literal(dialect: Dialect, param: &QueryParam) -> String {
    match param {
        QueryParam::Null => "NULL".to_string(),
        QueryParam::Bool(v) => bool_literal(dialect, *v).to_string(),
        QueryParam::Int(v) => v.to_string(),
        QueryParam::Float(v) => float_literal(dialect, *v),
        QueryParam::String(v) => quote_string(dialect, v),
        QueryParam::Bytes(v) => bytes_literal(dialect, v),
    }
}

/// Split `sql` at every `?` placeholder that sits outside string literals,
/// quoted identifiers and comments.
fn split_placeholders(sql: &str, dialect: Dialect) -> Vec<&str> {
    let b = sql.as_bytes();
    let mut parts = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i < b.len() {
        match b[i] {
            q @ (b'\'' | b'"' | b'`') => {
                i += 1;
                while i < b.len() {
                    if b[i] == b'\\' && q == b'\'' && dialect == Dialect::MySql {
                        i += 2;
                        continue;
                    }
                    if b[i] == q {
                        // doubled quote stays inside the literal
                        if i + 1 < b.len() && b[i + 1] == q {
                            i += 2;
                            continue;
                        }
                        break;
                    }
                    i += 1;
                }
                i += 1;
            }
            b'-' if b.get(i + 1) == Some(&b'-') => {
                while i < b.len() && b[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if b.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i + 1 < b.len() && !(b[i] == b'*' && b[i + 1] == b'/') {
                    i += 1;
                }
                i += 2;
            }
            b'?' => {
                parts.push(&sql[start..i]);
                i += 1;
                start = i;
            }
            _ => i += 1,
        }
    }
    parts.push(&sql[start.min(sql.len())..]);
    parts
}

/// Number of `?` placeholders outside literals and comments.
pub fn count_placeholders(sql: &str, dialect: Dialect) -> usize {
    split_placeholders(sql, dialect).len() - 1
}

/// Splice parameters into `sql` as literals.
pub fn interpolate_params(dialect: Dialect, sql: &str, params: &[QueryParam]) -> AdapterResult<String> {
    let parts = split_placeholders(sql, dialect);
    let expected = parts.len() - 1;
    if expected != params.len() {
        return Err(AdapterError::invalid_input(format!(
            "Statement has {} placeholder(s) but {} parameter(s) were given",
            expected,
            params.len()
        )));
    }
    let mut out = String::with_capacity(sql.len() + params.len() * 8);
    for (idx, part) in parts.iter().enumerate() {
        out.push_str(part);
        if let Some(param) = params.get(idx) {
            out.push_str(&param_literal(dialect, param));
        }
    }
    Ok(out)
}

/// Rewrite `?` placeholders to PostgreSQL's `$1, $2, ...`.
pub fn rewrite_placeholders(sql: &str) -> String {
    let parts = split_placeholders(sql, Dialect::Postgres);
    if parts.len() == 1 {
        return sql.to_string();
    }
    let mut out = String::with_capacity(sql.len() + parts.len() * 2);
    for (idx, part) in parts.iter().enumerate() {
        out.push_str(part);
        if idx + 1 < parts.len() {
            let _ = write!(out, "${}", idx + 1);
        }
    }
    out
}
