//! SQL dump text.
//!
//! Every table section is `DROP TABLE IF EXISTS`, the native `CREATE TABLE`,
//! then optionally one `INSERT` per row.

use crate::db::Dialect;
use crate::db::literal::{quote_ident, value_literal};
use crate::models::Row;
use std::fmt::Write as _;

/// Header for a full-database dump.
pub fn database_header(engine: &str, database: &str) -> String {
    format!(
        "-- {} dump of database {}\n-- Generated at {}\n\n",
        engine,
        database,
        chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    )
}

/// Drop and create statements for one table.
///
/// `create_sql` may hold several `;`-terminated statements (e.g. a table plus
/// its indexes); a missing trailing `;` is added.
pub fn table_section(dialect: Dialect, table: &str, create_sql: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "-- Table: {}", table);
    let _ = writeln!(out, "DROP TABLE IF EXISTS {};", quote_ident(dialect, table));
    let create = create_sql.trim_end();
    out.push_str(create);
    if !create.ends_with(';') {
        out.push(';');
    }
    out.push('\n');
    out
}

/// One `INSERT` for a row.
///
/// `overriding_identity` adds PostgreSQL's `OVERRIDING SYSTEM VALUE` so rows
/// keep their `GENERATED ALWAYS` identity values.
pub fn insert_statement(dialect: Dialect, table: &str, row: &Row, overriding_identity: bool) -> String {
    let columns: Vec<&str> = row.columns().collect();
    let values: Vec<String> = row.values().map(|v| value_literal(dialect, v)).collect();
    insert_literals(dialect, table, &columns, &values, overriding_identity)
}

/// One `INSERT` from already-rendered literals.
pub fn insert_literals<S: AsRef<str>>(
    dialect: Dialect,
    table: &str,
    columns: &[S],
    literals: &[String],
    overriding_identity: bool,
) -> String {
    let columns = columns
        .iter()
        .map(|c| quote_ident(dialect, c.as_ref()))
        .collect::<Vec<_>>()
        .join(", ");
    let overriding = if overriding_identity && dialect == Dialect::Postgres {
        " OVERRIDING SYSTEM VALUE"
    } else {
        ""
    };
    format!(
        "INSERT INTO {} ({}){} VALUES ({});",
        quote_ident(dialect, table),
        columns,
        overriding,
        literals.join(", ")
    )
}
