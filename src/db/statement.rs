//! Statement classification for `execute_query`.
//!
//! Read/write is decided by the leading keyword; the source table used for
//! field metadata is resolved with [sqlparser](https://docs.rs/sqlparser/).

use crate::db::Dialect;
use sqlparser::ast::{SetExpr, Statement, TableFactor};
use sqlparser::dialect::{MySqlDialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::parser::Parser;

/// Leading keywords of statements that return rows.
const READ_KEYWORDS: &[&str] = &[
    "SELECT", "WITH", "SHOW", "PRAGMA", "EXPLAIN", "DESCRIBE", "DESC", "VALUES", "TABLE",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Read,
    Write,
}

impl StatementKind {
    /// Classify by the first keyword after whitespace, comments and `(`.
    pub fn classify(sql: &str) -> Self {
        match leading_keyword(sql) {
            Some(kw) if READ_KEYWORDS.contains(&kw.to_ascii_uppercase().as_str()) => Self::Read,
            _ => Self::Write,
        }
    }

    pub fn is_read(&self) -> bool {
        matches!(self, Self::Read)
    }
}

/// First keyword of `sql`, skipping whitespace, comments and opening parens.
pub fn leading_keyword(sql: &str) -> Option<&str> {
    let mut rest = sql;
    loop {
        rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == '(');
        if let Some(after) = rest.strip_prefix("--") {
            rest = after.split_once('\n').map_or("", |(_, tail)| tail);
        } else if let Some(after) = rest.strip_prefix("/*") {
            rest = after.split_once("*/").map_or("", |(_, tail)| tail);
        } else {
            break;
        }
    }
    let end = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(rest.len());
    (end > 0).then(|| &rest[..end])
}

/// `PRAGMA name = value`, which changes the database rather than reading it.
pub fn is_pragma_assignment(sql: &str) -> bool {
    let Some(keyword) = leading_keyword(sql) else {
        return false;
    };
    if !keyword.eq_ignore_ascii_case("PRAGMA") {
        return false;
    }
    // `keyword` borrows from `sql`
    let start = keyword.as_ptr() as usize - sql.as_ptr() as usize + keyword.len();
    sql[start..].split(';').next().is_some_and(|body| body.contains('='))
}

fn parse(dialect: Dialect, sql: &str) -> Option<Vec<Statement>> {
    let result = match dialect {
        Dialect::Postgres => Parser::parse_sql(&PostgreSqlDialect {}, sql),
        Dialect::MySql => Parser::parse_sql(&MySqlDialect {}, sql),
        Dialect::Sqlite => Parser::parse_sql(&SQLiteDialect {}, sql),
    };
    result.ok()
}

fn unquote(part: &str) -> String {
    let trimmed = part.trim();
    let bytes = trimmed.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if matches!((first, last), (b'"', b'"') | (b'`', b'`') | (b'[', b']')) {
            return trimmed[1..trimmed.len() - 1].to_string();
        }
    }
    trimmed.to_string()
}

/// Table named first in the `FROM` clause of a single `SELECT`, without
/// schema qualification or quotes.
pub fn source_table(dialect: Dialect, sql: &str) -> Option<String> {
    let statements = parse(dialect, sql)?;
    let Some(Statement::Query(query)) = statements.first() else {
        return None;
    };
    let SetExpr::Select(select) = query.body.as_ref() else {
        return None;
    };
    let relation = &select.from.first()?.relation;
    let TableFactor::Table { name, .. } = relation else {
        return None;
    };
    let rendered = name.to_string();
    rendered.rsplit('.').next().map(unquote)
}
