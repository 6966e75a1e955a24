//! Portable DDL generation.
//!
//! Turns [`ColumnDefinition`]s into native `CREATE TABLE` / `ALTER TABLE`
//! text for each dialect. Key placement rules:
//!
//! - a `PRIMARY KEY` or `UNIQUE` declared by exactly one column stays inline;
//!   declared by several columns it becomes one composite table-level clause
//! - SQLite identity columns become `INTEGER PRIMARY KEY AUTOINCREMENT`, which
//!   consumes the only primary-key slot
//! - MySQL keys over `TEXT`/`BLOB` columns need a prefix length, so they are
//!   always written at table level as `` `col`(255) ``

use crate::db::Dialect;
use crate::db::literal::{default_literal, quote_ident};
use crate::error::{AdapterError, AdapterResult};
use crate::models::ColumnDefinition;
use tracing::warn;

/// Prefix length used for MySQL keys over TEXT/BLOB columns.
pub const MYSQL_KEY_PREFIX_LEN: u32 = 255;

/// A column plus its already-rendered default expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub def: ColumnDefinition,
    pub default_sql: Option<String>,
}

impl ColumnSpec {
    /// Column whose default is a user value, classified by [`default_literal`].
    pub fn new(dialect: Dialect, def: ColumnDefinition, default_value: Option<&str>) -> Self {
        Self {
            def,
            default_sql: default_value.map(|v| default_literal(dialect, v)),
        }
    }

    /// Column whose default is already SQL text (e.g. read back from a catalog).
    pub fn with_raw_default(def: ColumnDefinition, default_sql: Option<String>) -> Self {
        Self { def, default_sql }
    }
}

impl From<ColumnDefinition> for ColumnSpec {
    fn from(def: ColumnDefinition) -> Self {
        Self {
            def,
            default_sql: None,
        }
    }
}

/// Full table shape for `CREATE TABLE`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableSpec {
    pub columns: Vec<ColumnSpec>,
    /// Primary-key column order when it differs from column order.
    pub primary_key_order: Vec<String>,
    /// Unique constraints kept verbatim as table-level clauses.
    pub unique_groups: Vec<Vec<String>>,
    /// Additional table constraints (e.g. foreign keys), already rendered.
    pub extra_clauses: Vec<String>,
}

impl TableSpec {
    pub fn from_definitions(columns: &[ColumnDefinition]) -> Self {
        Self {
            columns: columns.iter().cloned().map(ColumnSpec::from).collect(),
            ..Self::default()
        }
    }
}

/// True for MySQL types that need a prefix length inside an index.
pub fn is_mysql_blob_type(sql_type: &str) -> bool {
    let lower = sql_type.to_ascii_lowercase();
    lower.contains("text") || lower.contains("blob")
}

/// Key column reference, with the MySQL prefix length where needed.
pub fn key_column(dialect: Dialect, spec: &ColumnSpec) -> String {
    let ident = quote_ident(dialect, &spec.def.name);
    if dialect == Dialect::MySql && is_mysql_blob_type(&spec.def.sql_type) {
        format!("{ident}({MYSQL_KEY_PREFIX_LEN})")
    } else {
        ident
    }
}

fn key_list(dialect: Dialect, specs: &[&ColumnSpec]) -> String {
    specs
        .iter()
        .map(|s| key_column(dialect, s))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Render one column definition.
///
/// `inline_pk` / `inline_unique` decide whether the key keywords appear on the
/// column itself; table-level placement is the caller's job.
pub fn column_sql(dialect: Dialect, spec: &ColumnSpec, inline_pk: bool, inline_unique: bool) -> String {
    let def = &spec.def;
    let sqlite_identity = dialect == Dialect::Sqlite && def.is_auto_increment() && inline_pk;
    let sql_type = if sqlite_identity {
        "INTEGER"
    } else {
        def.sql_type.trim()
    };

    let mut parts = vec![quote_ident(dialect, &def.name), sql_type.to_string()];
    if dialect == Dialect::Postgres && def.is_auto_increment() {
        parts.push("GENERATED ALWAYS AS IDENTITY".to_string());
    }
    if def.is_not_null() && !inline_pk {
        parts.push("NOT NULL".to_string());
    }
    if let Some(default_sql) = &spec.default_sql {
        parts.push(format!("DEFAULT {default_sql}"));
    }
    if dialect == Dialect::MySql && def.is_auto_increment() {
        parts.push("AUTO_INCREMENT".to_string());
    }
    if inline_pk {
        parts.push("PRIMARY KEY".to_string());
        if sqlite_identity {
            parts.push("AUTOINCREMENT".to_string());
        }
    }
    if inline_unique {
        parts.push("UNIQUE".to_string());
    }
    parts.join(" ")
}

/// Render `CREATE TABLE IF NOT EXISTS` for a table spec.
pub fn create_table(dialect: Dialect, table: &str, spec: &TableSpec) -> AdapterResult<String> {
    if spec.columns.is_empty() {
        return Err(AdapterError::invalid_input(format!(
            "Table '{}' needs at least one column",
            table
        )));
    }

    let identities: Vec<&ColumnSpec> = spec
        .columns
        .iter()
        .filter(|c| c.def.is_auto_increment())
        .collect();
    if identities.len() > 1 {
        return Err(AdapterError::invalid_input(format!(
            "Table '{}' declares more than one auto-increment column",
            table
        )));
    }
    let sqlite_identity = match (dialect, identities.first()) {
        (Dialect::Sqlite, Some(c)) => Some(c.def.name.as_str()),
        _ => None,
    };

    let mut pk_cols: Vec<&ColumnSpec> = spec
        .columns
        .iter()
        .filter(|c| c.def.is_primary_key() && Some(c.def.name.as_str()) != sqlite_identity)
        .collect();
    if !spec.primary_key_order.is_empty() {
        pk_cols.sort_by_key(|c| {
            spec.primary_key_order
                .iter()
                .position(|n| n == &c.def.name)
                .unwrap_or(usize::MAX)
        });
    }
    let unique_cols: Vec<&ColumnSpec> = spec
        .columns
        .iter()
        .filter(|c| c.def.is_unique() && Some(c.def.name.as_str()) != sqlite_identity)
        .collect();

    let mut table_clauses = Vec::new();

    // Inline PRIMARY KEY slot.
    let inline_pk: Option<&str> = if let Some(identity) = sqlite_identity {
        if !pk_cols.is_empty() {
            warn!(
                table = %table,
                identity = %identity,
                columns = ?pk_cols.iter().map(|c| &c.def.name).collect::<Vec<_>>(),
                "SQLite identity column owns the primary key; other key columns become UNIQUE"
            );
            table_clauses.push(format!("UNIQUE ({})", key_list(dialect, &pk_cols)));
        }
        Some(identity)
    } else if pk_cols.len() == 1
        && !(dialect == Dialect::MySql && is_mysql_blob_type(&pk_cols[0].def.sql_type))
    {
        Some(pk_cols[0].def.name.as_str())
    } else {
        if !pk_cols.is_empty() {
            table_clauses.insert(0, format!("PRIMARY KEY ({})", key_list(dialect, &pk_cols)));
        }
        None
    };

    let inline_unique: Option<&str> = if unique_cols.len() == 1
        && !(dialect == Dialect::MySql && is_mysql_blob_type(&unique_cols[0].def.sql_type))
    {
        Some(unique_cols[0].def.name.as_str())
    } else {
        if !unique_cols.is_empty() {
            table_clauses.push(format!("UNIQUE ({})", key_list(dialect, &unique_cols)));
        }
        None
    };

    for group in &spec.unique_groups {
        let members: Vec<&ColumnSpec> = group
            .iter()
            .filter_map(|n| spec.columns.iter().find(|c| &c.def.name == n))
            .collect();
        if !members.is_empty() {
            table_clauses.push(format!("UNIQUE ({})", key_list(dialect, &members)));
        }
    }
    table_clauses.extend(spec.extra_clauses.iter().cloned());

    let mut lines: Vec<String> = spec
        .columns
        .iter()
        .map(|c| {
            let name = Some(c.def.name.as_str());
            column_sql(dialect, c, name == inline_pk, name == inline_unique)
        })
        .collect();
    lines.extend(table_clauses);

    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {} (\n  {}\n)",
        quote_ident(dialect, table),
        lines.join(",\n  ")
    ))
}

/// `DROP TABLE IF EXISTS`.
pub fn drop_table(dialect: Dialect, table: &str) -> String {
    format!("DROP TABLE IF EXISTS {}", quote_ident(dialect, table))
}

/// Rename a table.
pub fn rename_table(dialect: Dialect, old: &str, new: &str) -> String {
    match dialect {
        Dialect::MySql => format!(
            "RENAME TABLE {} TO {}",
            quote_ident(dialect, old),
            quote_ident(dialect, new)
        ),
        Dialect::Postgres | Dialect::Sqlite => format!(
            "ALTER TABLE {} RENAME TO {}",
            quote_ident(dialect, old),
            quote_ident(dialect, new)
        ),
    }
}

/// Drop a column.
pub fn drop_column(dialect: Dialect, table: &str, column: &str) -> String {
    format!(
        "ALTER TABLE {} DROP COLUMN {}",
        quote_ident(dialect, table),
        quote_ident(dialect, column)
    )
}

/// Statements adding one column.
///
/// SQLite cannot add key columns in place: a UNIQUE column is added plain and
/// followed by a unique index; PRIMARY KEY and AUTOINCREMENT are rejected.
pub fn add_column(dialect: Dialect, table: &str, spec: &ColumnSpec) -> AdapterResult<Vec<String>> {
    let t = quote_ident(dialect, table);
    let def = &spec.def;
    match dialect {
        Dialect::Postgres => Ok(vec![format!(
            "ALTER TABLE {t} ADD COLUMN {}",
            column_sql(dialect, spec, def.is_primary_key(), def.is_unique())
        )]),
        Dialect::MySql => {
            let mut actions = vec![format!("ADD COLUMN {}", column_sql(dialect, spec, false, false))];
            if def.is_primary_key() {
                actions.push(format!("ADD PRIMARY KEY ({})", key_column(dialect, spec)));
            }
            if def.is_unique() {
                actions.push(format!("ADD UNIQUE ({})", key_column(dialect, spec)));
            }
            Ok(vec![format!("ALTER TABLE {t} {}", actions.join(", "))])
        }
        Dialect::Sqlite => {
            if def.is_primary_key() || def.is_auto_increment() {
                return Err(AdapterError::unsupported_engine(
                    "SQLite cannot add a PRIMARY KEY or AUTOINCREMENT column to an existing table",
                ));
            }
            let mut statements = vec![format!(
                "ALTER TABLE {t} ADD COLUMN {}",
                column_sql(dialect, spec, false, false)
            )];
            if def.is_unique() {
                statements.push(create_unique_index(dialect, table, &def.name));
            }
            Ok(statements)
        }
    }
}

/// Name of the single-column unique index created by [`add_column`].
pub fn unique_index_name(table: &str, column: &str) -> String {
    format!("{table}_{column}_unique")
}

/// `CREATE UNIQUE INDEX` on one column.
pub fn create_unique_index(dialect: Dialect, table: &str, column: &str) -> String {
    format!(
        "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} ({})",
        quote_ident(dialect, &unique_index_name(table, column)),
        quote_ident(dialect, table),
        quote_ident(dialect, column)
    )
}

/// Defaults SQLite refuses in `ALTER TABLE ADD COLUMN`.
pub fn is_sqlite_non_constant_default(default_sql: &str) -> bool {
    let upper = default_sql.trim().to_ascii_uppercase();
    matches!(
        upper.as_str(),
        "CURRENT_TIMESTAMP" | "CURRENT_DATE" | "CURRENT_TIME"
    ) || upper.starts_with('(')
}

/// First SQLite release with `ALTER TABLE DROP COLUMN`.
pub const SQLITE_DROP_COLUMN_VERSION: (u32, u32, u32) = (3, 35, 0);

/// Parse `sqlite_version()` output such as `3.45.1`.
pub fn parse_sqlite_version(version: &str) -> Option<(u32, u32, u32)> {
    let mut parts = version.trim().split('.').map(|p| p.parse::<u32>().ok());
    let major = parts.next()??;
    let minor = parts.next().flatten().unwrap_or(0);
    let patch = parts.next().flatten().unwrap_or(0);
    Some((major, minor, patch))
}

/// Fail with `UnsupportedEngine` when the server predates `DROP COLUMN`.
pub fn ensure_sqlite_drop_column(version: &str) -> AdapterResult<()> {
    match parse_sqlite_version(version) {
        Some(v) if v >= SQLITE_DROP_COLUMN_VERSION => Ok(()),
        _ => Err(AdapterError::unsupported_engine(format!(
            "SQLite {} cannot drop columns (needs 3.35.0 or newer)",
            version.trim()
        ))),
    }
}
