//! PostgreSQL adapter.
//!
//! Holds one `PgConnection` bound to one database. Catalog queries are
//! limited to the `public` schema.

use super::{AdapterOptions, DatabaseAdapter};
use crate::db::ddl::{self, ColumnSpec, TableSpec};
use crate::db::literal::{quote_ident, rewrite_placeholders};
use crate::db::params::bind_all;
use crate::db::statement::source_table;
use crate::db::types::column_types;
use crate::db::{DecodeRow, Dialect, Session, StatementKind, export};
use crate::error::{AdapterError, AdapterResult};
use crate::models::{
    ColumnDefinition, ColumnInfo, ConnectionDescriptor, EngineKind, FieldInfo, QueryParam,
    QueryResult, Row,
};
use futures_util::TryStreamExt;
use sqlx::postgres::{PgConnectOptions, PgRow};
use sqlx::{Connection, Executor, PgConnection, Row as _, Statement};
use std::fmt::Write as _;
use tracing::{debug, info, warn};

const DEFAULT_DATABASE: &str = "postgres";
const SCHEMA: &str = "public";

pub(super) mod queries {
    pub const DATABASES: &str = r#"
        SELECT datname::text FROM pg_database
        WHERE datistemplate = false
        ORDER BY datname
        "#;

    pub const TABLES: &str = "SELECT tablename::text FROM pg_tables WHERE schemaname = $1";

    pub const COLUMNS: &str = r#"
        SELECT
            column_name::text AS column_name,
            data_type::text AS data_type,
            udt_name::text AS udt_name,
            is_nullable::text AS is_nullable,
            column_default::text AS column_default,
            character_maximum_length::int8 AS max_length,
            numeric_precision::int8 AS numeric_precision,
            numeric_scale::int8 AS numeric_scale,
            is_identity::text AS is_identity
        FROM information_schema.columns
        WHERE table_schema = $1 AND table_name = $2
        ORDER BY ordinal_position
        "#;

    pub const KEY_COLUMNS: &str = r#"
        SELECT
            con.conname::text AS constraint_name,
            con.contype::text AS kind,
            a.attname::text AS column_name,
            cardinality(con.conkey)::int4 AS width
        FROM pg_constraint con
        JOIN pg_class t ON t.oid = con.conrelid
        JOIN pg_namespace n ON n.oid = t.relnamespace
        CROSS JOIN LATERAL unnest(con.conkey) WITH ORDINALITY AS k(attnum, ord)
        JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum
        WHERE n.nspname = $1 AND t.relname = $2 AND con.contype IN ('p', 'u')
        ORDER BY con.contype, con.conname, k.ord
        "#;

    pub const IDENTITY: &str = r#"
        SELECT is_identity::text FROM information_schema.columns
        WHERE table_schema = $1 AND table_name = $2 AND column_name = $3
        "#;

    pub const CREATE_COLUMNS: &str = r#"
        SELECT
            a.attname::text AS column_name,
            format_type(a.atttypid, a.atttypmod) AS column_type,
            a.attnotnull AS not_null,
            a.attidentity::text AS identity,
            pg_get_expr(d.adbin, d.adrelid) AS default_expr
        FROM pg_attribute a
        JOIN pg_class c ON c.oid = a.attrelid
        JOIN pg_namespace n ON n.oid = c.relnamespace
        LEFT JOIN pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum
        WHERE n.nspname = $1 AND c.relname = $2 AND a.attnum > 0 AND NOT a.attisdropped
        ORDER BY a.attnum
        "#;

    pub const CREATE_CONSTRAINTS: &str = r#"
        SELECT con.conname::text AS name, pg_get_constraintdef(con.oid) AS definition
        FROM pg_constraint con
        JOIN pg_class c ON c.oid = con.conrelid
        JOIN pg_namespace n ON n.oid = c.relnamespace
        WHERE n.nspname = $1 AND c.relname = $2 AND con.contype IN ('p', 'u')
        ORDER BY con.contype, con.conname
        "#;
}

/// One column of a primary-key or unique constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
struct KeyColumn {
    constraint: String,
    primary: bool,
    column: String,
    width: i32,
}

/// Key and identity state of a column before it is modified.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct ExistingKeys {
    /// Constraint name and its columns in key order.
    primary: Option<(String, Vec<String>)>,
    /// Single-column unique constraints on the column.
    unique: Vec<String>,
    identity: bool,
}

struct CatalogColumn {
    info: ColumnInfo,
    identity: bool,
}

impl CatalogColumn {
    fn is_auto_increment(&self) -> bool {
        self.identity
            || self
                .info
                .default_expr
                .as_deref()
                .is_some_and(|d| d.starts_with("nextval("))
    }
}

pub struct PostgresAdapter {
    descriptor: ConnectionDescriptor,
    options: AdapterOptions,
    session: Session<PgConnection>,
}

impl PostgresAdapter {
    pub fn new(descriptor: ConnectionDescriptor, options: AdapterOptions) -> Self {
        Self {
            descriptor,
            options,
            session: Session::new(),
        }
    }

    /// Session bound to `database`, reconnecting when it differs. `None`
    /// reuses whatever is open.
    async fn connection(&mut self, database: Option<&str>) -> AdapterResult<&mut PgConnection> {
        let target = database.filter(|d| !d.is_empty());
        if !self.session.is_bound_to(target) {
            let name = target
                .map(str::to_string)
                .or_else(|| self.descriptor.database.clone())
                .unwrap_or_else(|| DEFAULT_DATABASE.to_string());
            self.session.close().await;
            let conn = self.open(&name).await?;
            self.session.replace(conn, Some(name)).await;
        }
        self.session.get_mut().ok_or_else(|| {
            AdapterError::connection("PostgreSQL session is not open", "Retry the operation")
        })
    }

    async fn open(&self, database: &str) -> AdapterResult<PgConnection> {
        let d = &self.descriptor;
        let port = d.effective_port().unwrap_or(5432);
        let options = PgConnectOptions::new()
            .host(&d.host)
            .port(port)
            .username(&d.username)
            .password(&d.password)
            .database(database);

        let conn = tokio::time::timeout(self.options.connect_timeout, PgConnection::connect_with(&options))
            .await
            .map_err(|_| {
                AdapterError::connection(
                    format!("Timed out connecting to {}:{}", d.host, port),
                    "Check that the server is reachable or raise the connect timeout",
                )
            })?
            .map_err(|e| {
                AdapterError::connection(
                    format!("Failed to connect to PostgreSQL: {}", e),
                    "Check the host, port, credentials and database name",
                )
            })?;
        info!(host = %d.host, port, database = %database, "Connected to PostgreSQL");
        Ok(conn)
    }

    async fn execute_statements(&mut self, database: &str, statements: &[String]) -> AdapterResult<()> {
        let conn = self.connection(Some(database)).await?;
        for sql in statements {
            debug!(sql = %sql, "Executing PostgreSQL DDL");
            sqlx::raw_sql(sql).execute(&mut *conn).await?;
        }
        Ok(())
    }
}

async fn catalog_columns(conn: &mut PgConnection, table: &str) -> AdapterResult<Vec<CatalogColumn>> {
    let rows = sqlx::query(queries::COLUMNS)
        .bind(SCHEMA)
        .bind(table)
        .fetch_all(&mut *conn)
        .await?;
    rows.iter()
        .map(|row| {
            let data_type: String = row.try_get("data_type")?;
            let data_type = match data_type.as_str() {
                "USER-DEFINED" | "ARRAY" => row.try_get("udt_name")?,
                _ => data_type,
            };
            let is_nullable: String = row.try_get("is_nullable")?;
            let is_identity: Option<String> = row.try_get("is_identity")?;
            let as_u64 = |v: Option<i64>| v.and_then(|n| u64::try_from(n).ok());
            let info = ColumnInfo::new(
                row.try_get::<String, _>("column_name")?,
                data_type,
                is_nullable == "YES",
            )
            .with_default(row.try_get("column_default")?)
            .with_max_length(as_u64(row.try_get("max_length")?))
            .with_numeric(
                as_u64(row.try_get("numeric_precision")?),
                as_u64(row.try_get("numeric_scale")?),
            );
            Ok(CatalogColumn {
                info,
                identity: is_identity.as_deref() == Some("YES"),
            })
        })
        .collect::<Result<Vec<_>, sqlx::Error>>()
        .map_err(AdapterError::from)
}

async fn key_columns(conn: &mut PgConnection, table: &str) -> AdapterResult<Vec<KeyColumn>> {
    let rows = sqlx::query(queries::KEY_COLUMNS)
        .bind(SCHEMA)
        .bind(table)
        .fetch_all(&mut *conn)
        .await?;
    rows.iter()
        .map(|row| {
            let kind: String = row.try_get("kind")?;
            Ok(KeyColumn {
                constraint: row.try_get("constraint_name")?,
                primary: kind == "p",
                column: row.try_get("column_name")?,
                width: row.try_get("width")?,
            })
        })
        .collect::<Result<Vec<_>, sqlx::Error>>()
        .map_err(AdapterError::from)
}

fn primary_keys(keys: &[KeyColumn]) -> Vec<String> {
    keys.iter()
        .filter(|k| k.primary)
        .map(|k| k.column.clone())
        .collect()
}

fn unique_keys(keys: &[KeyColumn]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for key in keys.iter().filter(|k| !k.primary && k.width == 1) {
        if !out.contains(&key.column) {
            out.push(key.column.clone());
        }
    }
    out
}

async fn existing_keys(conn: &mut PgConnection, table: &str, column: &str) -> AdapterResult<ExistingKeys> {
    let identity: Option<String> = sqlx::query_scalar(queries::IDENTITY)
        .bind(SCHEMA)
        .bind(table)
        .bind(column)
        .fetch_optional(&mut *conn)
        .await?;
    let Some(identity) = identity else {
        return Err(AdapterError::query(
            format!("column \"{}\" of relation \"{}\" does not exist", column, table),
            Some("42703".to_string()),
        ));
    };

    let keys = key_columns(&mut *conn, table).await?;
    let primary = keys.iter().find(|k| k.primary).map(|k| {
        let columns = keys
            .iter()
            .filter(|c| c.primary && c.constraint == k.constraint)
            .map(|c| c.column.clone())
            .collect();
        (k.constraint.clone(), columns)
    });
    let unique = keys
        .iter()
        .filter(|k| !k.primary && k.width == 1 && k.column == column)
        .map(|k| k.constraint.clone())
        .collect();
    Ok(ExistingKeys {
        primary,
        unique,
        identity: identity == "YES",
    })
}

/// Ordered `ALTER TABLE` statements turning `old_name` into `spec`.
fn plan_modify(table: &str, old_name: &str, spec: &ColumnSpec, existing: &ExistingKeys) -> Vec<String> {
    let def = &spec.def;
    let t = quote_ident(Dialect::Postgres, table);
    let c = quote_ident(Dialect::Postgres, &def.name);
    let mut out = Vec::new();

    if old_name != def.name {
        out.push(format!(
            "ALTER TABLE {t} RENAME COLUMN {} TO {c}",
            quote_ident(Dialect::Postgres, old_name)
        ));
    }

    let key_list = |columns: &[String]| {
        columns
            .iter()
            .map(|n| {
                let n = if n == old_name { &def.name } else { n };
                quote_ident(Dialect::Postgres, n)
            })
            .collect::<Vec<_>>()
            .join(", ")
    };
    match &existing.primary {
        Some((name, columns)) => {
            let in_key = columns.iter().any(|n| n == old_name);
            if in_key != def.is_primary_key() {
                out.push(format!(
                    "ALTER TABLE {t} DROP CONSTRAINT {}",
                    quote_ident(Dialect::Postgres, name)
                ));
                let remaining: Vec<String> = if in_key {
                    columns.iter().filter(|n| *n != old_name).cloned().collect()
                } else {
                    columns.iter().cloned().chain([def.name.clone()]).collect()
                };
                if !remaining.is_empty() {
                    out.push(format!("ALTER TABLE {t} ADD PRIMARY KEY ({})", key_list(&remaining)));
                }
            }
        }
        None if def.is_primary_key() => out.push(format!("ALTER TABLE {t} ADD PRIMARY KEY ({c})")),
        None => {}
    }

    if def.is_unique() {
        if existing.unique.is_empty() {
            out.push(format!(
                "ALTER TABLE {t} ADD CONSTRAINT {} UNIQUE ({c})",
                quote_ident(Dialect::Postgres, &ddl::unique_index_name(table, &def.name))
            ));
        }
    } else {
        for name in &existing.unique {
            out.push(format!(
                "ALTER TABLE {t} DROP CONSTRAINT {}",
                quote_ident(Dialect::Postgres, name)
            ));
        }
    }

    let ty = def.sql_type.trim();
    out.push(format!("ALTER TABLE {t} ALTER COLUMN {c} TYPE {ty} USING {c}::{ty}"));

    if def.is_auto_increment() {
        if !existing.identity {
            out.push(format!("ALTER TABLE {t} ALTER COLUMN {c} DROP DEFAULT"));
            out.push(format!("ALTER TABLE {t} ALTER COLUMN {c} SET NOT NULL"));
            out.push(format!(
                "ALTER TABLE {t} ALTER COLUMN {c} ADD GENERATED ALWAYS AS IDENTITY"
            ));
        }
        return out;
    }

    if existing.identity {
        out.push(format!("ALTER TABLE {t} ALTER COLUMN {c} DROP IDENTITY IF EXISTS"));
    }
    match &spec.default_sql {
        Some(default_sql) => out.push(format!("ALTER TABLE {t} ALTER COLUMN {c} SET DEFAULT {default_sql}")),
        None => out.push(format!("ALTER TABLE {t} ALTER COLUMN {c} DROP DEFAULT")),
    }
    if def.is_not_null() {
        out.push(format!("ALTER TABLE {t} ALTER COLUMN {c} SET NOT NULL"));
    } else {
        out.push(format!("ALTER TABLE {t} ALTER COLUMN {c} DROP NOT NULL"));
    }
    out
}

async fn apply_modify(
    conn: &mut PgConnection,
    table: &str,
    old_name: &str,
    spec: &ColumnSpec,
) -> AdapterResult<()> {
    let existing = existing_keys(conn, table, old_name).await?;
    for sql in plan_modify(table, old_name, spec, &existing) {
        debug!(table = %table, sql = %sql, "Modify step");
        sqlx::raw_sql(&sql).execute(&mut *conn).await?;
    }
    Ok(())
}

/// Rebuild `CREATE TABLE` text from the catalog.
async fn create_table_sql(conn: &mut PgConnection, table: &str) -> AdapterResult<(String, bool)> {
    let columns = sqlx::query(queries::CREATE_COLUMNS)
        .bind(SCHEMA)
        .bind(table)
        .fetch_all(&mut *conn)
        .await?;
    if columns.is_empty() {
        return Err(AdapterError::query(
            format!("relation \"{}\" does not exist", table),
            Some("42P01".to_string()),
        ));
    }

    let mut has_identity = false;
    let mut lines = Vec::with_capacity(columns.len());
    for row in &columns {
        let name: String = row.try_get("column_name")?;
        let column_type: String = row.try_get("column_type")?;
        let not_null: bool = row.try_get("not_null")?;
        let identity: String = row.try_get("identity")?;
        let default_expr: Option<String> = row.try_get("default_expr")?;

        let mut line = format!("{} {}", quote_ident(Dialect::Postgres, &name), column_type);
        match identity.as_str() {
            "a" => line.push_str(" GENERATED ALWAYS AS IDENTITY"),
            "d" => line.push_str(" GENERATED BY DEFAULT AS IDENTITY"),
            _ => {
                if let Some(default_expr) = default_expr {
                    let _ = write!(line, " DEFAULT {}", default_expr);
                }
            }
        }
        has_identity |= !identity.is_empty();
        if not_null {
            line.push_str(" NOT NULL");
        }
        lines.push(line);
    }

    let constraints: Vec<(String, String)> = sqlx::query_as(queries::CREATE_CONSTRAINTS)
        .bind(SCHEMA)
        .bind(table)
        .fetch_all(&mut *conn)
        .await?;
    for (name, definition) in constraints {
        lines.push(format!(
            "CONSTRAINT {} {}",
            quote_ident(Dialect::Postgres, &name),
            definition
        ));
    }

    let sql = format!(
        "CREATE TABLE {} (\n  {}\n)",
        quote_ident(Dialect::Postgres, table),
        lines.join(",\n  ")
    );
    Ok((sql, has_identity))
}

impl DatabaseAdapter for PostgresAdapter {
    fn engine(&self) -> EngineKind {
        EngineKind::Postgres
    }

    async fn test_connection(&mut self) -> AdapterResult<()> {
        let conn = self.connection(None).await?;
        sqlx::raw_sql("SELECT 1").execute(&mut *conn).await?;
        Ok(())
    }

    async fn get_databases(&mut self) -> AdapterResult<Vec<String>> {
        let conn = self.connection(None).await?;
        let names: Vec<String> = sqlx::query_scalar(queries::DATABASES)
            .fetch_all(&mut *conn)
            .await?;
        Ok(names)
    }

    async fn get_tables(&mut self, database: &str) -> AdapterResult<Vec<String>> {
        let conn = self.connection(Some(database)).await?;
        let mut tables: Vec<String> = sqlx::query_scalar(queries::TABLES)
            .bind(SCHEMA)
            .fetch_all(&mut *conn)
            .await?;
        tables.sort();
        debug!(database = %database, count = tables.len(), "Listed PostgreSQL tables");
        Ok(tables)
    }

    async fn create_table(
        &mut self,
        database: &str,
        table: &str,
        columns: &[ColumnDefinition],
    ) -> AdapterResult<()> {
        let sql = ddl::create_table(Dialect::Postgres, table, &TableSpec::from_definitions(columns))?;
        self.execute_statements(database, &[sql]).await
    }

    async fn delete_table(&mut self, database: &str, table: &str) -> AdapterResult<()> {
        self.execute_statements(database, &[ddl::drop_table(Dialect::Postgres, table)])
            .await
    }

    async fn rename_table(&mut self, database: &str, old_name: &str, new_name: &str) -> AdapterResult<()> {
        self.execute_statements(database, &[ddl::rename_table(Dialect::Postgres, old_name, new_name)])
            .await
    }

    async fn add_column(
        &mut self,
        database: &str,
        table: &str,
        column: &ColumnDefinition,
        default_value: Option<&str>,
    ) -> AdapterResult<()> {
        let spec = ColumnSpec::new(Dialect::Postgres, column.clone(), default_value);
        let statements = ddl::add_column(Dialect::Postgres, table, &spec)?;
        self.execute_statements(database, &statements).await
    }

    async fn remove_column(&mut self, database: &str, table: &str, column: &str) -> AdapterResult<()> {
        self.execute_statements(database, &[ddl::drop_column(Dialect::Postgres, table, column)])
            .await
    }

    async fn modify_column(
        &mut self,
        database: &str,
        table: &str,
        old_name: &str,
        column: &ColumnDefinition,
        default_value: Option<&str>,
    ) -> AdapterResult<()> {
        let spec = ColumnSpec::new(Dialect::Postgres, column.clone(), default_value);
        let conn = self.connection(Some(database)).await?;
        let mut tx = conn.begin().await?;
        match apply_modify(&mut *tx, table, old_name, &spec).await {
            Ok(()) => {
                tx.commit()
                    .await
                    .map_err(|e| AdapterError::migration(table, AdapterError::from(e).detail(), false))?;
                info!(table = %table, column = %column.name, "Modified PostgreSQL column");
                Ok(())
            }
            Err(e) => {
                let rolled_back = match tx.rollback().await {
                    Ok(()) => true,
                    Err(rollback) => {
                        warn!(table = %table, error = %rollback, "ROLLBACK failed");
                        false
                    }
                };
                Err(AdapterError::migration(table, e.detail(), rolled_back))
            }
        }
    }

    async fn get_columns(&mut self, database: &str, table: &str) -> AdapterResult<Vec<ColumnInfo>> {
        let conn = self.connection(Some(database)).await?;
        Ok(catalog_columns(conn, table)
            .await?
            .into_iter()
            .map(|c| c.info)
            .collect())
    }

    async fn get_primary_keys(&mut self, database: &str, table: &str) -> AdapterResult<Vec<String>> {
        let conn = self.connection(Some(database)).await?;
        Ok(primary_keys(&key_columns(conn, table).await?))
    }

    async fn get_unique_keys(&mut self, database: &str, table: &str) -> AdapterResult<Vec<String>> {
        let conn = self.connection(Some(database)).await?;
        Ok(unique_keys(&key_columns(conn, table).await?))
    }

    async fn query(&mut self, database: &str, sql: &str, params: &[QueryParam]) -> AdapterResult<QueryResult> {
        let is_read = StatementKind::classify(sql).is_read();
        let conn = self.connection(Some(database)).await?;
        if params.is_empty() {
            if is_read {
                let rows = sqlx::raw_sql(sql).fetch_all(&mut *conn).await?;
                return Ok(QueryResult::from_rows(rows.iter().map(DecodeRow::to_result_row).collect()));
            }
            let done = sqlx::raw_sql(sql).execute(&mut *conn).await?;
            return Ok(QueryResult::from_affected(done.rows_affected()));
        }

        let sql = rewrite_placeholders(sql);
        if is_read {
            let rows = bind_all::<sqlx::Postgres>(&sql, params).fetch_all(&mut *conn).await?;
            Ok(QueryResult::from_rows(rows.iter().map(DecodeRow::to_result_row).collect()))
        } else {
            let done = bind_all::<sqlx::Postgres>(&sql, params).execute(&mut *conn).await?;
            Ok(QueryResult::from_affected(done.rows_affected()))
        }
    }

    async fn execute_query(&mut self, sql: &str, database: Option<&str>) -> AdapterResult<QueryResult> {
        let kind = StatementKind::classify(sql);
        debug!(kind = ?kind, "Executing PostgreSQL statement");
        let conn = self.connection(database).await?;

        if !kind.is_read() {
            let done = sqlx::raw_sql(sql).execute(&mut *conn).await?;
            return Ok(QueryResult::from_affected(done.rows_affected()));
        }

        let rows: Vec<PgRow> = sqlx::raw_sql(sql).fetch_all(&mut *conn).await?;
        let types = match rows.first() {
            Some(row) => row.column_types(),
            None => match (&mut *conn).prepare(sql).await {
                Ok(statement) => column_types(statement.columns()),
                Err(e) => {
                    debug!(error = %e, "Could not describe empty result");
                    Vec::new()
                }
            },
        };
        let rows: Vec<Row> = rows.iter().map(DecodeRow::to_result_row).collect();
        let fields = result_fields(conn, sql, &types).await;
        Ok(QueryResult::from_rows(rows).with_fields(fields))
    }

    async fn export_table(&mut self, database: &str, table: &str, include_data: bool) -> AdapterResult<String> {
        let conn = self.connection(Some(database)).await?;
        let (create_sql, has_identity) = create_table_sql(conn, table).await?;
        let mut out = export::table_section(Dialect::Postgres, table, &create_sql);

        if include_data {
            let select = format!("SELECT * FROM {}", quote_ident(Dialect::Postgres, table));
            let mut rows = sqlx::raw_sql(&select).fetch(&mut *conn);
            let mut count = 0usize;
            while let Some(row) = rows.try_next().await? {
                out.push_str(&export::insert_statement(
                    Dialect::Postgres,
                    table,
                    &row.to_result_row(),
                    has_identity,
                ));
                out.push('\n');
                count += 1;
            }
            debug!(table = %table, rows = count, "Exported PostgreSQL rows");
        }
        Ok(out)
    }

    async fn close(&mut self) {
        if self.session.is_open() {
            info!(host = %self.descriptor.host, "Closing PostgreSQL session");
        }
        self.session.close().await;
    }
}

/// Field metadata for a read, flags joined from its source table.
async fn result_fields(conn: &mut PgConnection, sql: &str, types: &[(String, String)]) -> Vec<FieldInfo> {
    let catalog = match source_table(Dialect::Postgres, sql) {
        Some(table) => {
            let columns = catalog_columns(&mut *conn, &table).await;
            let keys = key_columns(&mut *conn, &table).await;
            match (columns, keys) {
                (Ok(columns), Ok(keys)) => Some((columns, keys)),
                (Err(e), _) | (_, Err(e)) => {
                    debug!(table = %table, error = %e, "No catalog metadata for result");
                    None
                }
            }
        }
        None => None,
    };

    types
        .iter()
        .map(|(name, ty)| {
            let mut field = FieldInfo::new(name, ty);
            let Some((columns, keys)) = &catalog else {
                return field;
            };
            if let Some(column) = columns.iter().find(|c| &c.info.name == name) {
                field.is_nullable = column.info.nullable;
                field.is_auto_increment = column.is_auto_increment();
            }
            field.is_primary_key = keys.iter().any(|k| k.primary && &k.column == name);
            field.is_unique = keys
                .iter()
                .any(|k| !k.primary && k.width == 1 && &k.column == name);
            field
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(def: ColumnDefinition, default_value: Option<&str>) -> ColumnSpec {
        ColumnSpec::new(Dialect::Postgres, def, default_value)
    }

    fn key(constraint: &str, primary: bool, column: &str, width: i32) -> KeyColumn {
        KeyColumn {
            constraint: constraint.to_string(),
            primary,
            column: column.to_string(),
            width,
        }
    }

    #[test]
    fn test_key_lists() {
        let keys = vec![
            key("t_pkey", true, "b", 2),
            key("t_pkey", true, "a", 2),
            key("t_email_key", false, "email", 1),
            key("t_pair_key", false, "x", 2),
            key("t_pair_key", false, "y", 2),
        ];
        assert_eq!(primary_keys(&keys), ["b", "a"]);
        assert_eq!(unique_keys(&keys), ["email"]);
    }

    #[test]
    fn test_plan_rename_and_type_change() {
        let plan = plan_modify(
            "users",
            "nick",
            &spec(ColumnDefinition::new("handle", "varchar(64)").not_null(), Some("anon")),
            &ExistingKeys::default(),
        );
        assert_eq!(
            plan,
            vec![
                r#"ALTER TABLE "users" RENAME COLUMN "nick" TO "handle""#,
                r#"ALTER TABLE "users" ALTER COLUMN "handle" TYPE varchar(64) USING "handle"::varchar(64)"#,
                r#"ALTER TABLE "users" ALTER COLUMN "handle" SET DEFAULT 'anon'"#,
                r#"ALTER TABLE "users" ALTER COLUMN "handle" SET NOT NULL"#,
            ]
        );
    }

    #[test]
    fn test_plan_leaving_composite_primary_key() {
        let existing = ExistingKeys {
            primary: Some(("t_pkey".into(), vec!["a".into(), "b".into()])),
            ..ExistingKeys::default()
        };
        let plan = plan_modify("t", "b", &spec(ColumnDefinition::new("b", "int"), None), &existing);
        assert_eq!(plan[0], r#"ALTER TABLE "t" DROP CONSTRAINT "t_pkey""#);
        assert_eq!(plan[1], r#"ALTER TABLE "t" ADD PRIMARY KEY ("a")"#);
        assert!(plan.last().unwrap().ends_with("DROP NOT NULL"));
    }

    #[test]
    fn test_plan_unique_diff() {
        let existing = ExistingKeys {
            unique: vec!["t_email_key".into()],
            ..ExistingKeys::default()
        };
        let plan = plan_modify("t", "email", &spec(ColumnDefinition::new("email", "text"), None), &existing);
        assert!(plan.contains(&r#"ALTER TABLE "t" DROP CONSTRAINT "t_email_key""#.to_string()));

        let plan = plan_modify(
            "t",
            "email",
            &spec(ColumnDefinition::new("email", "text").unique(), None),
            &ExistingKeys::default(),
        );
        assert!(plan.contains(&r#"ALTER TABLE "t" ADD CONSTRAINT "t_email_unique" UNIQUE ("email")"#.to_string()));
    }

    #[test]
    fn test_plan_identity_add_and_drop() {
        let plan = plan_modify(
            "t",
            "id",
            &spec(ColumnDefinition::new("id", "bigint").auto_increment(), None),
            &ExistingKeys::default(),
        );
        let tail: Vec<&str> = plan.iter().rev().take(3).rev().map(String::as_str).collect();
        assert_eq!(
            tail,
            [
                r#"ALTER TABLE "t" ALTER COLUMN "id" DROP DEFAULT"#,
                r#"ALTER TABLE "t" ALTER COLUMN "id" SET NOT NULL"#,
                r#"ALTER TABLE "t" ALTER COLUMN "id" ADD GENERATED ALWAYS AS IDENTITY"#,
            ]
        );

        let existing = ExistingKeys {
            identity: true,
            ..ExistingKeys::default()
        };
        let plan = plan_modify("t", "id", &spec(ColumnDefinition::new("id", "bigint"), None), &existing);
        assert!(plan.contains(&r#"ALTER TABLE "t" ALTER COLUMN "id" DROP IDENTITY IF EXISTS"#.to_string()));
    }
}
