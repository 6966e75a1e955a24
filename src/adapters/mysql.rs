//! MySQL and MariaDB adapter.
//!
//! Both engines share this implementation; the descriptor's engine kind only
//! changes how the adapter reports itself. Catalog strings are read through
//! `CONVERT(... USING utf8)` and a bytes fallback because some servers hand
//! information_schema columns back as VARBINARY.

use super::{AdapterOptions, DatabaseAdapter};
use crate::db::ddl::{self, ColumnSpec, TableSpec, column_sql, is_mysql_blob_type, key_column};
use crate::db::literal::quote_ident;
use crate::db::params::bind_all;
use crate::db::statement::source_table;
use crate::db::types::column_types;
use crate::db::{DecodeRow, Dialect, Session, StatementKind, export};
use crate::error::{AdapterError, AdapterResult};
use crate::models::{
    ColumnConstraint, ColumnDefinition, ColumnInfo, ConnectionDescriptor, EngineKind, FieldInfo,
    QueryParam, QueryResult, Row,
};
use futures_util::TryStreamExt;
use sqlx::mysql::{MySqlConnectOptions, MySqlRow};
use sqlx::{Connection, Executor, MySqlConnection, Row as _, Statement};
use tracing::{debug, info};

/// Catalogs hidden from [`DatabaseAdapter::get_databases`].
const SYSTEM_DATABASES: &[&str] = &["information_schema", "mysql", "performance_schema", "sys"];

pub(super) mod queries {
    pub const DATABASES: &str = "SHOW DATABASES";

    pub const VERSION: &str = "SELECT VERSION()";

    // An empty schema argument falls back to the session's current database.
    pub const TABLES: &str = r#"
        SELECT CONVERT(TABLE_NAME USING utf8) AS TABLE_NAME
        FROM information_schema.TABLES
        WHERE TABLE_SCHEMA = COALESCE(NULLIF(?, ''), DATABASE()) AND TABLE_TYPE = 'BASE TABLE'
        "#;

    pub const COLUMNS: &str = r#"
        SELECT
            CONVERT(COLUMN_NAME USING utf8) AS COLUMN_NAME,
            CONVERT(COLUMN_TYPE USING utf8) AS COLUMN_TYPE,
            CONVERT(IS_NULLABLE USING utf8) AS IS_NULLABLE,
            CONVERT(COLUMN_DEFAULT USING utf8) AS COLUMN_DEFAULT,
            CHARACTER_MAXIMUM_LENGTH,
            NUMERIC_PRECISION,
            NUMERIC_SCALE,
            CONVERT(COLUMN_KEY USING utf8) AS COLUMN_KEY,
            CONVERT(EXTRA USING utf8) AS EXTRA
        FROM information_schema.COLUMNS
        WHERE TABLE_SCHEMA = COALESCE(NULLIF(?, ''), DATABASE()) AND TABLE_NAME = ?
        ORDER BY ORDINAL_POSITION
        "#;

    pub const PRIMARY_KEYS: &str = r#"
        SELECT CONVERT(COLUMN_NAME USING utf8) AS COLUMN_NAME
        FROM information_schema.KEY_COLUMN_USAGE
        WHERE TABLE_SCHEMA = COALESCE(NULLIF(?, ''), DATABASE()) AND TABLE_NAME = ?
          AND CONSTRAINT_NAME = 'PRIMARY'
        ORDER BY ORDINAL_POSITION
        "#;

    pub const UNIQUE_INDEXES: &str = r#"
        SELECT
            CONVERT(s.INDEX_NAME USING utf8) AS INDEX_NAME,
            CONVERT(s.COLUMN_NAME USING utf8) AS COLUMN_NAME,
            (SELECT COUNT(*) FROM information_schema.STATISTICS w
             WHERE w.TABLE_SCHEMA = s.TABLE_SCHEMA AND w.TABLE_NAME = s.TABLE_NAME
               AND w.INDEX_NAME = s.INDEX_NAME) AS WIDTH
        FROM information_schema.STATISTICS s
        WHERE s.TABLE_SCHEMA = COALESCE(NULLIF(?, ''), DATABASE()) AND s.TABLE_NAME = ?
          AND s.NON_UNIQUE = 0 AND s.INDEX_NAME <> 'PRIMARY'
        ORDER BY s.INDEX_NAME, s.SEQ_IN_INDEX
        "#;
}

/// Safely get a string from a MySQL row.
fn get_string(row: &MySqlRow, column: &str) -> String {
    row.try_get::<String, _>(column)
        .ok()
        .or_else(|| {
            row.try_get::<Vec<u8>, _>(column)
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok())
        })
        .unwrap_or_default()
}

fn get_optional_string(row: &MySqlRow, column: &str) -> Option<String> {
    row.try_get::<Option<String>, _>(column)
        .ok()
        .flatten()
        .or_else(|| {
            row.try_get::<Option<Vec<u8>>, _>(column)
                .ok()
                .flatten()
                .and_then(|bytes| String::from_utf8(bytes).ok())
        })
}

fn get_string_by_index(row: &MySqlRow, index: usize) -> Option<String> {
    row.try_get::<String, _>(index).ok().or_else(|| {
        row.try_get::<Vec<u8>, _>(index)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
    })
}

fn try_get_u64(row: &MySqlRow, column: &str) -> Option<u64> {
    // BIGINT UNSIGNED on MySQL 8, BIGINT on 5.x and MariaDB
    if let Ok(Some(v)) = row.try_get::<Option<u64>, _>(column) {
        return Some(v);
    }
    if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(column) {
        return u64::try_from(v).ok();
    }
    None
}

struct CatalogColumn {
    info: ColumnInfo,
    key: String,
    extra: String,
}

/// Single-column unique index.
#[derive(Debug, Clone, PartialEq, Eq)]
struct UniqueIndex {
    name: String,
    column: String,
}

/// Key state of a table before one of its columns is modified.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct ExistingKeys {
    /// Primary-key columns in key order.
    primary: Vec<String>,
    /// Unique indexes covering only the modified column.
    unique: Vec<String>,
    /// Columns whose keys need a prefix length.
    prefixed: Vec<String>,
}

pub struct MySqlAdapter {
    descriptor: ConnectionDescriptor,
    options: AdapterOptions,
    session: Session<MySqlConnection>,
}

impl MySqlAdapter {
    pub fn new(descriptor: ConnectionDescriptor, options: AdapterOptions) -> Self {
        Self {
            descriptor,
            options,
            session: Session::new(),
        }
    }

    /// `VERSION()` of the server, e.g. `10.11.6-MariaDB`.
    pub async fn server_version(&mut self) -> AdapterResult<String> {
        let conn = self.connection(None).await?;
        let row = sqlx::raw_sql(queries::VERSION).fetch_one(&mut *conn).await?;
        Ok(get_string_by_index(&row, 0).unwrap_or_default())
    }

    async fn connection(&mut self, database: Option<&str>) -> AdapterResult<&mut MySqlConnection> {
        let target = database.filter(|d| !d.is_empty());
        if !self.session.is_bound_to(target) {
            let name = target
                .map(str::to_string)
                .or_else(|| self.descriptor.database.clone());
            self.session.close().await;
            let conn = self.open(name.as_deref()).await?;
            self.session.replace(conn, name).await;
        }
        self.session.get_mut().ok_or_else(|| {
            AdapterError::connection("MySQL session is not open", "Retry the operation")
        })
    }

    async fn open(&self, database: Option<&str>) -> AdapterResult<MySqlConnection> {
        let d = &self.descriptor;
        let port = d.effective_port().unwrap_or(3306);
        let mut options = MySqlConnectOptions::new()
            .host(&d.host)
            .port(port)
            .username(&d.username)
            .password(&d.password)
            .charset("utf8mb4");
        if let Some(database) = database {
            options = options.database(database);
        }

        let conn = tokio::time::timeout(self.options.connect_timeout, MySqlConnection::connect_with(&options))
            .await
            .map_err(|_| {
                AdapterError::connection(
                    format!("Timed out connecting to {}:{}", d.host, port),
                    "Check that the server is reachable or raise the connect timeout",
                )
            })?
            .map_err(|e| {
                AdapterError::connection(
                    format!("Failed to connect to {}: {}", d.engine, e),
                    "Check the host, port, credentials and database name",
                )
            })?;
        info!(host = %d.host, port, database = ?database, engine = %d.engine, "Connected to MySQL protocol server");
        Ok(conn)
    }

    async fn execute_statements(&mut self, database: &str, statements: &[String]) -> AdapterResult<()> {
        let conn = self.connection(Some(database)).await?;
        for sql in statements {
            debug!(sql = %sql, "Executing MySQL DDL");
            sqlx::raw_sql(sql).execute(&mut *conn).await?;
        }
        Ok(())
    }
}

async fn catalog_columns(conn: &mut MySqlConnection, database: &str, table: &str) -> AdapterResult<Vec<CatalogColumn>> {
    let rows = sqlx::query(queries::COLUMNS)
        .bind(database)
        .bind(table)
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows
        .iter()
        .map(|row| {
            let info = ColumnInfo::new(
                get_string(row, "COLUMN_NAME"),
                get_string(row, "COLUMN_TYPE"),
                get_string(row, "IS_NULLABLE") == "YES",
            )
            .with_default(get_optional_string(row, "COLUMN_DEFAULT"))
            .with_max_length(try_get_u64(row, "CHARACTER_MAXIMUM_LENGTH"))
            .with_numeric(
                try_get_u64(row, "NUMERIC_PRECISION"),
                try_get_u64(row, "NUMERIC_SCALE"),
            );
            CatalogColumn {
                info,
                key: get_string(row, "COLUMN_KEY"),
                extra: get_string(row, "EXTRA"),
            }
        })
        .collect())
}

async fn primary_keys(conn: &mut MySqlConnection, database: &str, table: &str) -> AdapterResult<Vec<String>> {
    let rows = sqlx::query(queries::PRIMARY_KEYS)
        .bind(database)
        .bind(table)
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows.iter().map(|r| get_string(r, "COLUMN_NAME")).collect())
}

async fn unique_indexes(conn: &mut MySqlConnection, database: &str, table: &str) -> AdapterResult<Vec<UniqueIndex>> {
    let rows = sqlx::query(queries::UNIQUE_INDEXES)
        .bind(database)
        .bind(table)
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows
        .iter()
        .filter(|r| try_get_u64(r, "WIDTH") == Some(1))
        .map(|r| UniqueIndex {
            name: get_string(r, "INDEX_NAME"),
            column: get_string(r, "COLUMN_NAME"),
        })
        .collect())
}

async fn existing_keys(
    conn: &mut MySqlConnection,
    database: &str,
    table: &str,
    column: &str,
) -> AdapterResult<ExistingKeys> {
    let primary = primary_keys(&mut *conn, database, table).await?;
    let unique = unique_indexes(&mut *conn, database, table)
        .await?
        .into_iter()
        .filter(|u| u.column == column)
        .map(|u| u.name)
        .collect();
    let prefixed = catalog_columns(&mut *conn, database, table)
        .await?
        .into_iter()
        .filter(|c| is_mysql_blob_type(&c.info.data_type))
        .map(|c| c.info.name)
        .collect();
    Ok(ExistingKeys {
        primary,
        unique,
        prefixed,
    })
}

/// Ordered `ALTER TABLE` statements turning `old_name` into `spec`.
///
/// `CHANGE COLUMN` runs first without `AUTO_INCREMENT` so the key changes
/// never act on an identity column; the identity is restored last.
fn plan_modify(table: &str, old_name: &str, spec: &ColumnSpec, existing: &ExistingKeys) -> Vec<String> {
    let def = &spec.def;
    let t = quote_ident(Dialect::MySql, table);

    let mut plain = spec.clone();
    plain.def.constraints.remove(&ColumnConstraint::AutoIncrement);
    if def.is_auto_increment() {
        plain.default_sql = None;
    }
    let mut out = vec![format!(
        "ALTER TABLE {t} CHANGE COLUMN {} {}",
        quote_ident(Dialect::MySql, old_name),
        column_sql(Dialect::MySql, &plain, false, false)
    )];

    let key_ref = |name: &String| {
        if name == old_name || name == &def.name {
            key_column(Dialect::MySql, spec)
        } else if existing.prefixed.contains(name) {
            format!("{}({})", quote_ident(Dialect::MySql, name), ddl::MYSQL_KEY_PREFIX_LEN)
        } else {
            quote_ident(Dialect::MySql, name)
        }
    };

    let in_key = existing.primary.iter().any(|n| n == old_name);
    if in_key != def.is_primary_key() {
        let remaining: Vec<String> = if in_key {
            existing.primary.iter().filter(|n| *n != old_name).cloned().collect()
        } else {
            existing.primary.iter().cloned().chain([def.name.clone()]).collect()
        };
        let mut actions = Vec::new();
        if !existing.primary.is_empty() {
            actions.push("DROP PRIMARY KEY".to_string());
        }
        if !remaining.is_empty() {
            let columns: Vec<String> = remaining.iter().map(key_ref).collect();
            actions.push(format!("ADD PRIMARY KEY ({})", columns.join(", ")));
        }
        out.push(format!("ALTER TABLE {t} {}", actions.join(", ")));
    }

    if def.is_unique() {
        if existing.unique.is_empty() {
            out.push(format!(
                "ALTER TABLE {t} ADD UNIQUE INDEX {} ({})",
                quote_ident(Dialect::MySql, &ddl::unique_index_name(table, &def.name)),
                key_column(Dialect::MySql, spec)
            ));
        }
    } else {
        for name in &existing.unique {
            out.push(format!(
                "ALTER TABLE {t} DROP INDEX {}",
                quote_ident(Dialect::MySql, name)
            ));
        }
    }

    if def.is_auto_increment() {
        let identity = ColumnSpec::with_raw_default(def.clone(), None);
        out.push(format!(
            "ALTER TABLE {t} MODIFY COLUMN {}",
            column_sql(Dialect::MySql, &identity, false, false)
        ));
    }
    out
}

/// Field metadata for a read, flags joined from its source table.
async fn result_fields(conn: &mut MySqlConnection, sql: &str, types: &[(String, String)]) -> Vec<FieldInfo> {
    let catalog = match source_table(Dialect::MySql, sql) {
        Some(table) => {
            let columns = catalog_columns(&mut *conn, "", &table).await;
            let unique = unique_indexes(&mut *conn, "", &table).await;
            match (columns, unique) {
                (Ok(columns), Ok(unique)) => Some((columns, unique)),
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
            let Some((columns, unique)) = &catalog else {
                return field;
            };
            if let Some(column) = columns.iter().find(|c| &c.info.name == name) {
                field.is_nullable = column.info.nullable;
                field.is_primary_key = column.key == "PRI";
                field.is_auto_increment = column.extra.to_ascii_lowercase().contains("auto_increment");
            }
            field.is_unique = unique.iter().any(|u| &u.column == name);
            field
        })
        .collect()
}

impl DatabaseAdapter for MySqlAdapter {
    fn engine(&self) -> EngineKind {
        self.descriptor.engine
    }

    async fn test_connection(&mut self) -> AdapterResult<()> {
        let conn = self.connection(None).await?;
        sqlx::raw_sql("SELECT 1").execute(&mut *conn).await?;
        Ok(())
    }

    async fn get_databases(&mut self) -> AdapterResult<Vec<String>> {
        let conn = self.connection(None).await?;
        let rows = sqlx::raw_sql(queries::DATABASES).fetch_all(&mut *conn).await?;
        Ok(rows
            .iter()
            .filter_map(|r| get_string_by_index(r, 0))
            .filter(|name| !SYSTEM_DATABASES.contains(&name.to_ascii_lowercase().as_str()))
            .collect())
    }

    async fn get_tables(&mut self, database: &str) -> AdapterResult<Vec<String>> {
        let conn = self.connection(Some(database)).await?;
        let rows = sqlx::query(queries::TABLES)
            .bind(database)
            .fetch_all(&mut *conn)
            .await?;
        let mut tables: Vec<String> = rows.iter().map(|r| get_string(r, "TABLE_NAME")).collect();
        tables.sort();
        debug!(database = %database, count = tables.len(), "Listed MySQL tables");
        Ok(tables)
    }

    async fn create_table(
        &mut self,
        database: &str,
        table: &str,
        columns: &[ColumnDefinition],
    ) -> AdapterResult<()> {
        let sql = ddl::create_table(Dialect::MySql, table, &TableSpec::from_definitions(columns))?;
        self.execute_statements(database, &[sql]).await
    }

    async fn delete_table(&mut self, database: &str, table: &str) -> AdapterResult<()> {
        self.execute_statements(database, &[ddl::drop_table(Dialect::MySql, table)])
            .await
    }

    async fn rename_table(&mut self, database: &str, old_name: &str, new_name: &str) -> AdapterResult<()> {
        self.execute_statements(database, &[ddl::rename_table(Dialect::MySql, old_name, new_name)])
            .await
    }

    async fn add_column(
        &mut self,
        database: &str,
        table: &str,
        column: &ColumnDefinition,
        default_value: Option<&str>,
    ) -> AdapterResult<()> {
        let spec = ColumnSpec::new(Dialect::MySql, column.clone(), default_value);
        let statements = ddl::add_column(Dialect::MySql, table, &spec)?;
        self.execute_statements(database, &statements).await
    }

    async fn remove_column(&mut self, database: &str, table: &str, column: &str) -> AdapterResult<()> {
        self.execute_statements(database, &[ddl::drop_column(Dialect::MySql, table, column)])
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
        let spec = ColumnSpec::new(Dialect::MySql, column.clone(), default_value);
        let conn = self.connection(Some(database)).await?;
        let existing = existing_keys(&mut *conn, database, table, old_name).await?;
        // MySQL commits DDL implicitly; there is no transaction to roll back.
        for sql in plan_modify(table, old_name, &spec, &existing) {
            debug!(table = %table, sql = %sql, "Modify step");
            sqlx::raw_sql(&sql).execute(&mut *conn).await?;
        }
        info!(table = %table, column = %column.name, "Modified MySQL column");
        Ok(())
    }

    async fn get_columns(&mut self, database: &str, table: &str) -> AdapterResult<Vec<ColumnInfo>> {
        let conn = self.connection(Some(database)).await?;
        Ok(catalog_columns(conn, database, table)
            .await?
            .into_iter()
            .map(|c| c.info)
            .collect())
    }

    async fn get_primary_keys(&mut self, database: &str, table: &str) -> AdapterResult<Vec<String>> {
        let conn = self.connection(Some(database)).await?;
        primary_keys(conn, database, table).await
    }

    async fn get_unique_keys(&mut self, database: &str, table: &str) -> AdapterResult<Vec<String>> {
        let conn = self.connection(Some(database)).await?;
        let mut columns: Vec<String> = Vec::new();
        for index in unique_indexes(conn, database, table).await? {
            if !columns.contains(&index.column) {
                columns.push(index.column);
            }
        }
        Ok(columns)
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

        if is_read {
            let rows = bind_all::<sqlx::MySql>(sql, params).fetch_all(&mut *conn).await?;
            Ok(QueryResult::from_rows(rows.iter().map(DecodeRow::to_result_row).collect()))
        } else {
            let done = bind_all::<sqlx::MySql>(sql, params).execute(&mut *conn).await?;
            Ok(QueryResult::from_affected(done.rows_affected()))
        }
    }

    async fn execute_query(&mut self, sql: &str, database: Option<&str>) -> AdapterResult<QueryResult> {
        let kind = StatementKind::classify(sql);
        debug!(kind = ?kind, "Executing MySQL statement");
        let conn = self.connection(database).await?;

        if !kind.is_read() {
            let done = sqlx::raw_sql(sql).execute(&mut *conn).await?;
            return Ok(QueryResult::from_affected(done.rows_affected()));
        }

        let rows: Vec<MySqlRow> = sqlx::raw_sql(sql).fetch_all(&mut *conn).await?;
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
        let ident = quote_ident(Dialect::MySql, table);
        let row = sqlx::raw_sql(&format!("SHOW CREATE TABLE {}", ident))
            .fetch_one(&mut *conn)
            .await?;
        let create_sql = get_string_by_index(&row, 1).ok_or_else(|| {
            AdapterError::query(format!("SHOW CREATE TABLE returned nothing for {}", table), None)
        })?;
        let mut out = export::table_section(Dialect::MySql, table, &create_sql);

        if include_data {
            let select = format!("SELECT * FROM {}", ident);
            let mut rows = sqlx::raw_sql(&select).fetch(&mut *conn);
            let mut count = 0usize;
            while let Some(row) = rows.try_next().await? {
                out.push_str(&export::insert_statement(Dialect::MySql, table, &row.to_result_row(), false));
                out.push('\n');
                count += 1;
            }
            debug!(table = %table, rows = count, "Exported MySQL rows");
        }
        Ok(out)
    }

    async fn close(&mut self) {
        if self.session.is_open() {
            info!(host = %self.descriptor.host, "Closing MySQL session");
        }
        self.session.close().await;
    }
}
