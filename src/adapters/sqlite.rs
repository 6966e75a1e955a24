//! SQLite adapter over a local file.
//!
//! The file is loaded into a private in-memory database when the session
//! opens. Every successful write exports the whole image with `VACUUM INTO`
//! to a temp file next to the original and renames it over the original, so
//! the file on disk is always a complete database.
//!
//! The catalog helpers at the bottom of this module are shared with the
//! SSH-backed adapter; both only need a way to fetch rows.

use super::DatabaseAdapter;
use crate::db::ddl::{self, ColumnSpec, TableSpec};
use crate::db::literal::{quote_ident, quote_string, value_literal};
use crate::db::params::bind_all;
use crate::db::rebuild::{self, ColumnChange, PROLOGUE, TableSnapshot, plan_rebuild};
use crate::db::statement::{is_pragma_assignment, source_table};
use crate::db::types::column_types;
use crate::db::{DecodeRow, Dialect, Session, StatementKind, export};
use crate::error::{AdapterError, AdapterResult};
use crate::models::{
    ColumnDefinition, ColumnInfo, EngineKind, FieldInfo, QueryParam, QueryResult, Row, SqlValue,
};
use sqlx::sqlite::{SqliteConnectOptions, SqliteRow};
use sqlx::{Connection, Executor, Sqlite, SqliteConnection, Statement};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub(super) mod queries {
    pub const TABLES: &str =
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'";

    pub const INDEX_SQL: &str = r#"
        SELECT sql FROM sqlite_master
        WHERE type = 'index' AND tbl_name = ? AND sql IS NOT NULL
        ORDER BY name
        "#;

    pub const COLUMN_NAMES: &str = "SELECT name FROM pragma_table_info(?) ORDER BY cid";

    /// Columns that hold data; generated columns are computed on read.
    pub const STORED_COLUMNS: &str =
        "SELECT name FROM pragma_table_xinfo(?) WHERE hidden NOT IN (2, 3) ORDER BY cid";

    pub const VERSION: &str = "SELECT sqlite_version() AS version";

    pub const TOTAL_CHANGES: &str = "SELECT total_changes()";

    pub const LOAD_TABLES: &str = r#"
        SELECT name, sql FROM disk.sqlite_master
        WHERE type = 'table' AND name NOT LIKE 'sqlite_%' AND sql IS NOT NULL
        ORDER BY rowid
        "#;

    pub const LOAD_HAS_SEQUENCE: &str =
        "SELECT COUNT(*) FROM disk.sqlite_master WHERE type = 'table' AND name = 'sqlite_sequence'";

    pub const LOAD_SCHEMA_OBJECTS: &str = r#"
        SELECT sql FROM disk.sqlite_master
        WHERE type IN ('index', 'view', 'trigger') AND sql IS NOT NULL
        ORDER BY CASE type WHEN 'index' THEN 0 WHEN 'view' THEN 1 ELSE 2 END, rowid
        "#;
}

/// SQLite file opened as an in-memory image.
pub struct SqliteAdapter {
    path: PathBuf,
    session: Session<SqliteConnection>,
}

impl SqliteAdapter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            session: Session::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn connection(&mut self) -> AdapterResult<&mut SqliteConnection> {
        if !self.session.is_open() {
            let conn = self.open_image().await?;
            self.session.replace(conn, Some("main".to_string())).await;
        }
        self.session.get_mut().ok_or_else(|| {
            AdapterError::connection("SQLite session is not open", "Retry the operation")
        })
    }

    async fn open_image(&self) -> AdapterResult<SqliteConnection> {
        // A plain `:memory:` open. `sqlite::memory:` sets SQLITE_OPEN_MEMORY,
        // which every later ATTACH and VACUUM INTO inherits, so nothing
        // would ever reach the file.
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .create_if_missing(true);
        let mut conn = SqliteConnection::connect_with(&options).await.map_err(|e| {
            AdapterError::connection(
                format!("Failed to open SQLite: {}", e),
                "Check that the SQLite library is usable",
            )
        })?;

        let exists = tokio::fs::try_exists(&self.path)
            .await
            .map_err(|e| AdapterError::io(self.path.display().to_string(), e))?;
        if exists {
            if let Err(e) = load_file(&mut conn, &self.path).await {
                let _ = conn.close().await;
                return Err(e);
            }
        }
        info!(path = %self.path.display(), existing = exists, "Opened SQLite image");
        Ok(conn)
    }

    /// Write the image over the backing file.
    ///
    /// On failure the image is dropped, so the next operation reloads what
    /// is actually on disk.
    async fn persist(&mut self) -> AdapterResult<()> {
        let result = self.write_image().await;
        if let Err(e) = &result {
            warn!(path = %self.path.display(), error = %e, "Failed to persist SQLite image, discarding it");
            self.session.close().await;
        }
        result
    }

    async fn write_image(&mut self) -> AdapterResult<()> {
        let mut tmp = self.path.as_os_str().to_owned();
        tmp.push(format!(".{}.tmp", uuid::Uuid::new_v4().simple()));
        let tmp = PathBuf::from(tmp);

        let vacuum = format!(
            "VACUUM INTO {}",
            quote_string(Dialect::Sqlite, &tmp.to_string_lossy())
        );
        let conn = self.connection().await?;
        if let Err(e) = sqlx::raw_sql(&vacuum).execute(&mut *conn).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(AdapterError::io(self.path.display().to_string(), e));
        }
        debug!(path = %self.path.display(), "Persisted SQLite image");
        Ok(())
    }

    async fn exec_raw(&mut self, sql: &str) -> AdapterResult<u64> {
        let conn = self.connection().await?;
        let done = sqlx::raw_sql(sql).execute(&mut *conn).await?;
        Ok(done.rows_affected())
    }

    /// Run statements in order, then persist.
    async fn execute_statements(&mut self, statements: &[String]) -> AdapterResult<()> {
        for sql in statements {
            debug!(sql = %sql, "Executing SQLite DDL");
            self.exec_raw(sql).await?;
        }
        self.persist().await
    }

    async fn total_changes(&mut self) -> AdapterResult<i64> {
        let conn = self.connection().await?;
        let changes: i64 = sqlx::query_scalar(queries::TOTAL_CHANGES)
            .fetch_one(&mut *conn)
            .await?;
        Ok(changes)
    }

    /// Run a statement classified as a read. Reads can still write
    /// (`WITH .. INSERT`, `PRAGMA x = y`), so the change counter decides
    /// whether the image is persisted.
    async fn run_read(&mut self, sql: &str, params: &[QueryParam]) -> AdapterResult<(Vec<SqliteRow>, u64)> {
        let before = self.total_changes().await?;
        let conn = self.connection().await?;
        let rows = if params.is_empty() {
            sqlx::raw_sql(sql).fetch_all(&mut *conn).await?
        } else {
            bind_all::<Sqlite>(sql, params).fetch_all(&mut *conn).await?
        };
        let changed = u64::try_from(self.total_changes().await? - before).unwrap_or(0);
        if changed > 0 || is_pragma_assignment(sql) {
            debug!(changed, "Read statement modified the image");
            self.persist().await?;
        }
        Ok((rows, changed))
    }

    async fn pragma(&mut self, name: &str) -> AdapterResult<i64> {
        let conn = self.connection().await?;
        let value: i64 = sqlx::query_scalar(&format!("PRAGMA {}", name))
            .fetch_one(&mut *conn)
            .await?;
        Ok(value)
    }

    /// Rebuild `table` applying `change`, inside one transaction.
    async fn rebuild(&mut self, table: &str, change: ColumnChange) -> AdapterResult<()> {
        let foreign_keys = self.pragma("foreign_keys").await?;
        let legacy_alter = self.pragma("legacy_alter_table").await?;
        for p in PROLOGUE {
            self.exec_raw(p).await?;
        }

        let outcome = self.run_rebuild(table, change).await;

        for restore in [
            format!("PRAGMA legacy_alter_table = {}", legacy_alter),
            format!("PRAGMA foreign_keys = {}", foreign_keys),
        ] {
            if let Err(e) = self.exec_raw(&restore).await {
                warn!(table = %table, error = %e, "Failed to restore pragma after rebuild");
            }
        }
        outcome?;
        self.persist().await
    }

    async fn run_rebuild(&mut self, table: &str, change: ColumnChange) -> AdapterResult<()> {
        self.exec_raw("BEGIN").await?;
        let result = match self.rebuild_steps(table, change).await {
            Ok(()) => self.exec_raw("COMMIT").await.map(|_| ()),
            Err(e) => Err(e),
        };
        let Err(e) = result else {
            info!(table = %table, "Rebuilt SQLite table");
            return Ok(());
        };
        let rolled_back = match self.exec_raw("ROLLBACK").await {
            Ok(_) => true,
            Err(rollback) => {
                warn!(table = %table, error = %rollback, "ROLLBACK failed");
                false
            }
        };
        warn!(table = %table, error = %e, rolled_back, "SQLite table rebuild failed");
        Err(AdapterError::migration(table, e.detail(), rolled_back))
    }

    async fn rebuild_steps(&mut self, table: &str, change: ColumnChange) -> AdapterResult<()> {
        let snapshot = load_snapshot(self, table).await?;
        let plan = plan_rebuild(&snapshot, change, chrono::Utc::now().timestamp_millis())?;
        for sql in &plan.statements {
            debug!(table = %table, sql = %sql, "Rebuild step");
            self.exec_raw(sql).await?;
        }
        Ok(())
    }
}

/// Copy the file's schema and rows into the in-memory connection.
async fn load_file(conn: &mut SqliteConnection, path: &Path) -> AdapterResult<()> {
    sqlx::raw_sql("PRAGMA foreign_keys = OFF").execute(&mut *conn).await?;
    let attach = format!(
        "ATTACH DATABASE {} AS disk",
        quote_string(Dialect::Sqlite, &path.to_string_lossy())
    );
    sqlx::raw_sql(&attach).execute(&mut *conn).await.map_err(|e| {
        AdapterError::connection(
            format!("Failed to open {}: {}", path.display(), e),
            "Check that the file is a readable SQLite database",
        )
    })?;

    let tables: Vec<(String, String)> = sqlx::query_as(queries::LOAD_TABLES)
        .fetch_all(&mut *conn)
        .await?;
    for (_, sql) in &tables {
        sqlx::raw_sql(sql).execute(&mut *conn).await?;
    }
    for (name, _) in &tables {
        let columns: Vec<String> = sqlx::query_scalar(queries::STORED_COLUMNS)
            .bind(name)
            .fetch_all(&mut *conn)
            .await?;
        let list = columns
            .iter()
            .map(|c| quote_ident(Dialect::Sqlite, c))
            .collect::<Vec<_>>()
            .join(", ");
        let ident = quote_ident(Dialect::Sqlite, name);
        let copy = format!("INSERT INTO main.{ident} ({list}) SELECT {list} FROM disk.{ident}");
        sqlx::raw_sql(&copy).execute(&mut *conn).await?;
    }

    let has_sequence: i64 = sqlx::query_scalar(queries::LOAD_HAS_SEQUENCE)
        .fetch_one(&mut *conn)
        .await?;
    if has_sequence > 0 {
        sqlx::raw_sql(
            "DELETE FROM main.sqlite_sequence; \
             INSERT INTO main.sqlite_sequence (name, seq) SELECT name, seq FROM disk.sqlite_sequence",
        )
        .execute(&mut *conn)
        .await?;
    }

    let objects: Vec<String> = sqlx::query_scalar(queries::LOAD_SCHEMA_OBJECTS)
        .fetch_all(&mut *conn)
        .await?;
    for sql in &objects {
        sqlx::raw_sql(sql).execute(&mut *conn).await?;
    }

    // header values VACUUM INTO writes back out
    for pragma in ["user_version", "application_id"] {
        let value: i64 = sqlx::query_scalar(&format!("PRAGMA disk.{pragma}"))
            .fetch_one(&mut *conn)
            .await?;
        sqlx::raw_sql(&format!("PRAGMA main.{pragma} = {value}"))
            .execute(&mut *conn)
            .await?;
    }

    sqlx::raw_sql("DETACH DATABASE disk").execute(&mut *conn).await?;
    sqlx::raw_sql("PRAGMA foreign_keys = ON").execute(&mut *conn).await?;
    debug!(path = %path.display(), tables = tables.len(), "Loaded SQLite file");
    Ok(())
}

impl SqliteExec for SqliteAdapter {
    async fn fetch_rows(&mut self, sql: &str, params: &[QueryParam]) -> AdapterResult<Vec<Row>> {
        let conn = self.connection().await?;
        let rows = if params.is_empty() {
            sqlx::raw_sql(sql).fetch_all(&mut *conn).await?
        } else {
            bind_all::<Sqlite>(sql, params).fetch_all(&mut *conn).await?
        };
        Ok(rows.iter().map(DecodeRow::to_result_row).collect())
    }
}

impl DatabaseAdapter for SqliteAdapter {
    fn engine(&self) -> EngineKind {
        EngineKind::Sqlite
    }

    async fn test_connection(&mut self) -> AdapterResult<()> {
        let conn = self.connection().await?;
        sqlx::raw_sql("SELECT 1").execute(&mut *conn).await?;
        Ok(())
    }

    async fn get_databases(&mut self) -> AdapterResult<Vec<String>> {
        Ok(vec!["main".to_string()])
    }

    async fn get_tables(&mut self, _database: &str) -> AdapterResult<Vec<String>> {
        list_tables(self).await
    }

    async fn create_table(
        &mut self,
        _database: &str,
        table: &str,
        columns: &[ColumnDefinition],
    ) -> AdapterResult<()> {
        let sql = ddl::create_table(Dialect::Sqlite, table, &TableSpec::from_definitions(columns))?;
        self.execute_statements(&[sql]).await
    }

    async fn delete_table(&mut self, _database: &str, table: &str) -> AdapterResult<()> {
        self.execute_statements(&[ddl::drop_table(Dialect::Sqlite, table)]).await
    }

    async fn rename_table(&mut self, _database: &str, old_name: &str, new_name: &str) -> AdapterResult<()> {
        self.execute_statements(&[ddl::rename_table(Dialect::Sqlite, old_name, new_name)])
            .await
    }

    async fn add_column(
        &mut self,
        _database: &str,
        table: &str,
        column: &ColumnDefinition,
        default_value: Option<&str>,
    ) -> AdapterResult<()> {
        let spec = ColumnSpec::new(Dialect::Sqlite, column.clone(), default_value);
        if needs_rebuild_to_add(&spec) {
            debug!(table = %table, column = %column.name, "Adding column through a table rebuild");
            return self.rebuild(table, ColumnChange::Add { spec }).await;
        }
        let statements = ddl::add_column(Dialect::Sqlite, table, &spec)?;
        self.execute_statements(&statements).await
    }

    async fn remove_column(&mut self, _database: &str, table: &str, column: &str) -> AdapterResult<()> {
        ensure_drop_column(self).await?;
        self.execute_statements(&[ddl::drop_column(Dialect::Sqlite, table, column)])
            .await
    }

    async fn modify_column(
        &mut self,
        _database: &str,
        table: &str,
        old_name: &str,
        column: &ColumnDefinition,
        default_value: Option<&str>,
    ) -> AdapterResult<()> {
        let spec = ColumnSpec::new(Dialect::Sqlite, column.clone(), default_value);
        let change = ColumnChange::Modify {
            old_name: old_name.to_string(),
            spec,
        };
        self.rebuild(table, change).await
    }

    async fn get_columns(&mut self, _database: &str, table: &str) -> AdapterResult<Vec<ColumnInfo>> {
        Ok(load_snapshot(self, table).await?.column_infos())
    }

    async fn get_primary_keys(&mut self, _database: &str, table: &str) -> AdapterResult<Vec<String>> {
        Ok(load_snapshot(self, table).await?.primary_keys())
    }

    async fn get_unique_keys(&mut self, _database: &str, table: &str) -> AdapterResult<Vec<String>> {
        Ok(load_snapshot(self, table).await?.unique_keys())
    }

    async fn query(&mut self, _database: &str, sql: &str, params: &[QueryParam]) -> AdapterResult<QueryResult> {
        if StatementKind::classify(sql).is_read() {
            let (rows, changed) = self.run_read(sql, params).await?;
            return Ok(read_result(&rows, changed));
        }
        let conn = self.connection().await?;
        let done = if params.is_empty() {
            sqlx::raw_sql(sql).execute(&mut *conn).await?
        } else {
            bind_all::<Sqlite>(sql, params).execute(&mut *conn).await?
        };
        self.persist().await?;
        Ok(QueryResult::from_affected(done.rows_affected()))
    }

    async fn execute_query(&mut self, sql: &str, _database: Option<&str>) -> AdapterResult<QueryResult> {
        let kind = StatementKind::classify(sql);
        debug!(kind = ?kind, "Executing SQLite statement");
        if !kind.is_read() {
            let conn = self.connection().await?;
            let done = sqlx::raw_sql(sql).execute(&mut *conn).await?;
            self.persist().await?;
            return Ok(QueryResult::from_affected(done.rows_affected()));
        }

        let (rows, changed) = self.run_read(sql, &[]).await?;
        if rows.is_empty() && changed > 0 {
            return Ok(QueryResult::from_affected(changed));
        }
        let conn = self.connection().await?;
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
        let fields = result_fields(self, sql, &types).await;
        Ok(QueryResult::from_rows(rows).with_fields(fields))
    }

    async fn export_table(&mut self, _database: &str, table: &str, include_data: bool) -> AdapterResult<String> {
        export_table(self, table, include_data).await
    }

    async fn close(&mut self) {
        if self.session.is_open() {
            info!(path = %self.path.display(), "Closing SQLite image");
        }
        self.session.close().await;
    }
}

/// Rows of a read, or the change count when a row-less read wrote.
fn read_result(rows: &[SqliteRow], changed: u64) -> QueryResult {
    if rows.is_empty() && changed > 0 {
        return QueryResult::from_affected(changed);
    }
    QueryResult::from_rows(rows.iter().map(DecodeRow::to_result_row).collect())
}

// =============================================================================
// Shared SQLite catalog helpers
// =============================================================================

/// Row access provided by both SQLite adapters.
pub(super) trait SqliteExec {
    /// Run one read statement. `params` fill `?` placeholders.
    async fn fetch_rows(&mut self, sql: &str, params: &[QueryParam]) -> AdapterResult<Vec<Row>>;
}

fn text(row: &Row, column: &str) -> Option<String> {
    row.get(column).and_then(SqlValue::as_str).map(str::to_string)
}

/// SQLite refuses non-constant defaults and key columns in `ADD COLUMN`.
pub(super) fn needs_rebuild_to_add(spec: &ColumnSpec) -> bool {
    spec.default_sql
        .as_deref()
        .is_some_and(ddl::is_sqlite_non_constant_default)
}

pub(super) async fn list_tables<E: SqliteExec>(exec: &mut E) -> AdapterResult<Vec<String>> {
    let rows = exec.fetch_rows(queries::TABLES, &[]).await?;
    let mut tables: Vec<String> = rows.iter().filter_map(|r| text(r, "name")).collect();
    tables.sort();
    debug!(count = tables.len(), "Listed SQLite tables");
    Ok(tables)
}

/// Catalog image of `table`.
pub(super) async fn load_snapshot<E: SqliteExec>(exec: &mut E, table: &str) -> AdapterResult<TableSnapshot> {
    let params = [QueryParam::from(table)];
    let columns = exec.fetch_rows(rebuild::queries::COLUMNS, &params).await?;
    let table_sql = exec.fetch_rows(rebuild::queries::TABLE_SQL, &params).await?;
    let indexes = exec.fetch_rows(rebuild::queries::INDEXES, &params).await?;
    let foreign_keys = exec.fetch_rows(rebuild::queries::FOREIGN_KEYS, &params).await?;
    let triggers = exec.fetch_rows(rebuild::queries::TRIGGERS, &params).await?;
    let sql = table_sql.first().and_then(|r| text(r, "sql"));
    TableSnapshot::from_rows(
        table,
        &columns,
        sql.as_deref(),
        &indexes,
        &foreign_keys,
        &triggers,
    )
}

pub(super) async fn ensure_drop_column<E: SqliteExec>(exec: &mut E) -> AdapterResult<()> {
    let rows = exec.fetch_rows(queries::VERSION, &[]).await?;
    let version = rows.first().and_then(|r| text(r, "version")).unwrap_or_default();
    ddl::ensure_sqlite_drop_column(&version)
}

/// Field metadata for a read, joined from the catalog of its source table.
pub(super) async fn result_fields<E: SqliteExec>(
    exec: &mut E,
    sql: &str,
    column_types: &[(String, String)],
) -> Vec<FieldInfo> {
    let snapshot = match source_table(Dialect::Sqlite, sql) {
        Some(table) => match load_snapshot(exec, &table).await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                debug!(table = %table, error = %e, "No catalog metadata for result");
                None
            }
        },
        None => None,
    };
    column_types
        .iter()
        .map(|(name, ty)| match &snapshot {
            Some(s) => s.field_info(name, ty),
            None => FieldInfo::new(name, ty),
        })
        .collect()
}

/// `SELECT` rendering every column of `table` as a SQL literal.
///
/// Blobs use lowercase hex; everything else goes through `quote()`.
pub(super) fn dump_select(table: &str, columns: &[String]) -> String {
    let exprs = columns
        .iter()
        .map(|c| {
            let ident = quote_ident(Dialect::Sqlite, c);
            format!(
                "CASE typeof({ident}) WHEN 'blob' THEN 'X''' || lower(hex({ident})) || '''' ELSE quote({ident}) END AS {ident}"
            )
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!("SELECT {} FROM {}", exprs, quote_ident(Dialect::Sqlite, table))
}

/// Literal text produced by [`dump_select`], as it came back from the engine.
fn literal_text(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => "NULL".to_string(),
        SqlValue::Text(s) | SqlValue::Decimal(s) => s.clone(),
        other => value_literal(Dialect::Sqlite, other),
    }
}

pub(super) async fn export_table<E: SqliteExec>(exec: &mut E, table: &str, include_data: bool) -> AdapterResult<String> {
    let params = [QueryParam::from(table)];
    let create = exec
        .fetch_rows(rebuild::queries::TABLE_SQL, &params)
        .await?
        .first()
        .and_then(|r| text(r, "sql"))
        .ok_or_else(|| AdapterError::query(format!("no such table: {}", table), None))?;

    let mut create_sql = create.trim_end().trim_end_matches(';').to_string();
    for index in exec.fetch_rows(queries::INDEX_SQL, &params).await? {
        if let Some(sql) = text(&index, "sql") {
            create_sql.push_str(";\n");
            create_sql.push_str(sql.trim_end_matches(';'));
        }
    }
    let mut out = export::table_section(Dialect::Sqlite, table, &create_sql);

    if include_data {
        let columns: Vec<String> = exec
            .fetch_rows(queries::COLUMN_NAMES, &params)
            .await?
            .iter()
            .filter_map(|r| text(r, "name"))
            .collect();
        let rows = exec.fetch_rows(&dump_select(table, &columns), &[]).await?;
        for row in &rows {
            let literals: Vec<String> = row.values().map(literal_text).collect();
            out.push_str(&export::insert_literals(Dialect::Sqlite, table, &columns, &literals, false));
            out.push('\n');
        }
        debug!(table = %table, rows = rows.len(), "Exported SQLite rows");
    }
    Ok(out)
}
