//! SQLite adapter for a file on another host, driven through the remote
//! `sqlite3` command-line shell.
//!
//! Each operation is one `sqlite3 -bail` invocation over a shared SSH control
//! connection, with the SQL script on stdin. Parameters are interpolated as
//! escaped literals because the shell has no bind protocol.

use super::sqlite::{
    SqliteExec, ensure_drop_column, export_table, list_tables, load_snapshot, needs_rebuild_to_add,
    result_fields,
};
use super::{AdapterOptions, DatabaseAdapter};
use crate::db::ddl::{self, ColumnSpec, TableSpec};
use crate::db::literal::interpolate_params;
use crate::db::rebuild::{ColumnChange, plan_rebuild};
use crate::db::{Dialect, StatementKind};
use crate::error::{AdapterError, AdapterResult};
use crate::models::{
    ColumnDefinition, ColumnInfo, EngineKind, QueryParam, QueryResult, Row, SqlValue, SshConfig,
};
use crate::ssh::{OutputMode, SshSession, parse_json_output, parse_list_output, sqlite_command};
use tracing::{debug, info, warn};

/// Statement appended to writes so the shell reports what changed.
const AFFECTED_ROWS: &str = "SELECT changes() AS affected_rows;";

/// SQLite file reached through `ssh` and `sqlite3`.
pub struct SqliteRemoteAdapter {
    file_path: String,
    sqlite_bin: String,
    ssh: SshSession,
    mode: OutputMode,
}

impl SqliteRemoteAdapter {
    pub fn new(file_path: &str, ssh: SshConfig, options: AdapterOptions) -> Self {
        Self {
            file_path: file_path.to_string(),
            sqlite_bin: options.sqlite_bin,
            ssh: SshSession::new(ssh, options.connect_timeout),
            mode: OutputMode::Json,
        }
    }

    pub fn file_path(&self) -> &str {
        &self.file_path
    }

    /// Run a script and return every result set it printed.
    ///
    /// Shells older than 3.33 reject `-json`; the first such failure switches
    /// this adapter to list output for the rest of its life.
    async fn run_script(&mut self, script: &str) -> AdapterResult<Vec<Vec<Row>>> {
        let command = sqlite_command(&self.sqlite_bin, &self.file_path, self.mode);
        match self.ssh.run(&command, script).await {
            Ok(out) => self.parse(&out.stdout),
            Err(AdapterError::RemoteExec { stderr, .. })
                if self.mode == OutputMode::Json && rejects_json_flag(&stderr) =>
            {
                warn!(host = %self.ssh.config().host, "Remote sqlite3 has no -json; using list output");
                self.mode = OutputMode::List;
                let command = sqlite_command(&self.sqlite_bin, &self.file_path, self.mode);
                let out = self.ssh.run(&command, script).await?;
                self.parse(&out.stdout)
            }
            Err(e) => Err(e),
        }
    }

    fn parse(&self, stdout: &str) -> AdapterResult<Vec<Vec<Row>>> {
        match self.mode {
            OutputMode::Json => parse_json_output(stdout),
            OutputMode::List => Ok(parse_list_output(stdout)),
        }
    }

    /// Run a write and report the rows it changed.
    async fn execute(&mut self, sql: &str) -> AdapterResult<u64> {
        let script = format!("{}\n{}\n", terminated(sql), AFFECTED_ROWS);
        let sets = self.run_script(&script).await?;
        Ok(affected_rows(&sets))
    }

    async fn execute_statements(&mut self, statements: &[String]) -> AdapterResult<()> {
        let script = statements
            .iter()
            .map(|s| terminated(s))
            .collect::<Vec<_>>()
            .join("\n");
        debug!(path = %self.file_path, statements = statements.len(), "Executing remote DDL");
        self.run_script(&script).await?;
        Ok(())
    }

    /// Rebuild `table` in one shell invocation. `-bail` stops at the first
    /// error and the open transaction dies with the process.
    async fn rebuild(&mut self, table: &str, change: ColumnChange) -> AdapterResult<()> {
        let snapshot = load_snapshot(self, table).await?;
        let plan = plan_rebuild(&snapshot, change, chrono::Utc::now().timestamp_millis())?;
        match self.run_script(&plan.script()).await {
            Ok(_) => {
                info!(table = %table, path = %self.file_path, "Rebuilt remote SQLite table");
                Ok(())
            }
            Err(AdapterError::RemoteExec { message, .. }) => {
                warn!(table = %table, error = %message, "Remote table rebuild failed");
                Err(AdapterError::migration(table, message, true))
            }
            Err(e) => Err(e),
        }
    }
}

/// True when `stderr` is the shell refusing the `-json` option.
fn rejects_json_flag(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    lower.contains("unknown option") && lower.contains("json")
}

/// `sql` with exactly one trailing `;`.
fn terminated(sql: &str) -> String {
    format!("{};", sql.trim_end().trim_end_matches(';').trim_end())
}

fn affected_rows(sets: &[Vec<Row>]) -> u64 {
    sets.last()
        .and_then(|set| set.first())
        .and_then(|row| row.get("affected_rows"))
        .and_then(SqlValue::as_i64)
        .map_or(0, |n| n.max(0) as u64)
}

/// Type names for a remote result, taken from the first row's values.
fn value_types(row: &Row) -> Vec<(String, String)> {
    row.iter()
        .map(|(name, value)| {
            let ty = match value {
                SqlValue::Null => "NULL",
                SqlValue::Int(_) | SqlValue::Bool(_) => "INTEGER",
                SqlValue::Float(_) => "REAL",
                SqlValue::Bytes(_) => "BLOB",
                _ => "TEXT",
            };
            (name.to_string(), ty.to_string())
        })
        .collect()
}

impl SqliteExec for SqliteRemoteAdapter {
    async fn fetch_rows(&mut self, sql: &str, params: &[QueryParam]) -> AdapterResult<Vec<Row>> {
        let sql = interpolate_params(Dialect::Sqlite, sql, params)?;
        let mut sets = self.run_script(&terminated(&sql)).await?;
        Ok(sets.pop().unwrap_or_default())
    }
}

impl DatabaseAdapter for SqliteRemoteAdapter {
    fn engine(&self) -> EngineKind {
        EngineKind::Sqlite
    }

    async fn test_connection(&mut self) -> AdapterResult<()> {
        match self.run_script("SELECT 1;").await {
            Ok(_) => Ok(()),
            // 255 is ssh itself; no exit code means ssh never ran.
            Err(AdapterError::RemoteExec { message, exit_code, .. })
                if exit_code.is_none() || exit_code == Some(255) =>
            {
                Err(AdapterError::connection(
                    format!("SSH to {} failed: {}", self.ssh.config().destination(), message),
                    "Check the SSH host, port, credentials and that ssh is installed locally",
                ))
            }
            Err(e) => Err(e),
        }
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
            return Ok(QueryResult::from_rows(self.fetch_rows(sql, params).await?));
        }
        let sql = interpolate_params(Dialect::Sqlite, sql, params)?;
        Ok(QueryResult::from_affected(self.execute(&sql).await?))
    }

    async fn execute_query(&mut self, sql: &str, _database: Option<&str>) -> AdapterResult<QueryResult> {
        if !StatementKind::classify(sql).is_read() {
            return Ok(QueryResult::from_affected(self.execute(sql).await?));
        }
        let mut sets = self.run_script(&terminated(sql)).await?;
        let rows = sets.pop().unwrap_or_default();
        let fields = match rows.first() {
            Some(row) => {
                let types = value_types(row);
                result_fields(self, sql, &types).await
            }
            None => Vec::new(),
        };
        Ok(QueryResult::from_rows(rows).with_fields(fields))
    }

    async fn export_table(&mut self, _database: &str, table: &str, include_data: bool) -> AdapterResult<String> {
        export_table(self, table, include_data).await
    }

    async fn close(&mut self) {
        self.ssh.close().await;
    }
}
