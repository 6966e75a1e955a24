//! The adapter contract and the factory that picks an implementation.
//!
//! Every engine implements [`DatabaseAdapter`]. Callers normally hold an
//! [`Adapter`], built once by [`create_adapter`], which forwards each call to
//! the variant that speaks the engine's protocol.

mod mysql;
mod postgres;
mod remote;
mod sqlite;

pub use mysql::MySqlAdapter;
pub use postgres::PostgresAdapter;
pub use remote::SqliteRemoteAdapter;
pub use sqlite::SqliteAdapter;

use crate::db::export;
use crate::error::{AdapterError, AdapterResult};
use crate::impl_adapter_dispatch;
use crate::models::{
    ColumnDefinition, ColumnInfo, ConnectionDescriptor, EngineKind, QueryParam, QueryResult,
};
use std::time::Duration;
use tracing::debug;

/// Default time allowed for opening a session.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default remote `sqlite3` executable.
pub const DEFAULT_SQLITE_BIN: &str = "sqlite3";

/// Knobs shared by every adapter.
#[derive(Debug, Clone)]
pub struct AdapterOptions {
    pub connect_timeout: Duration,
    /// `sqlite3` executable on the remote host.
    pub sqlite_bin: String,
}

impl Default for AdapterOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            sqlite_bin: DEFAULT_SQLITE_BIN.to_string(),
        }
    }
}

/// Operations every engine supports with the same external meaning.
///
/// `database` arguments name a catalog on PostgreSQL and MySQL/MariaDB (the
/// adapter reconnects when it changes) and are ignored by SQLite, whose only
/// catalog is `main`. Placeholders are written as `?` on every engine.
#[allow(async_fn_in_trait)]
pub trait DatabaseAdapter {
    fn engine(&self) -> EngineKind;

    /// Open or reuse the session and run `SELECT 1`.
    async fn test_connection(&mut self) -> AdapterResult<()>;

    /// Visible catalogs, system catalogs excluded.
    async fn get_databases(&mut self) -> AdapterResult<Vec<String>>;

    /// Table names in alphabetical order.
    async fn get_tables(&mut self, database: &str) -> AdapterResult<Vec<String>>;

    async fn create_table(
        &mut self,
        database: &str,
        table: &str,
        columns: &[ColumnDefinition],
    ) -> AdapterResult<()>;

    async fn delete_table(&mut self, database: &str, table: &str) -> AdapterResult<()>;

    async fn rename_table(&mut self, database: &str, old_name: &str, new_name: &str) -> AdapterResult<()>;

    /// Add a column. `default_value` is a user value: keywords and numbers
    /// are emitted as-is, anything else as a string literal.
    async fn add_column(
        &mut self,
        database: &str,
        table: &str,
        column: &ColumnDefinition,
        default_value: Option<&str>,
    ) -> AdapterResult<()>;

    async fn remove_column(&mut self, database: &str, table: &str, column: &str) -> AdapterResult<()>;

    /// Replace `old_name` with `column` (new name, type and constraints).
    async fn modify_column(
        &mut self,
        database: &str,
        table: &str,
        old_name: &str,
        column: &ColumnDefinition,
        default_value: Option<&str>,
    ) -> AdapterResult<()>;

    async fn get_columns(&mut self, database: &str, table: &str) -> AdapterResult<Vec<ColumnInfo>>;

    /// Primary-key columns in key-ordinal order.
    async fn get_primary_keys(&mut self, database: &str, table: &str) -> AdapterResult<Vec<String>>;

    /// Columns carrying a single-column unique constraint.
    async fn get_unique_keys(&mut self, database: &str, table: &str) -> AdapterResult<Vec<String>>;

    /// Parameterized passthrough: rows for reads, affected rows for writes.
    async fn query(&mut self, database: &str, sql: &str, params: &[QueryParam]) -> AdapterResult<QueryResult>;

    /// Run ad-hoc SQL. Reads carry field metadata from the live catalog.
    async fn execute_query(&mut self, sql: &str, database: Option<&str>) -> AdapterResult<QueryResult>;

    /// `DROP TABLE IF EXISTS`, the native `CREATE TABLE` and optionally one
    /// `INSERT` per row.
    async fn export_table(&mut self, database: &str, table: &str, include_data: bool) -> AdapterResult<String>;

    /// Every table of `database` in [`get_tables`](Self::get_tables) order.
    async fn export_database(&mut self, database: &str, include_data: bool) -> AdapterResult<String> {
        let tables = self.get_tables(database).await?;
        let mut out = export::database_header(self.engine().display_name(), database);
        for table in &tables {
            out.push_str(&self.export_table(database, table, include_data).await?);
            out.push('\n');
        }
        debug!(database = %database, tables = tables.len(), "Exported database");
        Ok(out)
    }

    /// Release the session. Never fails; a no-op when nothing is open.
    async fn close(&mut self);
}

/// One adapter of any engine.
pub enum Adapter {
    Postgres(PostgresAdapter),
    /// MySQL and MariaDB.
    MySql(MySqlAdapter),
    Sqlite(SqliteAdapter),
    SqliteRemote(SqliteRemoteAdapter),
}

impl std::fmt::Debug for Adapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let variant = match self {
            Adapter::Postgres(_) => "Postgres",
            Adapter::MySql(_) => "MySql",
            Adapter::Sqlite(_) => "Sqlite",
            Adapter::SqliteRemote(_) => "SqliteRemote",
        };
        f.debug_tuple("Adapter").field(&variant).finish()
    }
}

impl DatabaseAdapter for Adapter {
    fn engine(&self) -> EngineKind {
        impl_adapter_dispatch!(self, a => a.engine())
    }

    async fn test_connection(&mut self) -> AdapterResult<()> {
        impl_adapter_dispatch!(self, a => a.test_connection().await)
    }

    async fn get_databases(&mut self) -> AdapterResult<Vec<String>> {
        impl_adapter_dispatch!(self, a => a.get_databases().await)
    }

    async fn get_tables(&mut self, database: &str) -> AdapterResult<Vec<String>> {
        impl_adapter_dispatch!(self, a => a.get_tables(database).await)
    }

    async fn create_table(
        &mut self,
        database: &str,
        table: &str,
        columns: &[ColumnDefinition],
    ) -> AdapterResult<()> {
        impl_adapter_dispatch!(self, a => a.create_table(database, table, columns).await)
    }

    async fn delete_table(&mut self, database: &str, table: &str) -> AdapterResult<()> {
        impl_adapter_dispatch!(self, a => a.delete_table(database, table).await)
    }

    async fn rename_table(&mut self, database: &str, old_name: &str, new_name: &str) -> AdapterResult<()> {
        impl_adapter_dispatch!(self, a => a.rename_table(database, old_name, new_name).await)
    }

    async fn add_column(
        &mut self,
        database: &str,
        table: &str,
        column: &ColumnDefinition,
        default_value: Option<&str>,
    ) -> AdapterResult<()> {
        impl_adapter_dispatch!(self, a => a.add_column(database, table, column, default_value).await)
    }

    async fn remove_column(&mut self, database: &str, table: &str, column: &str) -> AdapterResult<()> {
        impl_adapter_dispatch!(self, a => a.remove_column(database, table, column).await)
    }

    async fn modify_column(
        &mut self,
        database: &str,
        table: &str,
        old_name: &str,
        column: &ColumnDefinition,
        default_value: Option<&str>,
    ) -> AdapterResult<()> {
        impl_adapter_dispatch!(self, a => a.modify_column(database, table, old_name, column, default_value).await)
    }

    async fn get_columns(&mut self, database: &str, table: &str) -> AdapterResult<Vec<ColumnInfo>> {
        impl_adapter_dispatch!(self, a => a.get_columns(database, table).await)
    }

    async fn get_primary_keys(&mut self, database: &str, table: &str) -> AdapterResult<Vec<String>> {
        impl_adapter_dispatch!(self, a => a.get_primary_keys(database, table).await)
    }

    async fn get_unique_keys(&mut self, database: &str, table: &str) -> AdapterResult<Vec<String>> {
        impl_adapter_dispatch!(self, a => a.get_unique_keys(database, table).await)
    }

    async fn query(&mut self, database: &str, sql: &str, params: &[QueryParam]) -> AdapterResult<QueryResult> {
        impl_adapter_dispatch!(self, a => a.query(database, sql, params).await)
    }

    async fn execute_query(&mut self, sql: &str, database: Option<&str>) -> AdapterResult<QueryResult> {
        impl_adapter_dispatch!(self, a => a.execute_query(sql, database).await)
    }

    async fn export_table(&mut self, database: &str, table: &str, include_data: bool) -> AdapterResult<String> {
        impl_adapter_dispatch!(self, a => a.export_table(database, table, include_data).await)
    }

    async fn export_database(&mut self, database: &str, include_data: bool) -> AdapterResult<String> {
        impl_adapter_dispatch!(self, a => a.export_database(database, include_data).await)
    }

    async fn close(&mut self) {
        impl_adapter_dispatch!(self, a => a.close().await)
    }
}

/// Build the adapter for `descriptor` with default options.
pub fn create_adapter(descriptor: &ConnectionDescriptor) -> AdapterResult<Adapter> {
    create_adapter_with(descriptor, AdapterOptions::default())
}

/// Build the adapter for `descriptor`.
///
/// Construction never touches the network; the first operation opens the
/// session. Every call returns a fresh adapter.
pub fn create_adapter_with(descriptor: &ConnectionDescriptor, options: AdapterOptions) -> AdapterResult<Adapter> {
    descriptor.validate()?;
    debug!(name = %descriptor.name, engine = %descriptor.engine, "Creating adapter");

    let adapter = match descriptor.engine {
        EngineKind::Postgres => Adapter::Postgres(PostgresAdapter::new(descriptor.clone(), options)),
        EngineKind::MySql | EngineKind::MariaDb => {
            Adapter::MySql(MySqlAdapter::new(descriptor.clone(), options))
        }
        EngineKind::Sqlite => {
            let params = descriptor.sqlite.as_ref().ok_or_else(|| {
                AdapterError::invalid_input(format!(
                    "Connection '{}' is SQLite but has no SQLite parameters",
                    descriptor.name
                ))
            })?;
            match (&params.ssh, params.use_ssh) {
                (Some(ssh), true) => Adapter::SqliteRemote(SqliteRemoteAdapter::new(
                    &params.file_path,
                    ssh.clone(),
                    options,
                )),
                _ => Adapter::Sqlite(SqliteAdapter::new(&params.file_path)),
            }
        }
    };
    Ok(adapter)
}

/// Build an adapter from an engine name such as `"postgres"` or `"mariadb"`,
/// overriding the descriptor's kind.
pub fn create_adapter_for(engine: &str, descriptor: &ConnectionDescriptor) -> AdapterResult<Adapter> {
    let engine: EngineKind = engine.parse()?;
    let mut descriptor = descriptor.clone();
    descriptor.engine = engine;
    create_adapter(&descriptor)
}
