//! DB Adapters Library
//!
//! One data-access contract over PostgreSQL, MySQL/MariaDB, local SQLite
//! files and SQLite files reached over SSH through the remote `sqlite3` CLI.
//! Callers build an [`Adapter`] from a [`ConnectionDescriptor`] and use the
//! same operations whatever the engine.

pub mod adapters;
pub mod config;
pub mod db;
pub mod detect;
pub mod error;
pub mod models;
pub mod ssh;

pub use adapters::{
    Adapter, AdapterOptions, DatabaseAdapter, create_adapter, create_adapter_for, create_adapter_with,
};
pub use config::Config;
pub use detect::{DetectTarget, detect_engine};
pub use error::{AdapterError, AdapterResult};
pub use models::{ColumnDefinition, ColumnInfo, ConnectionDescriptor, EngineKind, QueryParam, QueryResult};
