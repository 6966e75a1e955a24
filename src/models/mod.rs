//! Data models shared by every adapter.

pub mod connection;
pub mod query;
pub mod schema;

// Re-export commonly used types
pub use connection::{ConnectionDescriptor, EngineKind, SqliteParams, SshConfig};
pub use query::{FieldInfo, QueryParam, QueryResult, Row, SqlValue};
pub use schema::{ColumnConstraint, ColumnDefinition, ColumnInfo};
