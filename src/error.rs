//! Error types for the adapter layer.
//!
//! Every adapter operation returns [`AdapterResult`]. Driver errors keep the
//! engine's own message text so callers see exactly what the server said.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Unsupported engine: {engine}")]
    UnsupportedEngine { engine: String },

    #[error("Query failed: {message}")]
    Query {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
    },

    #[error("Migration of '{table}' failed: {message}")]
    Migration {
        table: String,
        message: String,
        /// False when the ROLLBACK itself also failed.
        rolled_back: bool,
    },

    #[error("Remote command failed (exit code {exit_code:?}): {message}")]
    RemoteExec {
        message: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl AdapterError {
    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    pub fn unsupported_engine(engine: impl Into<String>) -> Self {
        Self::UnsupportedEngine {
            engine: engine.into(),
        }
    }

    /// Create a query error with optional SQL state.
    pub fn query(message: impl Into<String>, sql_state: Option<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql_state,
        }
    }

    pub fn migration(table: impl Into<String>, message: impl Into<String>, rolled_back: bool) -> Self {
        Self::Migration {
            table: table.into(),
            message: message.into(),
            rolled_back,
        }
    }

    pub fn remote_exec(
        message: impl Into<String>,
        exit_code: Option<i32>,
        stderr: impl Into<String>,
    ) -> Self {
        Self::RemoteExec {
            message: message.into(),
            exit_code,
            stderr: stderr.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// The underlying message without the variant prefix.
    pub fn detail(&self) -> String {
        match self {
            Self::Connection { message, .. }
            | Self::Query { message, .. }
            | Self::Migration { message, .. }
            | Self::RemoteExec { message, .. }
            | Self::InvalidInput { message } => message.clone(),
            other => other.to_string(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::RemoteExec { .. } => {
                Some("Check that ssh and sqlite3 are installed and the remote path is readable")
            }
            _ => None,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }
}

/// Convert sqlx errors to AdapterError.
impl From<sqlx::Error> for AdapterError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => AdapterError::connection(
                msg.to_string(),
                "Check the connection parameters and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                AdapterError::query(db_err.message(), code)
            }
            sqlx::Error::RowNotFound => AdapterError::query("No rows returned", None),
            sqlx::Error::PoolTimedOut => AdapterError::connection(
                "Timed out while connecting",
                "Check that the server is reachable or raise the connect timeout",
            ),
            sqlx::Error::PoolClosed => {
                AdapterError::connection("Connection is closed", "Reconnect to the database")
            }
            sqlx::Error::Io(io_err) => AdapterError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => AdapterError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => AdapterError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnNotFound(col) => {
                AdapterError::query(format!("Column not found: {}", col), None)
            }
            sqlx::Error::ColumnDecode { index, source } => {
                AdapterError::query(format!("Failed to decode column {}: {}", index, source), None)
            }
            _ => AdapterError::query(err.to_string(), None),
        }
    }
}

/// Result type alias for adapter operations.
pub type AdapterResult<T> = Result<T, AdapterError>;
