//! Connection-related data models.
//!
//! A [`ConnectionDescriptor`] is an immutable value describing how to reach one
//! engine. Adapters borrow it at construction time and never mutate it.

use crate::error::{AdapterError, AdapterResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_SSH_PORT: u16 = 22;

/// Supported engine kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Postgres,
    MySql,
    MariaDb,
    Sqlite,
}

impl EngineKind {
    /// Get the display name for this engine.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Postgres => "PostgreSQL",
            Self::MySql => "MySQL",
            Self::MariaDb => "MariaDB",
            Self::Sqlite => "SQLite",
        }
    }

    /// Get the default port for this engine.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Self::Postgres => Some(5432),
            Self::MySql | Self::MariaDb => Some(3306),
            Self::Sqlite => None,
        }
    }

    /// True for engines spoken to over the MySQL wire protocol.
    pub fn is_mysql_family(&self) -> bool {
        matches!(self, Self::MySql | Self::MariaDb)
    }
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

impl FromStr for EngineKind {
    type Err = AdapterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Self::Postgres),
            "mysql" => Ok(Self::MySql),
            "mariadb" => Ok(Self::MariaDb),
            "sqlite" | "sqlite3" => Ok(Self::Sqlite),
            other => Err(AdapterError::unsupported_engine(other)),
        }
    }
}

/// SSH reachability for a remote SQLite file.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SshConfig {
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub username: String,
    /// Contains sensitive data - never log
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    #[serde(default)]
    pub private_key_path: Option<PathBuf>,
}

fn default_ssh_port() -> u16 {
    DEFAULT_SSH_PORT
}

impl SshConfig {
    pub fn new(host: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_SSH_PORT,
            username: username.into(),
            password: None,
            private_key_path: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_private_key(mut self, path: impl Into<PathBuf>) -> Self {
        self.private_key_path = Some(path.into());
        self
    }

    /// `user@host` as passed to ssh.
    pub fn destination(&self) -> String {
        format!("{}@{}", self.username, self.host)
    }
}

impl std::fmt::Debug for SshConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("private_key_path", &self.private_key_path)
            .finish()
    }
}

/// SQLite-specific reachability.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SqliteParams {
    pub file_path: String,
    #[serde(default)]
    pub use_ssh: bool,
    #[serde(default)]
    pub ssh: Option<SshConfig>,
}

/// Identifies an engine and how to reach it.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    pub name: String,
    pub engine: EngineKind,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub username: String,
    /// Contains sensitive data - never log
    #[serde(default, skip_serializing)]
    pub password: String,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub sqlite: Option<SqliteParams>,
}

impl ConnectionDescriptor {
    /// Descriptor for a network engine (PostgreSQL, MySQL, MariaDB).
    pub fn server(
        name: impl Into<String>,
        engine: EngineKind,
        host: impl Into<String>,
        port: Option<u16>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            engine,
            host: host.into(),
            port,
            username: username.into(),
            password: password.into(),
            database: None,
            sqlite: None,
        }
    }

    /// Descriptor for a SQLite file on the local filesystem.
    pub fn sqlite_local(name: impl Into<String>, file_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            engine: EngineKind::Sqlite,
            host: String::new(),
            port: None,
            username: String::new(),
            password: String::new(),
            database: None,
            sqlite: Some(SqliteParams {
                file_path: file_path.into(),
                use_ssh: false,
                ssh: None,
            }),
        }
    }

    /// Descriptor for a SQLite file reached through `ssh` + the remote `sqlite3` CLI.
    pub fn sqlite_ssh(name: impl Into<String>, file_path: impl Into<String>, ssh: SshConfig) -> Self {
        let mut descriptor = Self::sqlite_local(name, file_path);
        if let Some(params) = descriptor.sqlite.as_mut() {
            params.use_ssh = true;
            params.ssh = Some(ssh);
        }
        descriptor
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Port to connect to, falling back to the engine's default.
    pub fn effective_port(&self) -> Option<u16> {
        self.port.or_else(|| self.engine.default_port())
    }

    /// Check the structural invariants between `engine`, `sqlite` and `ssh`.
    pub fn validate(&self) -> AdapterResult<()> {
        match (self.engine, &self.sqlite) {
            (EngineKind::Sqlite, None) => {
                return Err(AdapterError::invalid_input(format!(
                    "Connection '{}' is SQLite but has no SQLite parameters",
                    self.name
                )));
            }
            (EngineKind::Sqlite, Some(params)) => {
                if params.file_path.trim().is_empty() {
                    return Err(AdapterError::invalid_input(format!(
                        "Connection '{}' requires a SQLite file path",
                        self.name
                    )));
                }
                if params.use_ssh != params.ssh.is_some() {
                    return Err(AdapterError::invalid_input(format!(
                        "Connection '{}': SSH settings must be present exactly when SSH is enabled",
                        self.name
                    )));
                }
            }
            (engine, Some(_)) => {
                return Err(AdapterError::invalid_input(format!(
                    "Connection '{}' is {} but carries SQLite parameters",
                    self.name, engine
                )));
            }
            (_, None) => {
                if self.host.trim().is_empty() {
                    return Err(AdapterError::invalid_input(format!(
                        "Connection '{}' requires a host",
                        self.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// True when this descriptor targets a remote SQLite file over SSH.
    pub fn uses_ssh(&self) -> bool {
        self.sqlite.as_ref().is_some_and(|p| p.use_ssh)
    }
}

impl std::fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("name", &self.name)
            .field("engine", &self.engine)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"***")
            .field("database", &self.database)
            .field("sqlite", &self.sqlite)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_kind_from_str() {
        assert_eq!("postgresql".parse::<EngineKind>().unwrap(), EngineKind::Postgres);
        assert_eq!("MariaDB".parse::<EngineKind>().unwrap(), EngineKind::MariaDb);
        assert!(matches!(
            "oracle".parse::<EngineKind>(),
            Err(AdapterError::UnsupportedEngine { .. })
        ));
    }

    #[test]
    fn test_default_ports() {
        assert_eq!(EngineKind::Postgres.default_port(), Some(5432));
        assert_eq!(EngineKind::MariaDb.default_port(), Some(3306));
        assert_eq!(EngineKind::Sqlite.default_port(), None);
    }

    #[test]
    fn test_sqlite_requires_params() {
        let mut d = ConnectionDescriptor::sqlite_local("local", "/tmp/x.db");
        assert!(d.validate().is_ok());
        d.sqlite = None;
        assert!(d.validate().is_err());
    }

    #[test]
    fn test_ssh_flag_must_match_config() {
        let mut d = ConnectionDescriptor::sqlite_ssh("r", "/srv/app.db", SshConfig::new("h", "u"));
        assert!(d.validate().is_ok());
        assert!(d.uses_ssh());
        if let Some(p) = d.sqlite.as_mut() {
            p.ssh = None;
        }
        assert!(d.validate().is_err());
    }

    #[test]
    fn test_server_engine_rejects_sqlite_params() {
        let mut d =
            ConnectionDescriptor::server("pg", EngineKind::Postgres, "localhost", None, "u", "p");
        assert!(d.validate().is_ok());
        assert_eq!(d.effective_port(), Some(5432));
        d.sqlite = Some(SqliteParams {
            file_path: "x.db".into(),
            use_ssh: false,
            ssh: None,
        });
        assert!(d.validate().is_err());
    }

    #[test]
    fn test_debug_masks_password() {
        let d = ConnectionDescriptor::server(
            "pg",
            EngineKind::Postgres,
            "localhost",
            None,
            "u",
            "hunter2",
        );
        let ssh = SshConfig::new("h", "u").with_password("s3cret");
        let rendered = format!("{d:?} {ssh:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("s3cret"));
    }
}
