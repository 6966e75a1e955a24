//! Engine detection for a bare host and port.
//!
//! The detector tries the PostgreSQL handshake first, then the MySQL one.
//! A MySQL-protocol server whose `VERSION()` mentions MariaDB is reported as
//! MariaDB. Per-attempt failures are logged at debug level and dropped.

use crate::adapters::{AdapterOptions, DatabaseAdapter, MySqlAdapter, PostgresAdapter};
use crate::models::{ConnectionDescriptor, EngineKind};
use tracing::{debug, info};

/// Where to look and with which credentials.
#[derive(Debug, Clone)]
pub struct DetectTarget {
    pub host: String,
    /// `None` tries each engine on its default port.
    pub port: Option<u16>,
    pub username: String,
    pub password: String,
}

impl DetectTarget {
    pub fn new(host: impl Into<String>, port: Option<u16>) -> Self {
        Self {
            host: host.into(),
            port,
            username: String::new(),
            password: String::new(),
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    fn descriptor(&self, engine: EngineKind) -> ConnectionDescriptor {
        ConnectionDescriptor::server(
            format!("detect-{}", engine.display_name().to_ascii_lowercase()),
            engine,
            self.host.clone(),
            self.port,
            self.username.clone(),
            self.password.clone(),
        )
    }
}

/// Classify a MySQL-protocol server from its version string.
pub fn classify_version(version: &str) -> EngineKind {
    if version.to_ascii_lowercase().contains("mariadb") {
        EngineKind::MariaDb
    } else {
        EngineKind::MySql
    }
}

/// Identify the engine listening at `target`, or `None` when neither
/// protocol answers.
pub async fn detect_engine(target: &DetectTarget, options: &AdapterOptions) -> Option<EngineKind> {
    let mut postgres = PostgresAdapter::new(target.descriptor(EngineKind::Postgres), options.clone());
    let attempt = postgres.test_connection().await;
    postgres.close().await;
    match attempt {
        Ok(()) => {
            info!(host = %target.host, "Detected PostgreSQL");
            return Some(EngineKind::Postgres);
        }
        Err(e) => debug!(host = %target.host, error = %e, "Not PostgreSQL"),
    }

    let mut mysql = MySqlAdapter::new(target.descriptor(EngineKind::MySql), options.clone());
    let version = mysql.server_version().await;
    mysql.close().await;
    match version {
        Ok(version) => {
            let engine = classify_version(&version);
            info!(host = %target.host, version = %version, engine = %engine, "Detected MySQL protocol server");
            Some(engine)
        }
        Err(e) => {
            debug!(host = %target.host, error = %e, "Not MySQL either");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_version() {
        assert_eq!(classify_version("10.11.6-MariaDB-0+deb12u1"), EngineKind::MariaDb);
        assert_eq!(classify_version("5.5.5-10.6.12-mariadb-log"), EngineKind::MariaDb);
        assert_eq!(classify_version("8.0.36"), EngineKind::MySql);
    }

    #[test]
    fn test_descriptor_keeps_credentials() {
        let target = DetectTarget::new("db.local", Some(6543)).with_credentials("app", "pw");
        let d = target.descriptor(EngineKind::Postgres);
        assert_eq!(d.engine, EngineKind::Postgres);
        assert_eq!(d.port, Some(6543));
        assert_eq!(d.username, "app");
        assert_eq!(d.password, "pw");
    }
}
