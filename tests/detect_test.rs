//! Integration tests for engine detection.

use db_adapters::adapters::AdapterOptions;
use db_adapters::detect::{DetectTarget, detect_engine};
use db_adapters::models::EngineKind;
use std::time::Duration;

fn short_timeout() -> AdapterOptions {
    AdapterOptions {
        connect_timeout: Duration::from_secs(2),
        ..AdapterOptions::default()
    }
}

#[tokio::test]
async fn test_unreachable_endpoint_returns_none() {
    // Nothing listens on port 1 locally; both handshakes are refused
    let target = DetectTarget::new("127.0.0.1", Some(1)).with_credentials("nobody", "nothing");
    assert_eq!(detect_engine(&target, &short_timeout()).await, None);
}

#[tokio::test]
async fn test_unresolvable_host_returns_none() {
    let target = DetectTarget::new("no-such-host.invalid", None);
    assert_eq!(detect_engine(&target, &short_timeout()).await, None);
}

/// Set TEST_POSTGRES_HOST (and optionally TEST_POSTGRES_PORT, TEST_POSTGRES_USER,
/// TEST_POSTGRES_PASSWORD) to run this test.
#[tokio::test]
async fn test_detects_postgres() {
    let host = match std::env::var("TEST_POSTGRES_HOST") {
        Ok(host) => host,
        Err(_) => {
            eprintln!("Skipping test: TEST_POSTGRES_HOST not set");
            return;
        }
    };
    let port = std::env::var("TEST_POSTGRES_PORT").ok().and_then(|p| p.parse().ok());
    let target = DetectTarget::new(host, port).with_credentials(
        std::env::var("TEST_POSTGRES_USER").unwrap_or_else(|_| "postgres".to_string()),
        std::env::var("TEST_POSTGRES_PASSWORD").unwrap_or_default(),
    );
    assert_eq!(detect_engine(&target, &short_timeout()).await, Some(EngineKind::Postgres));
}

/// Set TEST_MYSQL_HOST (and optionally TEST_MYSQL_PORT, TEST_MYSQL_USER,
/// TEST_MYSQL_PASSWORD, TEST_MYSQL_EXPECT=mariadb) to run this test.
#[tokio::test]
async fn test_detects_mysql_family() {
    let host = match std::env::var("TEST_MYSQL_HOST") {
        Ok(host) => host,
        Err(_) => {
            eprintln!("Skipping test: TEST_MYSQL_HOST not set");
            return;
        }
    };
    let port = std::env::var("TEST_MYSQL_PORT").ok().and_then(|p| p.parse().ok());
    let target = DetectTarget::new(host, port).with_credentials(
        std::env::var("TEST_MYSQL_USER").unwrap_or_else(|_| "root".to_string()),
        std::env::var("TEST_MYSQL_PASSWORD").unwrap_or_default(),
    );
    let expected = match std::env::var("TEST_MYSQL_EXPECT").as_deref() {
        Ok("mariadb") => EngineKind::MariaDb,
        _ => EngineKind::MySql,
    };
    assert_eq!(detect_engine(&target, &short_timeout()).await, Some(expected));
}
