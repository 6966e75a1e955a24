//! Integration tests for SQLite over SSH.
//!
//! The end-to-end test needs a reachable host with `sqlite3` installed.
//! Set TEST_SSH_SQLITE_URL to run it.
//! Example: TEST_SSH_SQLITE_URL="sqlite+ssh://deploy@localhost/tmp/dba_remote.db?identity=/home/me/.ssh/id_ed25519"

use db_adapters::adapters::{AdapterOptions, DatabaseAdapter, SqliteRemoteAdapter, create_adapter};
use db_adapters::config::parse_connection;
use db_adapters::db::Dialect;
use db_adapters::db::literal::interpolate_params;
use db_adapters::error::AdapterError;
use db_adapters::models::{ColumnDefinition, QueryParam, SqlValue, SshConfig};
use db_adapters::ssh::{OutputMode, SshSession, sqlite_command};
use std::time::Duration;

#[test]
fn test_interpolation_escapes_quotes() {
    let sql = interpolate_params(
        Dialect::Sqlite,
        "INSERT INTO books (publisher, copies, in_print) VALUES (?, ?, ?)",
        &[QueryParam::from("O'Reilly"), QueryParam::Int(3), QueryParam::Bool(true)],
    )
    .unwrap();
    assert_eq!(
        sql,
        "INSERT INTO books (publisher, copies, in_print) VALUES ('O''Reilly', 3, 1)"
    );
}

#[test]
fn test_interpolation_leaves_literals_alone() {
    let sql = interpolate_params(
        Dialect::Sqlite,
        "SELECT '?' AS q, name FROM t WHERE id = ?",
        &[QueryParam::Int(7)],
    )
    .unwrap();
    assert_eq!(sql, "SELECT '?' AS q, name FROM t WHERE id = 7");

    let err = interpolate_params(Dialect::Sqlite, "SELECT ?", &[]).unwrap_err();
    assert!(matches!(err, AdapterError::InvalidInput { .. }));
}

#[test]
fn test_remote_command_line() {
    let session = SshSession::new(
        SshConfig::new("web1", "deploy").with_port(2222),
        Duration::from_secs(5),
    );
    let remote = sqlite_command("sqlite3", "/srv/my app.db", OutputMode::Json);
    assert_eq!(remote, "'sqlite3' -bail -json '/srv/my app.db'");

    let spec = session.command(&remote);
    assert_eq!(spec.program, "ssh");
    assert!(spec.args.windows(2).any(|w| w == ["-p", "2222"]));
    assert!(spec.args.contains(&"BatchMode=yes".to_string()));
    assert!(spec.args.contains(&"deploy@web1".to_string()));
    assert_eq!(spec.args.last(), Some(&remote));
    assert!(spec.env.is_empty());
}

#[test]
fn test_password_goes_through_environment() {
    let session = SshSession::new(
        SshConfig::new("web1", "deploy").with_password("hunter2"),
        Duration::from_secs(5),
    );
    let spec = session.command("true");
    assert_eq!(spec.program, "sshpass");
    assert_eq!(spec.args[..2], ["-e".to_string(), "ssh".to_string()]);
    assert!(spec.args.iter().all(|a| !a.contains("hunter2")));
    assert_eq!(spec.env, vec![("SSHPASS".to_string(), "hunter2".to_string())]);
}

#[tokio::test]
async fn test_unreachable_host_is_connection_error() {
    let options = AdapterOptions {
        connect_timeout: Duration::from_secs(2),
        ..AdapterOptions::default()
    };
    let ssh = SshConfig::new("127.0.0.1", "nobody").with_port(1);
    let mut adapter = SqliteRemoteAdapter::new("/tmp/none.db", ssh, options);

    let err = adapter.test_connection().await.unwrap_err();
    assert!(matches!(err, AdapterError::Connection { .. }), "got {err:?}");
    adapter.close().await;
}

#[tokio::test]
async fn test_remote_round_trip() {
    let url = match std::env::var("TEST_SSH_SQLITE_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("Skipping test: TEST_SSH_SQLITE_URL not set");
            return;
        }
    };
    let descriptor = parse_connection(&url).unwrap();
    let mut adapter = create_adapter(&descriptor).unwrap();
    adapter.test_connection().await.unwrap();

    let _ = adapter.delete_table("main", "remote_books").await;
    adapter
        .create_table(
            "main",
            "remote_books",
            &[
                ColumnDefinition::new("id", "INTEGER").primary_key().auto_increment(),
                ColumnDefinition::new("publisher", "TEXT").not_null(),
            ],
        )
        .await
        .unwrap();

    let inserted = adapter
        .query(
            "main",
            "INSERT INTO remote_books (publisher) VALUES (?)",
            &[QueryParam::from("O'Reilly")],
        )
        .await
        .unwrap();
    assert_eq!(inserted.affected_rows, Some(1));

    let rows = adapter
        .query("main", "SELECT id, publisher FROM remote_books", &[])
        .await
        .unwrap();
    assert_eq!(rows.rows.len(), 1);
    assert_eq!(rows.rows[0].get("publisher"), Some(&SqlValue::Text("O'Reilly".into())));

    adapter
        .modify_column(
            "main",
            "remote_books",
            "publisher",
            &ColumnDefinition::new("imprint", "TEXT").not_null(),
            None,
        )
        .await
        .unwrap();
    let columns = adapter.get_columns("main", "remote_books").await.unwrap();
    assert_eq!(columns[1].name, "imprint");
    assert_eq!(adapter.get_primary_keys("main", "remote_books").await.unwrap(), vec!["id"]);

    let dump = adapter.export_table("main", "remote_books", true).await.unwrap();
    assert!(dump.contains("'O''Reilly'"));

    adapter.delete_table("main", "remote_books").await.unwrap();
    adapter.close().await;
}
