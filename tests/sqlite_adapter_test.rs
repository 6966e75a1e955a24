//! Integration tests for the local SQLite adapter.
//!
//! Every test works on a fresh file under a temp directory and reopens it
//! through a new adapter where persistence matters.

use db_adapters::adapters::{DatabaseAdapter, SqliteAdapter, create_adapter};
use db_adapters::error::AdapterError;
use db_adapters::models::{ColumnDefinition, ConnectionDescriptor, QueryParam, SqlValue};
use std::path::Path;

fn users_columns() -> Vec<ColumnDefinition> {
    vec![
        ColumnDefinition::new("id", "INTEGER").primary_key().auto_increment(),
        ColumnDefinition::new("name", "TEXT").not_null(),
    ]
}

async fn seeded(path: &Path) -> SqliteAdapter {
    let mut adapter = SqliteAdapter::new(path);
    adapter.create_table("main", "users", &users_columns()).await.unwrap();
    for name in ["alice", "bob", "carol"] {
        adapter
            .query("main", "INSERT INTO users (name) VALUES (?)", &[QueryParam::from(name)])
            .await
            .unwrap();
    }
    adapter
}

#[tokio::test]
async fn test_create_table_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let mut adapter = SqliteAdapter::new(dir.path().join("app.db"));

    adapter.create_table("main", "users", &users_columns()).await.unwrap();
    adapter.create_table("main", "users", &users_columns()).await.unwrap();

    let tables = adapter.get_tables("main").await.unwrap();
    assert_eq!(tables.iter().filter(|t| *t == "users").count(), 1);
    assert_eq!(adapter.get_databases().await.unwrap(), vec!["main".to_string()]);
    adapter.close().await;
}

#[tokio::test]
async fn test_tables_sorted_without_internal() {
    let dir = tempfile::tempdir().unwrap();
    let mut adapter = seeded(&dir.path().join("app.db")).await;
    adapter
        .create_table("main", "accounts", &[ColumnDefinition::new("id", "INTEGER").primary_key()])
        .await
        .unwrap();

    // `users` uses AUTOINCREMENT, so sqlite_sequence exists but stays hidden
    let tables = adapter.get_tables("main").await.unwrap();
    assert_eq!(tables, vec!["accounts".to_string(), "users".to_string()]);
    adapter.close().await;
}

#[tokio::test]
async fn test_identity_and_not_null_columns() {
    let dir = tempfile::tempdir().unwrap();
    let mut adapter = SqliteAdapter::new(dir.path().join("app.db"));
    adapter.create_table("main", "users", &users_columns()).await.unwrap();

    let columns = adapter.get_columns("main", "users").await.unwrap();
    assert_eq!(columns.len(), 2);
    assert_eq!(columns[0].name, "id");
    assert_eq!(columns[0].data_type, "INTEGER");
    assert!(!columns[0].nullable);
    assert_eq!(columns[1].name, "name");
    assert!(!columns[1].nullable);

    assert_eq!(adapter.get_primary_keys("main", "users").await.unwrap(), vec!["id"]);
    adapter.close().await;
}

#[tokio::test]
async fn test_primary_keys_in_key_order() {
    let dir = tempfile::tempdir().unwrap();
    let mut adapter = SqliteAdapter::new(dir.path().join("app.db"));
    adapter
        .execute_query(
            "CREATE TABLE memberships (a INTEGER, b INTEGER, note TEXT, PRIMARY KEY (b, a))",
            None,
        )
        .await
        .unwrap();

    let pk = adapter.get_primary_keys("main", "memberships").await.unwrap();
    assert_eq!(pk, vec!["b".to_string(), "a".to_string()]);
    adapter.close().await;
}

#[tokio::test]
async fn test_add_column_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let mut adapter = seeded(&dir.path().join("app.db")).await;

    adapter
        .add_column("main", "users", &ColumnDefinition::new("publisher", "TEXT"), Some("O'Reilly"))
        .await
        .unwrap();
    // Non-constant default goes through a rebuild
    adapter
        .add_column(
            "main",
            "users",
            &ColumnDefinition::new("created_at", "TEXT"),
            Some("CURRENT_TIMESTAMP"),
        )
        .await
        .unwrap();

    let columns = adapter.get_columns("main", "users").await.unwrap();
    let publisher = columns.iter().find(|c| c.name == "publisher").unwrap();
    assert_eq!(publisher.default_expr.as_deref(), Some("'O''Reilly'"));
    let created = columns.iter().find(|c| c.name == "created_at").unwrap();
    assert_eq!(created.default_expr.as_deref(), Some("CURRENT_TIMESTAMP"));

    let result = adapter
        .query("main", "SELECT publisher, created_at FROM users WHERE name = ?", &[QueryParam::from("bob")])
        .await
        .unwrap();
    assert_eq!(result.rows.len(), 1);
    assert_eq!(result.rows[0].get("publisher"), Some(&SqlValue::Text("O'Reilly".into())));
    adapter.close().await;
}

#[tokio::test]
async fn test_add_unique_column_creates_index() {
    let dir = tempfile::tempdir().unwrap();
    let mut adapter = seeded(&dir.path().join("app.db")).await;

    adapter
        .add_column("main", "users", &ColumnDefinition::new("email", "TEXT").unique(), None)
        .await
        .unwrap();

    assert_eq!(adapter.get_unique_keys("main", "users").await.unwrap(), vec!["email"]);
    adapter.close().await;
}

#[tokio::test]
async fn test_modify_column_preserves_rows() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.db");
    let mut adapter = seeded(&path).await;

    adapter
        .modify_column(
            "main",
            "users",
            "name",
            &ColumnDefinition::new("full_name", "VARCHAR(80)").not_null(),
            None,
        )
        .await
        .unwrap();
    adapter.close().await;

    let mut reopened = SqliteAdapter::new(&path);
    let columns = reopened.get_columns("main", "users").await.unwrap();
    let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["id", "full_name"]);
    assert_eq!(columns[1].data_type, "VARCHAR(80)");
    assert_eq!(columns[1].max_length, Some(80));

    let result = reopened
        .query("main", "SELECT id, full_name FROM users ORDER BY id", &[])
        .await
        .unwrap();
    assert_eq!(result.rows.len(), 3);
    assert_eq!(result.rows[0].get("id"), Some(&SqlValue::Int(1)));
    assert_eq!(result.rows[2].get("full_name"), Some(&SqlValue::Text("carol".into())));

    // No temp table left behind
    assert_eq!(reopened.get_tables("main").await.unwrap(), vec!["users".to_string()]);
    reopened.close().await;
}

#[tokio::test]
async fn test_failed_modify_leaves_table_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let mut adapter = seeded(&dir.path().join("app.db")).await;
    adapter
        .query("main", "INSERT INTO users (name) VALUES ('alice')", &[])
        .await
        .unwrap();
    let before = adapter.get_columns("main", "users").await.unwrap();

    // Duplicate names make the copy into a UNIQUE column fail mid-migration
    let err = adapter
        .modify_column(
            "main",
            "users",
            "name",
            &ColumnDefinition::new("handle", "TEXT").not_null().unique(),
            None,
        )
        .await
        .unwrap_err();
    match err {
        AdapterError::Migration { table, rolled_back, .. } => {
            assert_eq!(table, "users");
            assert!(rolled_back);
        }
        other => panic!("expected Migration, got {other:?}"),
    }

    assert_eq!(adapter.get_columns("main", "users").await.unwrap(), before);
    assert_eq!(adapter.get_tables("main").await.unwrap(), vec!["users".to_string()]);
    let count = adapter
        .query("main", "SELECT COUNT(*) AS n FROM users", &[])
        .await
        .unwrap();
    assert_eq!(count.rows[0].get("n"), Some(&SqlValue::Int(4)));
    adapter.close().await;
}

#[tokio::test]
async fn test_rename_and_delete_table() {
    let dir = tempfile::tempdir().unwrap();
    let mut adapter = seeded(&dir.path().join("app.db")).await;

    adapter.rename_table("main", "users", "people").await.unwrap();
    assert_eq!(adapter.get_tables("main").await.unwrap(), vec!["people".to_string()]);

    adapter.delete_table("main", "people").await.unwrap();
    assert!(adapter.get_tables("main").await.unwrap().is_empty());
    adapter.close().await;
}

#[tokio::test]
async fn test_remove_column() {
    let dir = tempfile::tempdir().unwrap();
    let mut adapter = seeded(&dir.path().join("app.db")).await;
    adapter
        .add_column("main", "users", &ColumnDefinition::new("age", "INTEGER"), Some("0"))
        .await
        .unwrap();

    adapter.remove_column("main", "users", "age").await.unwrap();
    let columns = adapter.get_columns("main", "users").await.unwrap();
    assert!(columns.iter().all(|c| c.name != "age"));
    adapter.close().await;
}

#[tokio::test]
async fn test_execute_query_field_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let mut adapter = seeded(&dir.path().join("app.db")).await;

    let result = adapter
        .execute_query("SELECT id, name FROM users ORDER BY id", None)
        .await
        .unwrap();
    assert_eq!(result.rows.len(), 3);
    let fields = result.fields.as_ref().unwrap();
    assert_eq!(fields.len(), 2);
    let id = &fields[0];
    assert_eq!(id.name, "id");
    assert!(id.is_primary_key);
    assert!(id.is_auto_increment);
    assert!(!id.is_nullable);
    let name = &fields[1];
    assert!(!name.is_primary_key);
    assert!(!name.is_nullable);

    let write = adapter
        .execute_query("UPDATE users SET name = upper(name)", None)
        .await
        .unwrap();
    assert_eq!(write.affected_rows, Some(3));
    adapter.close().await;
}

#[tokio::test]
async fn test_export_table_literals() {
    let dir = tempfile::tempdir().unwrap();
    let mut adapter = SqliteAdapter::new(dir.path().join("app.db"));
    adapter
        .create_table(
            "main",
            "files",
            &[
                ColumnDefinition::new("id", "INTEGER").primary_key(),
                ColumnDefinition::new("label", "TEXT"),
                ColumnDefinition::new("data", "BLOB"),
            ],
        )
        .await
        .unwrap();
    adapter
        .query(
            "main",
            "INSERT INTO files (id, label, data) VALUES (?, ?, ?)",
            &[
                QueryParam::Int(1),
                QueryParam::Null,
                QueryParam::Bytes(vec![0xff, 0x0a]),
            ],
        )
        .await
        .unwrap();
    adapter
        .query(
            "main",
            "INSERT INTO files (id, label, data) VALUES (?, ?, ?)",
            &[QueryParam::Int(2), QueryParam::from("it's"), QueryParam::Null],
        )
        .await
        .unwrap();

    let dump = adapter.export_table("main", "files", true).await.unwrap();
    assert!(dump.contains("DROP TABLE IF EXISTS \"files\";"));
    assert!(dump.contains("CREATE TABLE"));
    assert!(dump.contains("VALUES (1, NULL, X'ff0a');"));
    assert!(dump.contains("VALUES (2, 'it''s', NULL);"));

    let schema_only = adapter.export_table("main", "files", false).await.unwrap();
    assert!(!schema_only.contains("INSERT INTO"));

    let full = adapter.export_database("main", true).await.unwrap();
    assert!(full.starts_with("-- SQLite dump of database main"));
    assert!(full.contains("-- Table: files"));
    adapter.close().await;
}

#[tokio::test]
async fn test_factory_builds_local_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("factory.db");
    let descriptor = ConnectionDescriptor::sqlite_local("local", path.to_string_lossy());

    let mut adapter = create_adapter(&descriptor).unwrap();
    adapter.test_connection().await.unwrap();
    adapter.close().await;
    // Closing twice is a no-op
    adapter.close().await;
}

#[tokio::test]
async fn test_query_error_keeps_engine_text() {
    let dir = tempfile::tempdir().unwrap();
    let mut adapter = SqliteAdapter::new(dir.path().join("app.db"));

    let err = adapter
        .query("main", "SELECT * FROM missing_table", &[])
        .await
        .unwrap_err();
    assert!(matches!(err, AdapterError::Query { .. }));
    assert!(err.to_string().contains("missing_table"));
    adapter.close().await;
}

#[tokio::test]
async fn test_each_write_reaches_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.db");
    let mut writer = seeded(&path).await;

    // A second adapter sees the rows while the first is still open
    let mut reader = SqliteAdapter::new(&path);
    let count = reader
        .query("main", "SELECT COUNT(*) AS n FROM users", &[])
        .await
        .unwrap();
    assert_eq!(count.rows[0].get("n"), Some(&SqlValue::Int(3)));
    reader.close().await;
    writer.close().await;

    let files: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(files, vec!["app.db".to_string()]);
}

#[tokio::test]
async fn test_writes_behind_read_keywords_persist() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.db");
    let mut adapter = SqliteAdapter::new(&path);
    adapter
        .create_table("main", "t", &[ColumnDefinition::new("id", "INTEGER").primary_key()])
        .await
        .unwrap();

    let inserted = adapter
        .query(
            "main",
            "WITH v(x) AS (VALUES (?)) INSERT INTO t (id) SELECT x FROM v",
            &[QueryParam::Int(5)],
        )
        .await
        .unwrap();
    assert_eq!(inserted.affected_rows, Some(1));
    adapter.execute_query("PRAGMA user_version = 9", None).await.unwrap();
    adapter.close().await;

    let mut reopened = SqliteAdapter::new(&path);
    let ids = reopened.query("main", "SELECT id FROM t", &[]).await.unwrap();
    assert_eq!(ids.rows.len(), 1);
    assert_eq!(ids.rows[0].get("id"), Some(&SqlValue::Int(5)));
    let version = reopened
        .query("main", "PRAGMA user_version", &[])
        .await
        .unwrap();
    assert_eq!(version.rows[0].get("user_version"), Some(&SqlValue::Int(9)));
    reopened.close().await;
}

#[tokio::test]
async fn test_modify_keeps_other_column_clauses() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.db");
    let mut adapter = SqliteAdapter::new(&path);
    adapter
        .execute_query(
            "CREATE TABLE people (id INTEGER PRIMARY KEY, first TEXT COLLATE NOCASE, last TEXT, \
             age INTEGER CHECK (age >= 0), \
             full TEXT GENERATED ALWAYS AS (first || ' ' || last) VIRTUAL)",
            None,
        )
        .await
        .unwrap();
    adapter
        .query(
            "main",
            "INSERT INTO people (id, first, last, age) VALUES (1, 'Ada', 'Lovelace', 36)",
            &[],
        )
        .await
        .unwrap();

    adapter
        .modify_column("main", "people", "last", &ColumnDefinition::new("surname", "TEXT"), None)
        .await
        .unwrap();
    adapter.close().await;

    let mut reopened = SqliteAdapter::new(&path);
    let sql = reopened
        .query("main", "SELECT sql FROM sqlite_master WHERE name = 'people'", &[])
        .await
        .unwrap();
    let Some(SqlValue::Text(sql)) = sql.rows[0].get("sql") else {
        panic!("no table text");
    };
    assert!(sql.contains("first TEXT COLLATE NOCASE"), "{sql}");
    assert!(sql.contains("CHECK (age >= 0)"), "{sql}");
    assert!(sql.contains("GENERATED ALWAYS AS (first || ' ' || \"surname\") VIRTUAL"), "{sql}");

    let row = reopened
        .query("main", "SELECT full FROM people WHERE first = 'ADA'", &[])
        .await
        .unwrap();
    assert_eq!(row.rows[0].get("full"), Some(&SqlValue::Text("Ada Lovelace".into())));

    let err = reopened
        .query(
            "main",
            "INSERT INTO people (id, first, surname, age) VALUES (2, 'x', 'y', -5)",
            &[],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AdapterError::Query { .. }), "got {err:?}");
    reopened.close().await;
}

#[tokio::test]
async fn test_rename_indexed_column_keeps_index() {
    let dir = tempfile::tempdir().unwrap();
    let mut adapter = seeded(&dir.path().join("app.db")).await;
    adapter
        .execute_query("CREATE INDEX idx_users_name ON users (name)", None)
        .await
        .unwrap();

    adapter
        .modify_column(
            "main",
            "users",
            "name",
            &ColumnDefinition::new("full_name", "TEXT").not_null(),
            None,
        )
        .await
        .unwrap();

    let indexes = adapter
        .query("main", "SELECT name FROM pragma_index_list('users')", &[])
        .await
        .unwrap();
    let names: Vec<&SqlValue> = indexes.rows.iter().filter_map(|r| r.get("name")).collect();
    assert_eq!(names, vec![&SqlValue::Text("idx_users_name".into())]);

    let columns = adapter
        .query("main", "SELECT name FROM pragma_index_info('idx_users_name')", &[])
        .await
        .unwrap();
    assert_eq!(columns.rows[0].get("name"), Some(&SqlValue::Text("full_name".into())));
    adapter.close().await;
}

#[tokio::test]
async fn test_modify_drops_unique_the_new_definition_omits() {
    let dir = tempfile::tempdir().unwrap();
    let mut adapter = seeded(&dir.path().join("app.db")).await;
    adapter
        .add_column("main", "users", &ColumnDefinition::new("email", "TEXT").unique(), None)
        .await
        .unwrap();
    assert_eq!(adapter.get_unique_keys("main", "users").await.unwrap(), vec!["email"]);

    adapter
        .modify_column("main", "users", "email", &ColumnDefinition::new("email", "TEXT"), None)
        .await
        .unwrap();
    assert!(adapter.get_unique_keys("main", "users").await.unwrap().is_empty());
    adapter.close().await;
}
