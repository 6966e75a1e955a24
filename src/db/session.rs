//! Single backend handle per adapter.
//!
//! An adapter holds at most one live connection, bound to one database.
//! Asking for a different database closes the current handle first; errors
//! from that close are logged and otherwise ignored.

use sqlx::Connection;
use tracing::{debug, warn};

struct Handle<C> {
    conn: C,
    database: Option<String>,
}

/// Lazily opened, switchable connection.
pub struct Session<C: Connection> {
    handle: Option<Handle<C>>,
}

impl<C: Connection> Default for Session<C> {
    fn default() -> Self {
        Self { handle: None }
    }
}

impl<C: Connection> Session<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    /// Database the open handle is bound to.
    pub fn database(&self) -> Option<&str> {
        self.handle.as_ref().and_then(|h| h.database.as_deref())
    }

    /// True when an open handle can serve `database`. `None` accepts any
    /// open handle.
    pub fn is_bound_to(&self, database: Option<&str>) -> bool {
        match (&self.handle, database) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(h), Some(db)) => h.database.as_deref() == Some(db),
        }
    }

    /// Install a new handle, closing the previous one.
    pub async fn replace(&mut self, conn: C, database: Option<String>) {
        self.close().await;
        debug!(database = ?database, "Session bound");
        self.handle = Some(Handle { conn, database });
    }

    pub fn get_mut(&mut self) -> Option<&mut C> {
        self.handle.as_mut().map(|h| &mut h.conn)
    }

    /// Close the handle if one is open. Never fails.
    pub async fn close(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.conn.close().await {
                warn!(database = ?handle.database, error = %e, "Ignoring error while closing session");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::{Connection, SqliteConnection};

    #[tokio::test]
    async fn test_switch_replaces_handle() {
        let mut session: Session<SqliteConnection> = Session::new();
        assert!(!session.is_open());
        assert!(!session.is_bound_to(None));

        let conn = SqliteConnection::connect("sqlite::memory:").await.unwrap();
        session.replace(conn, Some("a".into())).await;
        assert!(session.is_bound_to(Some("a")));
        assert!(session.is_bound_to(None));
        assert!(!session.is_bound_to(Some("b")));

        let conn = SqliteConnection::connect("sqlite::memory:").await.unwrap();
        session.replace(conn, Some("b".into())).await;
        assert_eq!(session.database(), Some("b"));

        session.close().await;
        assert!(!session.is_open());
        // closing twice is a no-op
        session.close().await;
    }
}
