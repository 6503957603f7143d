//! Persistent store: personas, conversation turns, structured state and the
//! memory log.
//!
//! The submodules are free functions over a borrowed [`Connection`].
//! [`Store`] is the shared handle async code goes through; it runs each
//! closure on the blocking pool under the connection mutex.

pub mod conversations;
pub mod memories;
pub mod personas;
pub mod state;
pub mod types;

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use rusqlite::Connection;

use crate::error::{Error, Result};

/// Current time as stored in every timestamp column.
pub(crate) fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Cloneable handle to the single shared SQLite connection.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        Ok(Self::new(crate::db::open_database(path)?))
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        Ok(Self::new(crate::db::open_memory_database()?))
    }

    /// Run `f` against the connection on the blocking pool.
    ///
    /// Any error comes back as [`Error::Persistence`].
    pub async fn run<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| Error::persistence(format!("db lock poisoned: {e}")))?;
            f(&mut conn).map_err(|e| Error::persistence(format!("{e:#}")))
        })
        .await
        .map_err(|e| Error::persistence(format!("db task failed: {e}")))?
    }

    /// Synchronous variant for CLI commands and tests.
    pub fn blocking<T>(&self, f: impl FnOnce(&mut Connection) -> anyhow::Result<T>) -> anyhow::Result<T> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("db lock poisoned: {e}"))?;
        f(&mut conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_returns_closure_result() {
        let store = Store::open_in_memory().unwrap();
        let n: i64 = store
            .run(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM personas", [], |r| r.get(0))?))
            .await
            .unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn run_maps_errors_to_persistence() {
        let store = Store::open_in_memory().unwrap();
        let err = store
            .run(|conn| {
                conn.execute("INSERT INTO nowhere VALUES (1)", [])?;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Persistence(_)));
    }

    #[test]
    fn timestamps_sort_lexicographically() {
        let a = now_timestamp();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = now_timestamp();
        assert!(a < b);
        assert!(a.ends_with('Z'));
    }
}
