//! Shared SQLite access.
//!
//! Each operation opens a fresh connection on the blocking pool, so no
//! connection is ever held across an await into the provider. SQLite's own
//! locking arbitrates the rare concurrent writes this bot produces.

use crate::error::Result;
use rusqlite::Connection;
use std::path::{Path, PathBuf};

/// Handle to the on-disk database.
///
/// Cheap to clone; the components sharing one database each hold a copy.
#[derive(Debug, Clone)]
pub struct Store {
    db_path: PathBuf,
}

impl Store {
    /// Open the store, creating parent directories as needed.
    pub fn open(db_path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let db_path = db_path.into();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        // Fail at startup rather than on the first request.
        Connection::open(&db_path)?;

        Ok(Self { db_path })
    }

    /// Synchronous connection for startup work such as schema creation.
    pub fn connect(&self) -> anyhow::Result<Connection> {
        Ok(Connection::open(&self.db_path)?)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Run `f` against a fresh connection on the blocking pool.
    pub async fn call<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let db_path = self.db_path.clone();

        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path)?;
            Ok(f(&conn)?)
        })
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deep").join("usher.db");

        let store = Store::open(&path).unwrap();
        assert!(path.exists());
        assert_eq!(store.path(), path);
    }

    #[tokio::test]
    async fn test_call_runs_against_the_database() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("usher.db")).unwrap();

        store
            .call(|conn| {
                conn.execute_batch("CREATE TABLE t (n INTEGER)")?;
                conn.execute("INSERT INTO t (n) VALUES (7)", [])?;
                Ok(())
            })
            .await
            .unwrap();

        let n: i64 = store
            .call(|conn| conn.query_row("SELECT n FROM t", [], |row| row.get(0)))
            .await
            .unwrap();
        assert_eq!(n, 7);
    }

    #[tokio::test]
    async fn test_call_surfaces_sql_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("usher.db")).unwrap();

        let result = store
            .call(|conn| conn.execute("SELECT * FROM missing", []))
            .await;
        assert!(result.is_err());
    }
}
