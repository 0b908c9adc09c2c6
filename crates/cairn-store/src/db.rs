//! SQLite connection pool and transaction scoping.
//!
//! [`Database`] wraps an r2d2 pool over SQLite. Writes go through
//! [`transaction`](Database::transaction), which commits when the closure
//! returns `Ok` and rolls back otherwise. The ingestion core has a single
//! logical writer, but read queries may run concurrently on other pooled
//! connections.

use std::path::Path;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use crate::error::StoreError;
use crate::schema::CREATE_SCHEMA;

/// A pooled SQLite connection, returned to the pool on drop.
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// Database handle with connection pooling.
///
/// `Clone` shares the underlying pool. Opening applies the schema, so a
/// fresh path yields a ready, empty database.
pub struct Database {
    pool: Pool<SqliteConnectionManager>,
}

impl Database {
    /// Open or create the database at the given path and apply the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let manager = SqliteConnectionManager::file(path.as_ref()).with_init(|conn| {
            conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")
        });
        let pool = Pool::builder().build(manager)?;

        let db = Self { pool };
        db.with_connection(|conn| {
            conn.execute_batch(CREATE_SCHEMA)?;
            Ok(())
        })?;
        Ok(db)
    }

    /// Obtain a connection from the pool.
    pub fn connection(&self) -> Result<PooledConnection, StoreError> {
        self.pool.get().map_err(StoreError::from)
    }

    /// Run a closure inside a database transaction.
    ///
    /// Commits on `Ok`, rolls back on `Err`. All multi-row writes (block
    /// persistence, pool mutation) go through here so partial states are
    /// never observable.
    pub fn transaction<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&rusqlite::Transaction) -> Result<T, StoreError>,
    {
        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    /// Run a closure with a plain connection, for reads and single writes.
    pub fn with_connection<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError>,
    {
        let conn = self.connection()?;
        f(&conn)
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_db() -> (Database, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("index.db")).unwrap();
        (db, dir)
    }

    #[test]
    fn open_applies_schema() {
        let (db, _dir) = temp_db();
        let count: i64 = db
            .with_connection(|conn| {
                conn.query_row("SELECT COUNT(*) FROM blocks", [], |row| row.get(0))
                    .map_err(Into::into)
            })
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn open_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b/index.db");
        assert!(Database::open(&nested).is_ok());
        assert!(nested.exists());
    }

    #[test]
    fn transaction_commits_on_ok() {
        let (db, _dir) = temp_db();
        db.transaction(|tx| {
            tx.execute(
                "INSERT INTO chain_info (name, value) VALUES ('k', 'v')",
                [],
            )?;
            Ok(())
        })
        .unwrap();

        let value: String = db
            .with_connection(|conn| {
                conn.query_row("SELECT value FROM chain_info WHERE name = 'k'", [], |row| {
                    row.get(0)
                })
                .map_err(Into::into)
            })
            .unwrap();
        assert_eq!(value, "v");
    }

    #[test]
    fn transaction_rolls_back_on_err() {
        let (db, _dir) = temp_db();
        let result: Result<(), StoreError> = db.transaction(|tx| {
            tx.execute(
                "INSERT INTO chain_info (name, value) VALUES ('k', 'v')",
                [],
            )?;
            Err(StoreError::Integrity("forced".into()))
        });
        assert!(result.is_err());

        let count: i64 = db
            .with_connection(|conn| {
                conn.query_row("SELECT COUNT(*) FROM chain_info", [], |row| row.get(0))
                    .map_err(Into::into)
            })
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn clone_shares_pool() {
        let (db, _dir) = temp_db();
        let db2 = db.clone();
        db.transaction(|tx| {
            tx.execute(
                "INSERT INTO chain_info (name, value) VALUES ('k', '1')",
                [],
            )?;
            Ok(())
        })
        .unwrap();
        let value: String = db2
            .with_connection(|conn| {
                conn.query_row("SELECT value FROM chain_info WHERE name = 'k'", [], |row| {
                    row.get(0)
                })
                .map_err(Into::into)
            })
            .unwrap();
        assert_eq!(value, "1");
    }
}
