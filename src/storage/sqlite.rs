//! SQLite store, sessions and transaction ownership

use std::path::Path;
use std::time::Duration;

use rusqlite::Connection;

use super::catalog::SchemaCatalog;
use super::retry::RetryPolicy;
use super::schema;
use crate::{Error, Result};

/// Who commits, rolls back and retries the statements issued through a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnOwnership {
    /// Each write runs in its own transaction, retried on lock contention
    Engine,
    /// Writes join the caller's open transaction; errors propagate untouched
    Caller,
}

/// SQLite-backed store for the catalogue
pub struct SqliteStore {
    conn: Connection,
    catalog: SchemaCatalog,
    retry: RetryPolicy,
}

/// Row count of one table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableCount {
    pub table: String,
    pub rows: usize,
}

impl SqliteStore {
    /// Open a database file (creates if doesn't exist)
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with(path, RetryPolicy::default(), Duration::from_millis(5000))
    }

    /// Open a database file with an explicit retry policy and busy timeout
    pub fn open_with(path: &Path, retry: RetryPolicy, busy_timeout: Duration) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        enforce_foreign_keys(&conn)?;
        let store = Self {
            conn,
            catalog: SchemaCatalog::new(),
            retry,
        };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        enforce_foreign_keys(&conn)?;
        let store = Self {
            conn,
            catalog: SchemaCatalog::new(),
            retry: RetryPolicy::default(),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Initialize the database schema
    fn initialize_schema(&self) -> Result<()> {
        for stmt in schema::all_schema_statements() {
            self.conn.execute(&stmt, [])?;
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub fn set_retry_policy(&mut self, retry: RetryPolicy) {
        self.retry = retry;
    }

    pub fn catalog(&self) -> &SchemaCatalog {
        &self.catalog
    }

    /// Raw connection, for statements outside the generic engines
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Session whose writes are owned by the engine
    pub fn session(&self) -> Session<'_> {
        Session {
            store: self,
            ownership: TxnOwnership::Engine,
        }
    }

    /// Open a caller-owned transaction. Dropping it without committing rolls back.
    pub fn begin(&self) -> Result<CallerTxn<'_>> {
        self.conn.execute_batch("BEGIN")?;
        Ok(CallerTxn {
            store: self,
            finished: false,
        })
    }

    // ========== Stats Operations ==========

    /// Row counts for every managed table
    pub fn table_counts(&self) -> Result<Vec<TableCount>> {
        schema::TABLES
            .iter()
            .map(|table| {
                let count: i64 = self.conn.query_row(
                    &format!("SELECT COUNT(*) FROM \"{}\"", table),
                    [],
                    |row| row.get(0),
                )?;
                Ok(TableCount {
                    table: table.to_string(),
                    rows: count as usize,
                })
            })
            .collect()
    }

    /// Number of rows in one table
    pub fn count(&self, table: &str) -> Result<usize> {
        self.catalog.columns(&self.conn, table)?;
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM \"{}\"", table),
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

/// Foreign keys are always enforced, whatever the SQLite build defaults to.
/// The pragma is ignored inside a transaction, so it is set right after opening.
fn enforce_foreign_keys(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "foreign_keys", true)?;
    let enabled: bool = conn.pragma_query_value(None, "foreign_keys", |row| row.get(0))?;
    if !enabled {
        return Err(Error::Schema("foreign key enforcement is unavailable".to_string()));
    }
    Ok(())
}

/// A store handle tagged with who owns the transaction
#[derive(Clone, Copy)]
pub struct Session<'a> {
    store: &'a SqliteStore,
    ownership: TxnOwnership,
}

impl<'a> Session<'a> {
    pub fn store(&self) -> &'a SqliteStore {
        self.store
    }

    pub fn conn(&self) -> &'a Connection {
        &self.store.conn
    }

    pub fn catalog(&self) -> &'a SchemaCatalog {
        &self.store.catalog
    }

    pub fn ownership(&self) -> TxnOwnership {
        self.ownership
    }

    /// Run a write in a transaction, replaying it on lock contention when the engine owns it
    pub(crate) fn write<T>(&self, label: &str, op: impl FnMut(&Connection) -> Result<T>) -> Result<T> {
        self.run(label, self.store.retry, op)
    }

    /// Run a write in a transaction without replaying it
    pub(crate) fn write_once<T>(&self, label: &str, op: impl FnMut(&Connection) -> Result<T>) -> Result<T> {
        self.run(label, RetryPolicy::disabled(), op)
    }

    /// Run several statements as one unit.
    ///
    /// With an engine-owned session the unit gets its own transaction, committed on
    /// success and rolled back on any error. It is not replayed on lock contention
    /// (the busy timeout still applies). Inside a caller transaction it runs inline.
    pub fn atomically<T>(&self, label: &str, mut op: impl FnMut(&Session<'a>) -> Result<T>) -> Result<T> {
        let inner = Session {
            store: self.store,
            ownership: TxnOwnership::Caller,
        };
        self.run(label, RetryPolicy::disabled(), |_| op(&inner))
    }

    fn run<T>(
        &self,
        label: &str,
        policy: RetryPolicy,
        mut op: impl FnMut(&Connection) -> Result<T>,
    ) -> Result<T> {
        let conn = self.conn();

        // Caller-owned, or nested inside a transaction another write opened
        if self.ownership == TxnOwnership::Caller || !conn.is_autocommit() {
            return op(conn);
        }

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let result = conn
                .execute_batch("BEGIN IMMEDIATE")
                .map_err(Error::from)
                .and_then(|_| {
                    let value = op(conn)?;
                    conn.execute_batch("COMMIT")?;
                    Ok(value)
                });

            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !conn.is_autocommit() {
                if let Err(e) = conn.execute_batch("ROLLBACK") {
                    tracing::warn!("Rollback of {} failed: {}", label, e);
                }
            }

            match &err {
                Error::Storage(e) if policy.should_retry(attempt, e) => {
                    let delay = policy.backoff(attempt);
                    tracing::debug!(
                        "[retry] {}: {}; attempt {}/{}; sleeping {:?}",
                        label,
                        e,
                        attempt,
                        policy.max_retries,
                        delay
                    );
                    std::thread::sleep(delay);
                }
                _ => {
                    tracing::warn!("Transaction for {} rolled back due to: {}", label, err);
                    return Err(err);
                }
            }
        }
    }
}

/// A transaction opened by the caller; statements issued through its session are never
/// committed, rolled back or retried by the engines.
pub struct CallerTxn<'a> {
    store: &'a SqliteStore,
    finished: bool,
}

impl<'a> CallerTxn<'a> {
    pub fn session(&self) -> Session<'a> {
        Session {
            store: self.store,
            ownership: TxnOwnership::Caller,
        }
    }

    pub fn commit(mut self) -> Result<()> {
        self.store.conn.execute_batch("COMMIT")?;
        self.finished = true;
        Ok(())
    }

    pub fn rollback(mut self) -> Result<()> {
        self.store.conn.execute_batch("ROLLBACK")?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for CallerTxn<'_> {
    fn drop(&mut self) {
        if !self.finished && !self.store.conn.is_autocommit() {
            if let Err(e) = self.store.conn.execute_batch("ROLLBACK") {
                tracing::warn!("Rollback of abandoned transaction failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory_creates_tables() {
        let store = SqliteStore::open_in_memory().unwrap();
        let counts = store.table_counts().unwrap();
        assert_eq!(counts.len(), schema::TABLES.len());
        assert!(counts.iter().all(|c| c.rows == 0));
    }

    #[test]
    fn test_engine_write_commits() {
        let store = SqliteStore::open_in_memory().unwrap();
        let session = store.session();
        session
            .write("long_text", |conn| {
                conn.execute("INSERT INTO long_text (text) VALUES ('a')", [])?;
                Ok(())
            })
            .unwrap();
        assert!(store.connection().is_autocommit());
        assert_eq!(store.count("long_text").unwrap(), 1);
    }

    #[test]
    fn test_engine_write_rolls_back_on_error() {
        let store = SqliteStore::open_in_memory().unwrap();
        let result: Result<()> = store.session().write("long_text", |conn| {
            conn.execute("INSERT INTO long_text (text) VALUES ('a')", [])?;
            Err(Error::Validation("boom".to_string()))
        });
        assert!(matches!(result, Err(Error::Validation(_))));
        assert_eq!(store.count("long_text").unwrap(), 0);
    }

    #[test]
    fn test_caller_txn_commit_and_rollback() {
        let store = SqliteStore::open_in_memory().unwrap();

        let txn = store.begin().unwrap();
        let session = txn.session();
        assert_eq!(session.ownership(), TxnOwnership::Caller);
        session
            .write("long_text", |conn| {
                conn.execute("INSERT INTO long_text (text) VALUES ('kept')", [])?;
                Ok(())
            })
            .unwrap();
        // still open: the engine never commits a caller transaction
        assert!(!store.connection().is_autocommit());
        txn.commit().unwrap();
        assert_eq!(store.count("long_text").unwrap(), 1);

        let txn = store.begin().unwrap();
        txn.session()
            .write("long_text", |conn| {
                conn.execute("INSERT INTO long_text (text) VALUES ('dropped')", [])?;
                Ok(())
            })
            .unwrap();
        txn.rollback().unwrap();
        assert_eq!(store.count("long_text").unwrap(), 1);
    }

    #[test]
    fn test_dropped_caller_txn_rolls_back() {
        let store = SqliteStore::open_in_memory().unwrap();
        {
            let txn = store.begin().unwrap();
            txn.session()
                .write("long_text", |conn| {
                    conn.execute("INSERT INTO long_text (text) VALUES ('x')", [])?;
                    Ok(())
                })
                .unwrap();
        }
        assert!(store.connection().is_autocommit());
        assert_eq!(store.count("long_text").unwrap(), 0);
    }

    #[test]
    fn test_foreign_keys_are_enforced() {
        let store = SqliteStore::open_in_memory().unwrap();
        let enabled: i64 = store
            .connection()
            .query_row("PRAGMA foreign_keys", [], |r| r.get(0))
            .unwrap();
        assert_eq!(enabled, 1);

        let orphan = store
            .connection()
            .execute("INSERT INTO resource_grant (resource_id, grant_id) VALUES (1, 2)", []);
        assert!(orphan.is_err());

        let dir = tempfile::tempdir().unwrap();
        let file_store = SqliteStore::open(&dir.path().join("gbc.db")).unwrap();
        let enabled: i64 = file_store
            .connection()
            .query_row("PRAGMA foreign_keys", [], |r| r.get(0))
            .unwrap();
        assert_eq!(enabled, 1);
    }

    #[test]
    fn test_atomically_rolls_back_every_statement() {
        let store = SqliteStore::open_in_memory().unwrap();
        let session = store.session();
        let result: Result<()> = session.atomically("pair", |inner| {
            assert_eq!(inner.ownership(), TxnOwnership::Caller);
            inner.write("long_text", |conn| {
                conn.execute("INSERT INTO long_text (text) VALUES ('first')", [])?;
                Ok(())
            })?;
            inner.write("long_text", |conn| {
                conn.execute("INSERT INTO url (id, url) VALUES (1, 'https://a')", [])?;
                conn.execute("INSERT INTO connection_status (url_id, date) VALUES (99, 'now')", [])?;
                Ok(())
            })
        });
        assert!(matches!(result, Err(Error::Storage(_))));
        assert!(store.connection().is_autocommit());
        assert_eq!(store.count("long_text").unwrap(), 0);
        assert_eq!(store.count("url").unwrap(), 0);

        let kept = session
            .atomically("single", |inner| {
                inner.write("long_text", |conn| Ok(conn.execute("INSERT INTO long_text (text) VALUES ('x')", [])?))
            })
            .unwrap();
        assert_eq!(kept, 1);
        assert_eq!(store.count("long_text").unwrap(), 1);
    }

    #[test]
    fn test_count_unknown_table() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(matches!(store.count("symbols"), Err(Error::Schema(_))));
    }
}
