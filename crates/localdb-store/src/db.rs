//! SQLite connection handle with WAL mode and ordered async access.
//!
//! The [`Database`] struct wraps a `rusqlite::Connection` behind an
//! `Arc<Mutex<>>` and exposes async methods that use
//! `tokio::task::spawn_blocking` to avoid blocking the async runtime.
//! Calls are admitted through a fair async mutex, so they reach the
//! connection in the order they were issued.

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::migration;

/// Thread-safe handle to a SQLite database.
///
/// All read/write operations go through [`Database::execute`] which
/// dispatches onto the blocking thread pool via `tokio::task::spawn_blocking`.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    /// FIFO admission; `tokio::sync::Mutex` wakes waiters in lock order.
    queue: Arc<tokio::sync::Mutex<()>>,
}

impl Database {
    /// Open (or create) a database at `path` and apply pragmas.
    ///
    /// This call blocks briefly (file I/O), so call it from
    /// `spawn_blocking` when inside the runtime.
    pub fn open(path: impl AsRef<Path>, busy_timeout_ms: u32) -> StoreResult<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening database");

        let conn = Connection::open(path)?;
        Self::apply_pragmas(&conn, busy_timeout_ms)?;

        Ok(Self::from_connection(conn))
    }

    /// Create an in-memory database — useful for tests.
    pub fn open_in_memory(busy_timeout_ms: u32) -> StoreResult<Self> {
        debug!("opening in-memory database");

        let conn = Connection::open_in_memory()?;
        Self::apply_pragmas(&conn, busy_timeout_ms)?;

        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            queue: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Run all pending internal schema migrations.
    pub async fn run_migrations(&self) -> StoreResult<()> {
        self.execute(migration::run_all).await
    }

    /// Execute a closure against the connection on the blocking pool.
    ///
    /// This is the primary way to interact with the database from async code.
    /// The closure receives a `&Connection` and must return a `StoreResult<T>`.
    /// Once admitted, the closure runs to completion even if the returned
    /// future is dropped.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let count: i64 = db.execute(|conn| {
    ///     let count = conn.query_row("SELECT count(*) FROM records", [], |row| row.get(0))?;
    ///     Ok(count)
    /// }).await?;
    /// ```
    pub async fn execute<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        self.execute_mut(move |conn| f(conn)).await
    }

    /// Execute a mutable closure (for transactions, etc.) on the blocking pool.
    ///
    /// The closure receives a `&mut Connection` so you can call
    /// `conn.transaction()` and friends.
    pub async fn execute_mut<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let turn = Arc::clone(&self.queue).lock_owned().await;
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let _turn = turn;
            let mut conn = conn
                .lock()
                .map_err(|e| StoreError::TaskJoin(format!("mutex poisoned: {e}")))?;
            f(&mut conn)
        })
        .await?
    }

    /// Run `f` inside an immediate (write-locking) transaction.
    ///
    /// The transaction commits when `f` returns `Ok` and rolls back
    /// otherwise. Begin and commit failures surface as
    /// [`StoreError::TransactionFailed`].
    pub async fn transaction<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Transaction<'_>) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        self.execute_mut(move |conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(|e| StoreError::TransactionFailed(format!("begin: {e}")))?;
            // Dropping `tx` on the error path rolls it back.
            let value = f(&tx)?;
            tx.commit()
                .map_err(|e| StoreError::TransactionFailed(format!("commit: {e}")))?;
            Ok(value)
        })
        .await
    }

    // ── pragmas ──────────────────────────────────────────────────────

    /// Apply pragmas to a fresh connection.
    fn apply_pragmas(conn: &Connection, busy_timeout_ms: u32) -> StoreResult<()> {
        debug!("applying SQLite pragmas");

        // WAL mode: concurrent readers, non-blocking writes.
        conn.pragma_update(None, "journal_mode", "WAL")?;

        // NORMAL sync is safe with WAL — we only lose the last transaction
        // on a power failure, not corruption.
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        conn.pragma_update(None, "temp_store", "MEMORY")?;

        // Deleting a collection cascades to its records.
        conn.pragma_update(None, "foreign_keys", "ON")?;

        // Concurrent writers from other processes wait instead of failing.
        conn.pragma_update(None, "busy_timeout", busy_timeout_ms)?;

        debug!(busy_timeout_ms, "database pragmas applied");
        Ok(())
    }
}

// ── tests ────────────────────────────────────────────────────────────
