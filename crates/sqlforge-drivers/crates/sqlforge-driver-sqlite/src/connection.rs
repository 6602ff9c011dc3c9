//! SQLite [`Connection`] and [`Transaction`] implementations.
//!
//! `rusqlite::Connection` is not `Send` across await points on its own, so
//! the handle is shared behind `Arc<Mutex<_>>` and transactions are driven
//! with raw `BEGIN`/`COMMIT`/`ROLLBACK`/`SAVEPOINT` SQL rather than
//! rusqlite's borrow-scoped `Transaction` type.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{Connection as RusqliteConnection, InterruptHandle, OpenFlags, params_from_iter};

use sqlforge_core::connection::{Connection, IsolationLevel, QueryCancelHandle, Transaction};
use sqlforge_core::error::{Error, Result};
use sqlforge_core::transaction::savepoint::{Savepoint, SavepointSupport};
use sqlforge_core::value::{QueryResult, Row, StatementResult, Value};

/// Interrupts a running SQLite query from any thread.
pub struct SqliteCancelHandle {
    interrupt_handle: Arc<InterruptHandle>,
}

impl QueryCancelHandle for SqliteCancelHandle {
    fn cancel(&self) {
        tracing::debug!("interrupting sqlite query");
        self.interrupt_handle.interrupt();
    }
}

/// SQLite connection wrapper shared between the connection and its
/// transactions.
pub struct SqliteConnection {
    conn: Arc<Mutex<RusqliteConnection>>,
    interrupt_handle: Arc<InterruptHandle>,
}

impl SqliteConnection {
    /// Opens a SQLite database at `path`, or an in-memory database for
    /// `:memory:`. Enables foreign keys and WAL journaling.
    pub fn open(path: &str) -> Result<Self> {
        tracing::info!(path = %path, "opening sqlite database");
        let expanded = Self::expand_path(path)?;

        let conn = if path == ":memory:" {
            RusqliteConnection::open_in_memory()
                .map_err(|e| Error::Connection(format!("failed to open in-memory database: {e}")))?
        } else {
            let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX;
            RusqliteConnection::open_with_flags(&expanded, flags)
                .map_err(|e| Error::Connection(format!("failed to open '{expanded}': {e}")))?
        };

        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|e| Error::Connection(format!("failed to enable foreign keys: {e}")))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| Error::Connection(format!("failed to set journal mode: {e}")))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(|e| Error::Connection(format!("failed to set synchronous mode: {e}")))?;

        let interrupt_handle = Arc::new(conn.get_interrupt_handle());

        tracing::info!(path = %expanded, "sqlite connection established");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            interrupt_handle,
        })
    }

    fn expand_path(path: &str) -> Result<String> {
        if path == ":memory:" || path.starts_with("file:") {
            return Ok(path.to_string());
        }

        let expanded = if let Some(rest) = path.strip_prefix("~/") {
            let home = std::env::var_os("HOME")
                .ok_or_else(|| Error::Configuration("unable to determine HOME directory".into()))?;
            std::path::PathBuf::from(home)
                .join(rest)
                .to_string_lossy()
                .to_string()
        } else if path.starts_with('~') {
            return Err(Error::Configuration(
                "user-specific home directories (~user) are not supported".into(),
            ));
        } else {
            path.to_string()
        };

        let path_buf = std::path::PathBuf::from(&expanded);
        if path_buf.is_relative() {
            let cwd = std::env::current_dir().map_err(Error::Io)?;
            Ok(cwd.join(path_buf).to_string_lossy().to_string())
        } else {
            Ok(expanded)
        }
    }
}

#[async_trait]
impl Connection for SqliteConnection {
    fn driver_name(&self) -> &str {
        "sqlite"
    }

    #[tracing::instrument(skip(self, sql, params), fields(sql_preview = %sql.chars().take(100).collect::<String>()))]
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        let conn = self.conn.lock();
        run_execute(&conn, sql, params)
    }

    #[tracing::instrument(skip(self, sql, params), fields(sql_preview = %sql.chars().take(100).collect::<String>()))]
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let conn = self.conn.lock();
        run_query(&conn, sql, params)
    }

    fn cancel_handle(&self) -> Option<Arc<dyn QueryCancelHandle>> {
        Some(Arc::new(SqliteCancelHandle {
            interrupt_handle: self.interrupt_handle.clone(),
        }))
    }

    async fn begin_transaction(&self, _isolation: IsolationLevel, read_only: bool) -> Result<Box<dyn Transaction>> {
        tracing::debug!(read_only, "beginning sqlite transaction");
        {
            let conn = self.conn.lock();
            conn.execute_batch("BEGIN DEFERRED")
                .map_err(|e| Error::Driver(format!("failed to begin transaction: {e}")))?;
            if read_only {
                conn.pragma_update(None, "query_only", "ON")
                    .map_err(|e| Error::Driver(format!("failed to enter read-only transaction: {e}")))?;
            }
        }
        Ok(Box::new(SqliteTransaction {
            conn: Arc::clone(&self.conn),
            committed: false,
            rolled_back: false,
            read_only,
        }))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    fn is_closed(&self) -> bool {
        false
    }
}

/// Raw `BEGIN`/`COMMIT`/`ROLLBACK`/`SAVEPOINT` driven transaction sharing
/// the connection's `Arc<Mutex<_>>`.
pub struct SqliteTransaction {
    conn: Arc<Mutex<RusqliteConnection>>,
    committed: bool,
    rolled_back: bool,
    read_only: bool,
}

impl SqliteTransaction {
    fn clear_query_only(&self, conn: &RusqliteConnection) {
        if self.read_only {
            if let Err(e) = conn.pragma_update(None, "query_only", "OFF") {
                tracing::error!(error = %e, "failed to clear query_only after read-only transaction");
            }
        }
    }
}

impl Drop for SqliteTransaction {
    fn drop(&mut self) {
        if !self.committed && !self.rolled_back {
            tracing::warn!("sqlite transaction dropped without commit or rollback, rolling back");
            let conn = self.conn.lock();
            if let Err(e) = conn.execute_batch("ROLLBACK") {
                tracing::error!(error = %e, "automatic rollback on drop failed");
            }
            self.clear_query_only(&conn);
        }
    }
}

#[async_trait]
impl Transaction for SqliteTransaction {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        let conn = self.conn.lock();
        run_execute(&conn, sql, params)
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let conn = self.conn.lock();
        run_query(&conn, sql, params)
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        if self.rolled_back {
            return Err(Error::Driver("transaction already rolled back".into()));
        }
        if self.committed {
            return Err(Error::Driver("transaction already committed".into()));
        }
        let conn = self.conn.lock();
        conn.execute_batch("COMMIT")
            .map_err(|e| Error::Driver(format!("failed to commit transaction: {e}")))?;
        self.clear_query_only(&conn);
        self.committed = true;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        if self.committed {
            return Err(Error::Driver("transaction already committed".into()));
        }
        if self.rolled_back {
            return Ok(());
        }
        let conn = self.conn.lock();
        conn.execute_batch("ROLLBACK")
            .map_err(|e| Error::Driver(format!("failed to roll back transaction: {e}")))?;
        self.clear_query_only(&conn);
        self.rolled_back = true;
        Ok(())
    }
}

#[async_trait]
impl SavepointSupport for SqliteTransaction {
    async fn savepoint(&self, name: &str) -> Result<Savepoint> {
        let conn = self.conn.lock();
        conn.execute_batch(&format!("SAVEPOINT \"{name}\""))
            .map_err(|e| Error::Driver(format!("failed to create savepoint '{name}': {e}")))?;
        Ok(Savepoint::new(name))
    }

    async fn rollback_to_savepoint(&self, name: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(&format!("ROLLBACK TO SAVEPOINT \"{name}\""))
            .map_err(|e| Error::Driver(format!("failed to roll back to savepoint '{name}': {e}")))
    }

    async fn release_savepoint(&self, name: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(&format!("RELEASE SAVEPOINT \"{name}\""))
            .map_err(|e| Error::Driver(format!("failed to release savepoint '{name}': {e}")))
    }
}

fn run_execute(conn: &RusqliteConnection, sql: &str, params: &[Value]) -> Result<StatementResult> {
    let start = std::time::Instant::now();
    let rusqlite_params = values_to_rusqlite(params);
    let affected_rows = conn
        .execute(sql, params_from_iter(rusqlite_params.iter()))
        .map_err(|e| Error::Driver(format!("failed to execute statement: {e}")))?;
    let last_insert_id = if affected_rows > 0 {
        Some(Value::Int64(conn.last_insert_rowid()))
    } else {
        None
    };
    Ok(StatementResult {
        affected_rows: affected_rows as u64,
        last_insert_id,
        execution_time_ms: start.elapsed().as_millis() as u64,
    })
}

fn run_query(conn: &RusqliteConnection, sql: &str, params: &[Value]) -> Result<QueryResult> {
    let start = std::time::Instant::now();
    let rusqlite_params = values_to_rusqlite(params);

    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| Error::Driver(format!("failed to prepare query: {e}")))?;

    let columns: Vec<String> = stmt
        .column_names()
        .into_iter()
        .map(|s| s.to_string())
        .collect();

    let mut rows = Vec::new();
    let mut query_rows = stmt
        .query(params_from_iter(rusqlite_params.iter()))
        .map_err(|e| Error::Driver(format!("failed to execute query: {e}")))?;

    while let Some(row) = query_rows
        .next()
        .map_err(|e| Error::Driver(format!("failed to fetch row: {e}")))?
    {
        let mut values = Vec::with_capacity(columns.len());
        for i in 0..columns.len() {
            values.push(rusqlite_to_value(row, i)?);
        }
        rows.push(Row::new(columns.clone(), values));
    }

    Ok(QueryResult {
        columns,
        rows,
        execution_time_ms: start.elapsed().as_millis() as u64,
    })
}

fn values_to_rusqlite(values: &[Value]) -> Vec<rusqlite::types::Value> {
    values.iter().map(value_to_rusqlite).collect()
}

fn value_to_rusqlite(value: &Value) -> rusqlite::types::Value {
    match value {
        Value::Null => rusqlite::types::Value::Null,
        Value::Bool(b) => rusqlite::types::Value::Integer(if *b { 1 } else { 0 }),
        Value::Int32(i) => rusqlite::types::Value::Integer(*i as i64),
        Value::Int64(i) => rusqlite::types::Value::Integer(*i),
        Value::Float64(f) => rusqlite::types::Value::Real(*f),
        Value::Decimal(d) => rusqlite::types::Value::Text(d.clone()),
        Value::String(s) => rusqlite::types::Value::Text(s.clone()),
        Value::Bytes(b) => rusqlite::types::Value::Blob(b.clone()),
        Value::Uuid(u) => rusqlite::types::Value::Text(u.to_string()),
        Value::Date(d) => rusqlite::types::Value::Text(d.to_string()),
        Value::Time(t) => rusqlite::types::Value::Text(t.to_string()),
        Value::DateTime(dt) => rusqlite::types::Value::Text(dt.to_string()),
        Value::DateTimeUtc(dt) => rusqlite::types::Value::Text(dt.to_rfc3339()),
        Value::Json(j) => rusqlite::types::Value::Text(j.to_string()),
        Value::Array(_) => rusqlite::types::Value::Null,
    }
}

fn rusqlite_to_value(row: &rusqlite::Row, idx: usize) -> Result<Value> {
    use rusqlite::types::ValueRef;

    let value_ref = row
        .get_ref(idx)
        .map_err(|e| Error::Driver(e.to_string()))?;

    Ok(match value_ref {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int64(i),
        ValueRef::Real(f) => Value::Float64(f),
        ValueRef::Text(s) => Value::String(String::from_utf8_lossy(s).to_string()),
        ValueRef::Blob(b) => match std::str::from_utf8(b) {
            Ok(s) => Value::String(s.to_string()),
            Err(_) => Value::Bytes(b.to_vec()),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_in_memory_and_run_ddl() {
        let conn = SqliteConnection::open(":memory:").expect("open");
        conn.execute("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)", &[])
            .await
            .expect("create table");
        let result = conn
            .execute(
                "INSERT INTO t (name) VALUES (?)",
                &[Value::String("alice".into())],
            )
            .await
            .expect("insert");
        assert_eq!(result.affected_rows, 1);
        assert_eq!(result.last_insert_id, Some(Value::Int64(1)));
    }

    #[tokio::test]
    async fn query_round_trips_values() {
        let conn = SqliteConnection::open(":memory:").expect("open");
        conn.execute("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)", &[])
            .await
            .unwrap();
        conn.execute(
            "INSERT INTO t (name) VALUES (?)",
            &[Value::String("bob".into())],
        )
        .await
        .unwrap();

        let result = conn.query("SELECT id, name FROM t", &[]).await.unwrap();
        assert_eq!(result.row_count(), 1);
        assert_eq!(
            result.rows[0].get_by_name("name"),
            Some(&Value::String("bob".into()))
        );
    }

    #[tokio::test]
    async fn transaction_rollback_undoes_writes() {
        let conn = SqliteConnection::open(":memory:").expect("open");
        conn.execute("CREATE TABLE t (id INTEGER PRIMARY KEY)", &[])
            .await
            .unwrap();

        let txn = conn
            .begin_transaction(IsolationLevel::ReadCommitted, false)
            .await
            .unwrap();
        txn.execute("INSERT INTO t DEFAULT VALUES", &[]).await.unwrap();
        txn.rollback().await.unwrap();

        let result = conn.query("SELECT * FROM t", &[]).await.unwrap();
        assert_eq!(result.row_count(), 0);
    }

    #[tokio::test]
    async fn read_only_transaction_rejects_writes() {
        let conn = SqliteConnection::open(":memory:").expect("open");
        conn.execute("CREATE TABLE t (id INTEGER PRIMARY KEY)", &[])
            .await
            .unwrap();

        let txn = conn
            .begin_transaction(IsolationLevel::ReadCommitted, true)
            .await
            .unwrap();
        let err = txn.execute("INSERT INTO t DEFAULT VALUES", &[]).await.unwrap_err();
        assert!(matches!(err, Error::Driver(_)));
        txn.rollback().await.unwrap();

        // query_only is cleared on rollback, so a later writable transaction still works.
        let txn2 = conn
            .begin_transaction(IsolationLevel::ReadCommitted, false)
            .await
            .unwrap();
        txn2.execute("INSERT INTO t DEFAULT VALUES", &[]).await.unwrap();
        txn2.commit().await.unwrap();
        let result = conn.query("SELECT * FROM t", &[]).await.unwrap();
        assert_eq!(result.row_count(), 1);
    }

    #[tokio::test]
    async fn savepoint_rolls_back_partial_work() {
        let conn = SqliteConnection::open(":memory:").expect("open");
        conn.execute("CREATE TABLE t (id INTEGER PRIMARY KEY)", &[])
            .await
            .unwrap();
        conn.execute("INSERT INTO t DEFAULT VALUES", &[]).await.unwrap();

        conn.execute("BEGIN DEFERRED", &[]).await.unwrap();
        let txn = SqliteTransaction {
            conn: Arc::clone(&conn.conn),
            committed: false,
            rolled_back: false,
        };
        txn.savepoint("before_second").await.unwrap();
        txn.execute("INSERT INTO t DEFAULT VALUES", &[]).await.unwrap();
        txn.rollback_to_savepoint("before_second").await.unwrap();
        txn.release_savepoint("before_second").await.unwrap();
        Box::new(txn).commit().await.unwrap();

        let result = conn.query("SELECT * FROM t", &[]).await.unwrap();
        assert_eq!(result.row_count(), 1);
    }
}
