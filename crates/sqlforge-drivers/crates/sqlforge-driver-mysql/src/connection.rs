//! MySQL [`Connection`] and [`Transaction`] implementations.

use std::sync::Arc;

use async_trait::async_trait;
use mysql_async::consts::ColumnType as MySqlColumnType;
use mysql_async::prelude::*;
use mysql_async::{Conn, Opts, OptsBuilder, Params, Pool, PoolConstraints, PoolOpts};

use sqlforge_core::connection::{Connection, IsolationLevel, QueryCancelHandle, Transaction};
use sqlforge_core::error::{Error, Result};
use sqlforge_core::transaction::savepoint::{Savepoint, SavepointSupport};
use sqlforge_core::value::{QueryResult, Row, StatementResult, Value};

/// Cooperative cancellation flag; MySQL's wire protocol has no equivalent
/// to PostgreSQL's out-of-band cancel request, so in-flight row streaming
/// checks this flag between rows.
pub struct MySqlCancelHandle {
    cancelled: Arc<std::sync::atomic::AtomicBool>,
}

impl QueryCancelHandle for MySqlCancelHandle {
    fn cancel(&self) {
        tracing::debug!("setting mysql query cancellation flag");
        self.cancelled.store(true, std::sync::atomic::Ordering::SeqCst);
    }
}

/// MySQL connection wrapper backed by a single-connection `mysql_async`
/// pool, so `begin_transaction` can hand out a handle sharing the exact
/// same server-side session.
pub struct MySqlConnection {
    pool: Pool,
    cancelled: Arc<std::sync::atomic::AtomicBool>,
}

impl MySqlConnection {
    pub async fn connect(
        host: &str,
        port: u16,
        database: Option<&str>,
        user: Option<&str>,
        password: Option<&str>,
    ) -> Result<Self> {
        tracing::info!(host = %host, port = %port, database = ?database, "connecting to mysql");

        let mut opts_builder = OptsBuilder::from_opts(Opts::default())
            .ip_or_hostname(host)
            .tcp_port(port);
        if let Some(db) = database {
            opts_builder = opts_builder.db_name(Some(db));
        }
        if let Some(u) = user {
            opts_builder = opts_builder.user(Some(u));
        }
        if let Some(p) = password {
            opts_builder = opts_builder.pass(Some(p));
        }

        let constraints = PoolConstraints::new(1, 4)
            .ok_or_else(|| Error::Configuration("invalid mysql pool constraints".into()))?;
        let pool_opts = PoolOpts::default().with_constraints(constraints);
        opts_builder = opts_builder.pool_opts(pool_opts);

        let pool = Pool::new(Opts::from(opts_builder));
        pool.get_conn()
            .await
            .map_err(|e| Error::Connection(format!("failed to connect to mysql: {e}")))?;

        tracing::info!(host = %host, port = %port, "mysql connection established");
        Ok(Self {
            pool,
            cancelled: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        })
    }

    async fn get_conn(&self) -> Result<Conn> {
        self.pool
            .get_conn()
            .await
            .map_err(|e| Error::Connection(format!("failed to get mysql connection: {e}")))
    }
}

#[async_trait]
impl Connection for MySqlConnection {
    fn driver_name(&self) -> &str {
        "mysql"
    }

    #[tracing::instrument(skip(self, sql, params), fields(sql_preview = %sql.chars().take(100).collect::<String>()))]
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        let mut conn = self.get_conn().await?;
        run_execute(&mut conn, sql, params).await
    }

    #[tracing::instrument(skip(self, sql, params), fields(sql_preview = %sql.chars().take(100).collect::<String>()))]
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.cancelled.store(false, std::sync::atomic::Ordering::SeqCst);
        let mut conn = self.get_conn().await?;
        run_query(&mut conn, sql, params, &self.cancelled).await
    }

    fn cancel_handle(&self) -> Option<Arc<dyn QueryCancelHandle>> {
        Some(Arc::new(MySqlCancelHandle {
            cancelled: self.cancelled.clone(),
        }))
    }

    async fn begin_transaction(&self, _isolation: IsolationLevel, read_only: bool) -> Result<Box<dyn Transaction>> {
        tracing::debug!(read_only, "beginning mysql transaction");
        let mut conn = self.get_conn().await?;
        let begin_sql = if read_only { "START TRANSACTION READ ONLY" } else { "BEGIN" };
        conn.query_drop(begin_sql)
            .await
            .map_err(|e| Error::Driver(format!("failed to begin transaction: {e}")))?;
        Ok(Box::new(MySqlTransaction {
            conn: tokio::sync::Mutex::new(Some(conn)),
            committed: std::sync::atomic::AtomicBool::new(false),
            rolled_back: std::sync::atomic::AtomicBool::new(false),
        }))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    fn is_closed(&self) -> bool {
        false
    }
}

/// MySQL transaction wrapper. Unlike the SQLite/Postgres drivers, the
/// dedicated connection checked out of the pool for the transaction's
/// lifetime is owned outright rather than shared, since `mysql_async`
/// connections are not `Clone`.
pub struct MySqlTransaction {
    conn: tokio::sync::Mutex<Option<Conn>>,
    committed: std::sync::atomic::AtomicBool,
    rolled_back: std::sync::atomic::AtomicBool,
}

impl Drop for MySqlTransaction {
    fn drop(&mut self) {
        if !self.committed.load(std::sync::atomic::Ordering::SeqCst)
            && !self.rolled_back.load(std::sync::atomic::Ordering::SeqCst)
        {
            tracing::warn!("mysql transaction dropped without commit or rollback");
        }
    }
}

#[async_trait]
impl Transaction for MySqlTransaction {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| Error::Driver("transaction connection already released".into()))?;
        run_execute(conn, sql, params).await
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| Error::Driver("transaction connection already released".into()))?;
        let flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
        run_query(conn, sql, params, &flag).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        if self.rolled_back.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(Error::Driver("transaction already rolled back".into()));
        }
        if self.committed.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(Error::Driver("transaction already committed".into()));
        }
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| Error::Driver("transaction connection already released".into()))?;
        conn.query_drop("COMMIT")
            .await
            .map_err(|e| Error::Driver(format!("failed to commit transaction: {e}")))?;
        self.committed.store(true, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        if self.committed.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(Error::Driver("transaction already committed".into()));
        }
        if self.rolled_back.load(std::sync::atomic::Ordering::SeqCst) {
            return Ok(());
        }
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| Error::Driver("transaction connection already released".into()))?;
        conn.query_drop("ROLLBACK")
            .await
            .map_err(|e| Error::Driver(format!("failed to roll back transaction: {e}")))?;
        self.rolled_back.store(true, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl SavepointSupport for MySqlTransaction {
    async fn savepoint(&self, name: &str) -> Result<Savepoint> {
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| Error::Driver("transaction connection already released".into()))?;
        conn.query_drop(format!("SAVEPOINT `{name}`"))
            .await
            .map_err(|e| Error::Driver(format!("failed to create savepoint '{name}': {e}")))?;
        Ok(Savepoint::new(name))
    }

    async fn rollback_to_savepoint(&self, name: &str) -> Result<()> {
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| Error::Driver("transaction connection already released".into()))?;
        conn.query_drop(format!("ROLLBACK TO SAVEPOINT `{name}`"))
            .await
            .map_err(|e| Error::Driver(format!("failed to roll back to savepoint '{name}': {e}")))
    }

    async fn release_savepoint(&self, name: &str) -> Result<()> {
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| Error::Driver("transaction connection already released".into()))?;
        conn.query_drop(format!("RELEASE SAVEPOINT `{name}`"))
            .await
            .map_err(|e| Error::Driver(format!("failed to release savepoint '{name}': {e}")))
    }
}

async fn run_execute(conn: &mut Conn, sql: &str, params: &[Value]) -> Result<StatementResult> {
    let start = std::time::Instant::now();
    let mysql_params = bind_params(params);
    conn.exec_drop(sql, mysql_params)
        .await
        .map_err(|e| Error::Driver(format!("failed to execute statement: {e}")))?;

    Ok(StatementResult {
        affected_rows: conn.affected_rows(),
        last_insert_id: (conn.last_insert_id() != 0).then(|| Value::Int64(conn.last_insert_id() as i64)),
        execution_time_ms: start.elapsed().as_millis() as u64,
    })
}

async fn run_query(
    conn: &mut Conn,
    sql: &str,
    params: &[Value],
    cancelled: &Arc<std::sync::atomic::AtomicBool>,
) -> Result<QueryResult> {
    let start = std::time::Instant::now();
    let mysql_params = bind_params(params);

    let mysql_rows: Vec<mysql_async::Row> = conn
        .exec(sql, mysql_params)
        .await
        .map_err(|e| Error::Driver(format!("failed to execute query: {e}")))?;

    let mut columns = Vec::new();
    let mut column_types = Vec::new();
    if let Some(first) = mysql_rows.first() {
        for col in first.columns_ref() {
            columns.push(col.name_str().to_string());
            column_types.push(col.column_type());
        }
    }

    let mut rows = Vec::with_capacity(mysql_rows.len());
    for mysql_row in mysql_rows {
        if cancelled.load(std::sync::atomic::Ordering::SeqCst) {
            tracing::debug!("mysql query cancelled mid-stream");
            break;
        }
        let mut values = Vec::with_capacity(columns.len());
        for (idx, ty) in column_types.iter().enumerate() {
            let raw = mysql_row.as_ref(idx).cloned().unwrap_or(mysql_async::Value::NULL);
            values.push(mysql_value_to_value(raw, *ty));
        }
        rows.push(Row::new(columns.clone(), values));
    }

    Ok(QueryResult {
        columns,
        rows,
        execution_time_ms: start.elapsed().as_millis() as u64,
    })
}

fn bind_params(params: &[Value]) -> Params {
    if params.is_empty() {
        return Params::Empty;
    }
    Params::Positional(params.iter().map(value_to_mysql).collect())
}

fn value_to_mysql(value: &Value) -> mysql_async::Value {
    match value {
        Value::Null => mysql_async::Value::NULL,
        Value::Bool(v) => mysql_async::Value::Int(if *v { 1 } else { 0 }),
        Value::Int32(v) => mysql_async::Value::Int(*v as i64),
        Value::Int64(v) => mysql_async::Value::Int(*v),
        Value::Float64(v) => mysql_async::Value::Double(*v),
        Value::Decimal(v) => mysql_async::Value::Bytes(v.as_bytes().to_vec()),
        Value::String(v) => mysql_async::Value::Bytes(v.as_bytes().to_vec()),
        Value::Bytes(v) => mysql_async::Value::Bytes(v.clone()),
        Value::Uuid(v) => mysql_async::Value::Bytes(v.to_string().into_bytes()),
        Value::Date(v) => mysql_async::Value::Bytes(v.to_string().into_bytes()),
        Value::Time(v) => mysql_async::Value::Bytes(v.to_string().into_bytes()),
        Value::DateTime(v) => mysql_async::Value::Bytes(v.format("%Y-%m-%d %H:%M:%S").to_string().into_bytes()),
        Value::DateTimeUtc(v) => mysql_async::Value::Bytes(v.format("%Y-%m-%d %H:%M:%S").to_string().into_bytes()),
        Value::Json(v) => mysql_async::Value::Bytes(v.to_string().into_bytes()),
        Value::Array(items) => mysql_async::Value::Bytes(
            serde_json::to_vec(items).unwrap_or_default(),
        ),
    }
}

/// Converts a `mysql_async` text-protocol value into our canonical
/// [`Value`], using column type metadata to disambiguate the byte-string
/// encoding MySQL uses for numeric columns.
fn mysql_value_to_value(val: mysql_async::Value, col_type: MySqlColumnType) -> Value {
    use MySqlColumnType::*;

    match val {
        mysql_async::Value::NULL => Value::Null,
        mysql_async::Value::Bytes(bytes) => match String::from_utf8(bytes.clone()) {
            Ok(s) => match col_type {
                MYSQL_TYPE_TINY if s == "0" || s == "1" => {
                    Value::Bool(s == "1")
                }
                MYSQL_TYPE_TINY | MYSQL_TYPE_SHORT | MYSQL_TYPE_LONG | MYSQL_TYPE_LONGLONG
                | MYSQL_TYPE_INT24 | MYSQL_TYPE_YEAR => {
                    s.parse::<i64>().map(Value::Int64).unwrap_or(Value::String(s))
                }
                MYSQL_TYPE_FLOAT | MYSQL_TYPE_DOUBLE => {
                    s.parse::<f64>().map(Value::Float64).unwrap_or(Value::String(s))
                }
                MYSQL_TYPE_DECIMAL | MYSQL_TYPE_NEWDECIMAL => Value::Decimal(s),
                MYSQL_TYPE_JSON => serde_json::from_str(&s)
                    .map(Value::Json)
                    .unwrap_or(Value::String(s)),
                _ => Value::String(s),
            },
            Err(e) => Value::Bytes(e.into_bytes()),
        },
        mysql_async::Value::Int(i) => Value::Int64(i),
        mysql_async::Value::UInt(u) => {
            if u <= i64::MAX as u64 {
                Value::Int64(u as i64)
            } else {
                Value::String(u.to_string())
            }
        }
        mysql_async::Value::Float(f) => Value::Float64(f as f64),
        mysql_async::Value::Double(d) => Value::Float64(d),
        mysql_async::Value::Date(year, month, day, hour, min, sec, micro) => {
            if hour == 0 && min == 0 && sec == 0 && micro == 0 {
                chrono::NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
                    .map(Value::Date)
                    .unwrap_or_else(|| Value::String(format!("{year:04}-{month:02}-{day:02}")))
            } else {
                chrono::NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
                    .and_then(|d| d.and_hms_micro_opt(hour as u32, min as u32, sec as u32, micro))
                    .map(Value::DateTime)
                    .unwrap_or_else(|| {
                        Value::String(format!(
                            "{year:04}-{month:02}-{day:02} {hour:02}:{min:02}:{sec:02}"
                        ))
                    })
            }
        }
        mysql_async::Value::Time(negative, days, hours, mins, secs, micros) => {
            let total_hours = (days as u32) * 24 + (hours as u32);
            let sign = if negative { "-" } else { "" };
            Value::String(format!("{sign}{total_hours:02}:{mins:02}:{secs:02}.{micros:06}"))
        }
    }
}
