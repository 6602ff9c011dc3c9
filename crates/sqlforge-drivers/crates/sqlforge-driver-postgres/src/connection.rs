//! PostgreSQL [`Connection`] and [`Transaction`] implementations.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::sync::Mutex;
use tokio_postgres::types::{FromSql, ToSql, Type};
use tokio_postgres::{CancelToken, Client, NoTls};

use sqlforge_core::connection::{Connection, IsolationLevel, QueryCancelHandle, Transaction};
use sqlforge_core::error::{Error, Result};
use sqlforge_core::transaction::savepoint::{Savepoint, SavepointSupport};
use sqlforge_core::value::{QueryResult, Row, StatementResult, Value};

fn format_postgres_error(error: &tokio_postgres::Error) -> String {
    let Some(db_error) = error.as_db_error() else {
        return error.to_string();
    };
    match db_error.code().code() {
        "23505" => format!("duplicate value violates unique constraint: {db_error}"),
        "23503" => format!("foreign key violation: {db_error}"),
        "23502" => format!("null value violates not-null constraint: {db_error}"),
        "40001" => format!("could not serialize access due to concurrent update: {db_error}"),
        "40P01" => format!("deadlock detected: {db_error}"),
        _ => db_error.to_string(),
    }
}

/// Interrupts a running PostgreSQL query from any thread via the server's
/// out-of-band cancel protocol.
pub struct PostgresCancelHandle {
    cancel_token: CancelToken,
}

impl QueryCancelHandle for PostgresCancelHandle {
    fn cancel(&self) {
        tracing::debug!("sending cancel request to postgres server");
        let cancel_token = self.cancel_token.clone();
        tokio::spawn(async move {
            if let Err(e) = cancel_token.cancel_query(NoTls).await {
                tracing::warn!(error = %e, "failed to cancel postgres query");
            }
        });
    }
}

/// PostgreSQL connection wrapper. Transactions are driven with raw
/// `BEGIN`/`COMMIT`/`ROLLBACK`/`SAVEPOINT` SQL over the same client handle
/// rather than tokio-postgres's borrow-scoped `Transaction` type, so the
/// same `Arc<Mutex<Client>>` can be shared between `Connection` and its
/// transactions.
pub struct PostgresConnection {
    client: Arc<Mutex<Client>>,
    cancel_token: CancelToken,
}

impl PostgresConnection {
    /// Connects using a `postgres://` connection string.
    pub async fn connect(dsn: &str) -> Result<Self> {
        tracing::info!("connecting to postgres");
        let (client, connection) = tokio_postgres::connect(dsn, NoTls)
            .await
            .map_err(|e| Error::Connection(format!("failed to connect to postgres: {e}")))?;

        let cancel_token = client.cancel_token();

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(error = %e, "postgres connection error");
            }
        });

        tracing::info!("postgres connection established");
        Ok(Self {
            client: Arc::new(Mutex::new(client)),
            cancel_token,
        })
    }
}

#[async_trait]
impl Connection for PostgresConnection {
    fn driver_name(&self) -> &str {
        "postgres"
    }

    #[tracing::instrument(skip(self, sql, params), fields(sql_preview = %sql.chars().take(100).collect::<String>()))]
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        let client = self.client.lock().await;
        run_execute(&client, sql, params).await
    }

    #[tracing::instrument(skip(self, sql, params), fields(sql_preview = %sql.chars().take(100).collect::<String>()))]
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let client = self.client.lock().await;
        run_query(&client, sql, params).await
    }

    fn cancel_handle(&self) -> Option<Arc<dyn QueryCancelHandle>> {
        Some(Arc::new(PostgresCancelHandle {
            cancel_token: self.cancel_token.clone(),
        }))
    }

    async fn begin_transaction(&self, isolation: IsolationLevel, read_only: bool) -> Result<Box<dyn Transaction>> {
        tracing::debug!(?isolation, read_only, "beginning postgres transaction");
        let client = self.client.lock().await;
        let begin_sql = match (isolation, read_only) {
            (IsolationLevel::ReadCommitted, false) => "BEGIN ISOLATION LEVEL READ COMMITTED",
            (IsolationLevel::RepeatableRead, false) => "BEGIN ISOLATION LEVEL REPEATABLE READ",
            (IsolationLevel::Serializable, false) => "BEGIN ISOLATION LEVEL SERIALIZABLE",
            (IsolationLevel::ReadCommitted, true) => "BEGIN ISOLATION LEVEL READ COMMITTED READ ONLY",
            (IsolationLevel::RepeatableRead, true) => "BEGIN ISOLATION LEVEL REPEATABLE READ READ ONLY",
            (IsolationLevel::Serializable, true) => "BEGIN ISOLATION LEVEL SERIALIZABLE READ ONLY",
        };
        client
            .execute(begin_sql, &[])
            .await
            .map_err(|e| Error::Driver(format!("failed to begin transaction: {}", format_postgres_error(&e))))?;
        drop(client);

        Ok(Box::new(PostgresTransaction {
            client: Arc::clone(&self.client),
            committed: false,
            rolled_back: false,
        }))
    }

    async fn advisory_lock(&self, key: i64) -> Result<()> {
        let client = self.client.lock().await;
        client
            .execute("SELECT pg_advisory_lock($1)", &[&key])
            .await
            .map_err(|e| Error::Driver(format_postgres_error(&e)))?;
        Ok(())
    }

    async fn try_advisory_lock(&self, key: i64) -> Result<bool> {
        let client = self.client.lock().await;
        let row = client
            .query_one("SELECT pg_try_advisory_lock($1)", &[&key])
            .await
            .map_err(|e| Error::Driver(format_postgres_error(&e)))?;
        Ok(row.get::<_, bool>(0))
    }

    async fn advisory_unlock(&self, key: i64) -> Result<()> {
        let client = self.client.lock().await;
        client
            .execute("SELECT pg_advisory_unlock($1)", &[&key])
            .await
            .map_err(|e| Error::Driver(format_postgres_error(&e)))?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.client.try_lock().map(|c| c.is_closed()).unwrap_or(false)
    }
}

/// Raw `COMMIT`/`ROLLBACK`/`SAVEPOINT` driven transaction sharing the
/// connection's client handle.
pub struct PostgresTransaction {
    client: Arc<Mutex<Client>>,
    committed: bool,
    rolled_back: bool,
}

impl Drop for PostgresTransaction {
    fn drop(&mut self) {
        if !self.committed && !self.rolled_back {
            tracing::warn!("postgres transaction dropped without commit or rollback");
        }
    }
}

#[async_trait]
impl Transaction for PostgresTransaction {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        let client = self.client.lock().await;
        run_execute(&client, sql, params).await
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let client = self.client.lock().await;
        run_query(&client, sql, params).await
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        if self.rolled_back {
            return Err(Error::Driver("transaction already rolled back".into()));
        }
        if self.committed {
            return Err(Error::Driver("transaction already committed".into()));
        }
        let client = self.client.lock().await;
        client
            .execute("COMMIT", &[])
            .await
            .map_err(|e| Error::Driver(format!("failed to commit transaction: {}", format_postgres_error(&e))))?;
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
        let client = self.client.lock().await;
        client
            .execute("ROLLBACK", &[])
            .await
            .map_err(|e| Error::Driver(format!("failed to roll back transaction: {}", format_postgres_error(&e))))?;
        self.rolled_back = true;
        Ok(())
    }
}

#[async_trait]
impl SavepointSupport for PostgresTransaction {
    async fn savepoint(&self, name: &str) -> Result<Savepoint> {
        let client = self.client.lock().await;
        client
            .execute(&format!("SAVEPOINT \"{name}\""), &[])
            .await
            .map_err(|e| Error::Driver(format_postgres_error(&e)))?;
        Ok(Savepoint::new(name))
    }

    async fn rollback_to_savepoint(&self, name: &str) -> Result<()> {
        let client = self.client.lock().await;
        client
            .execute(&format!("ROLLBACK TO SAVEPOINT \"{name}\""), &[])
            .await
            .map_err(|e| Error::Driver(format_postgres_error(&e)))?;
        Ok(())
    }

    async fn release_savepoint(&self, name: &str) -> Result<()> {
        let client = self.client.lock().await;
        client
            .execute(&format!("RELEASE SAVEPOINT \"{name}\""), &[])
            .await
            .map_err(|e| Error::Driver(format_postgres_error(&e)))?;
        Ok(())
    }
}

async fn run_execute(client: &Client, sql: &str, params: &[Value]) -> Result<StatementResult> {
    let start = std::time::Instant::now();
    let statement = client
        .prepare(sql)
        .await
        .map_err(|e| Error::Driver(format!("failed to prepare statement: {}", format_postgres_error(&e))))?;
    let pg_params = bind_params(params, statement.params());
    let param_refs: Vec<&(dyn ToSql + Sync)> = pg_params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();

    let affected_rows = client
        .execute(&statement, &param_refs)
        .await
        .map_err(|e| Error::Driver(format!("failed to execute statement: {}", format_postgres_error(&e))))?;

    Ok(StatementResult {
        affected_rows,
        last_insert_id: None,
        execution_time_ms: start.elapsed().as_millis() as u64,
    })
}

async fn run_query(client: &Client, sql: &str, params: &[Value]) -> Result<QueryResult> {
    let start = std::time::Instant::now();
    let statement = client
        .prepare(sql)
        .await
        .map_err(|e| Error::Driver(format!("failed to prepare query: {}", format_postgres_error(&e))))?;
    let pg_params = bind_params(params, statement.params());
    let param_refs: Vec<&(dyn ToSql + Sync)> = pg_params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();

    let pg_rows = client
        .query(&statement, &param_refs)
        .await
        .map_err(|e| Error::Driver(format!("failed to execute query: {}", format_postgres_error(&e))))?;

    let columns: Vec<String> = statement
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();

    let rows = pg_rows
        .iter()
        .map(|pg_row| {
            let values = (0..columns.len())
                .map(|i| pg_value_to_value(pg_row, i))
                .collect::<Result<Vec<_>>>()?;
            Ok(Row::new(columns.clone(), values))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(QueryResult {
        columns,
        rows,
        execution_time_ms: start.elapsed().as_millis() as u64,
    })
}

/// Owned value wrapper implementing `ToSql` for every [`Value`] variant, so
/// parameters can be bound without tokio-postgres's generic param slices
/// requiring uniform concrete types.
#[derive(Debug)]
enum PgValue {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    String(String),
    Bytes(Vec<u8>),
    Uuid(uuid::Uuid),
    Json(serde_json::Value),
    Date(chrono::NaiveDate),
    Time(chrono::NaiveTime),
    DateTime(chrono::NaiveDateTime),
    DateTimeUtc(chrono::DateTime<chrono::Utc>),
}

fn bind_params(values: &[Value], param_types: &[Type]) -> Vec<PgValue> {
    values
        .iter()
        .enumerate()
        .map(|(i, value)| match value {
            Value::Null => PgValue::Null,
            Value::Bool(v) => PgValue::Bool(*v),
            Value::Int32(v) => match param_types.get(i) {
                Some(&Type::INT8) => PgValue::Int64(*v as i64),
                _ => PgValue::Int32(*v),
            },
            Value::Int64(v) => PgValue::Int64(*v),
            Value::Float64(v) => PgValue::Float64(*v),
            Value::Decimal(v) => PgValue::String(v.clone()),
            Value::String(v) => PgValue::String(v.clone()),
            Value::Bytes(v) => PgValue::Bytes(v.clone()),
            Value::Uuid(v) => PgValue::Uuid(*v),
            Value::Json(v) => PgValue::Json(v.clone()),
            Value::Date(v) => PgValue::Date(*v),
            Value::Time(v) => PgValue::Time(*v),
            Value::DateTime(v) => PgValue::DateTime(*v),
            Value::DateTimeUtc(v) => PgValue::DateTimeUtc(*v),
            Value::Array(items) => PgValue::String(
                items
                    .iter()
                    .map(|v| v.to_string())
                    .collect::<Vec<_>>()
                    .join(","),
            ),
        })
        .collect()
}

impl ToSql for PgValue {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> std::result::Result<postgres_types::IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self {
            PgValue::Null => Ok(postgres_types::IsNull::Yes),
            PgValue::Bool(v) => v.to_sql(ty, out),
            PgValue::Int32(v) => v.to_sql(ty, out),
            PgValue::Int64(v) => v.to_sql(ty, out),
            PgValue::Float64(v) => v.to_sql(ty, out),
            PgValue::String(v) => v.to_sql(ty, out),
            PgValue::Bytes(v) => v.to_sql(ty, out),
            PgValue::Uuid(v) => v.to_sql(ty, out),
            PgValue::Json(v) => v.to_sql(ty, out),
            PgValue::Date(v) => v.to_sql(ty, out),
            PgValue::Time(v) => v.to_sql(ty, out),
            PgValue::DateTime(v) => v.to_sql(ty, out),
            PgValue::DateTimeUtc(v) => v.to_sql(ty, out),
        }
    }

    fn accepts(_: &Type) -> bool {
        true
    }

    postgres_types::to_sql_checked!();
}

/// Decodes a PostgreSQL NUMERIC wire value (the `numeric` binary format)
/// into its canonical decimal text representation.
struct PgNumericText(String);

impl<'a> FromSql<'a> for PgNumericText {
    fn from_sql(_: &Type, raw: &'a [u8]) -> std::result::Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        if raw.len() < 8 {
            return Err("invalid NUMERIC payload: too short".into());
        }
        let ndigits = i16::from_be_bytes([raw[0], raw[1]]) as usize;
        let weight = i16::from_be_bytes([raw[2], raw[3]]);
        let sign = u16::from_be_bytes([raw[4], raw[5]]);
        let dscale = i16::from_be_bytes([raw[6], raw[7]]) as usize;

        if sign == 0xC000 {
            return Ok(Self("NaN".to_string()));
        }
        if raw.len() < 8 + ndigits * 2 {
            return Err("invalid NUMERIC payload: truncated digits".into());
        }

        let digits: Vec<u16> = (0..ndigits)
            .map(|i| u16::from_be_bytes([raw[8 + i * 2], raw[9 + i * 2]]))
            .collect();

        let integer_group_count = if weight >= 0 { (weight as usize) + 1 } else { 0 };
        let mut integer_text = String::new();
        if integer_group_count == 0 {
            integer_text.push('0');
        } else {
            for i in 0..integer_group_count {
                let group = digits.get(i).copied().unwrap_or(0);
                if i == 0 {
                    integer_text.push_str(&group.to_string());
                } else {
                    integer_text.push_str(&format!("{group:04}"));
                }
            }
        }

        let mut fraction_text = String::new();
        if dscale > 0 {
            for group in digits.iter().skip(integer_group_count) {
                fraction_text.push_str(&format!("{group:04}"));
            }
            fraction_text.truncate(dscale.max(fraction_text.len()));
            while fraction_text.len() < dscale {
                fraction_text.push('0');
            }
        }

        let mut output = String::new();
        if sign == 0x4000 && integer_text != "0" {
            output.push('-');
        }
        output.push_str(&integer_text);
        if !fraction_text.is_empty() {
            output.push('.');
            output.push_str(&fraction_text);
        }
        Ok(Self(output))
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

fn pg_value_to_value(row: &tokio_postgres::Row, idx: usize) -> Result<Value> {
    let column = &row.columns()[idx];
    let value = match *column.type_() {
        Type::BOOL => row
            .try_get::<_, Option<bool>>(idx)
            .map_err(|e| Error::Driver(e.to_string()))?
            .map(Value::Bool)
            .unwrap_or(Value::Null),
        Type::INT2 => row
            .try_get::<_, Option<i16>>(idx)
            .map_err(|e| Error::Driver(e.to_string()))?
            .map(|v| Value::Int32(v as i32))
            .unwrap_or(Value::Null),
        Type::INT4 => row
            .try_get::<_, Option<i32>>(idx)
            .map_err(|e| Error::Driver(e.to_string()))?
            .map(Value::Int32)
            .unwrap_or(Value::Null),
        Type::INT8 => row
            .try_get::<_, Option<i64>>(idx)
            .map_err(|e| Error::Driver(e.to_string()))?
            .map(Value::Int64)
            .unwrap_or(Value::Null),
        Type::FLOAT4 => row
            .try_get::<_, Option<f32>>(idx)
            .map_err(|e| Error::Driver(e.to_string()))?
            .map(|v| Value::Float64(v as f64))
            .unwrap_or(Value::Null),
        Type::FLOAT8 => row
            .try_get::<_, Option<f64>>(idx)
            .map_err(|e| Error::Driver(e.to_string()))?
            .map(Value::Float64)
            .unwrap_or(Value::Null),
        Type::NUMERIC => row
            .try_get::<_, Option<PgNumericText>>(idx)
            .map_err(|e| Error::Driver(e.to_string()))?
            .map(|v| Value::Decimal(v.0))
            .unwrap_or(Value::Null),
        Type::JSON | Type::JSONB => row
            .try_get::<_, Option<serde_json::Value>>(idx)
            .map_err(|e| Error::Driver(e.to_string()))?
            .map(Value::Json)
            .unwrap_or(Value::Null),
        Type::UUID => row
            .try_get::<_, Option<uuid::Uuid>>(idx)
            .map_err(|e| Error::Driver(e.to_string()))?
            .map(Value::Uuid)
            .unwrap_or(Value::Null),
        Type::DATE => row
            .try_get::<_, Option<chrono::NaiveDate>>(idx)
            .map_err(|e| Error::Driver(e.to_string()))?
            .map(Value::Date)
            .unwrap_or(Value::Null),
        Type::TIME => row
            .try_get::<_, Option<chrono::NaiveTime>>(idx)
            .map_err(|e| Error::Driver(e.to_string()))?
            .map(Value::Time)
            .unwrap_or(Value::Null),
        Type::TIMESTAMP => row
            .try_get::<_, Option<chrono::NaiveDateTime>>(idx)
            .map_err(|e| Error::Driver(e.to_string()))?
            .map(Value::DateTime)
            .unwrap_or(Value::Null),
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(idx)
            .map_err(|e| Error::Driver(e.to_string()))?
            .map(Value::DateTimeUtc)
            .unwrap_or(Value::Null),
        Type::BYTEA => row
            .try_get::<_, Option<Vec<u8>>>(idx)
            .map_err(|e| Error::Driver(e.to_string()))?
            .map(Value::Bytes)
            .unwrap_or(Value::Null),
        _ => row
            .try_get::<_, Option<String>>(idx)
            .map_err(|e| Error::Driver(e.to_string()))?
            .map(Value::String)
            .unwrap_or(Value::Null),
    };
    Ok(value)
}
