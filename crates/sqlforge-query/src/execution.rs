//! Execution layer: runs a finalised statement against the
//! driver, firing lifecycle hooks, racing a timeout/abort, and consulting
//! the query cache.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use sqlforge_core::{Connection, QueryCancelHandle, QueryResult, StatementResult, Transaction, Value};
use tokio::sync::watch;

use crate::cache::{cache_key, QueryCache};
use crate::config::{Config, QueryEndEvent, QueryErrorEvent, QueryKind, QueryStartEvent};
use crate::error::{QueryError, Result};

/// Unifies a live connection and an open transaction behind one
/// `execute`/`query` surface, so the execution layer and every compiler can
/// run against either without duplicating dispatch logic.
///
/// `Copy` because it only ever holds a shared reference, which lets
/// pagination's `chunk`/`chunkById` loop reuse the same executor across many
/// page fetches without the caller juggling reborrows.
#[derive(Clone, Copy)]
pub enum Executor<'a> {
    Connection(&'a dyn Connection),
    Transaction(&'a dyn Transaction),
}

impl<'a> Executor<'a> {
    pub async fn execute(&self, sql: &str, params: &[Value]) -> sqlforge_core::Result<StatementResult> {
        match self {
            Executor::Connection(c) => c.execute(sql, params).await,
            Executor::Transaction(t) => t.execute(sql, params).await,
        }
    }

    pub async fn query(&self, sql: &str, params: &[Value]) -> sqlforge_core::Result<QueryResult> {
        match self {
            Executor::Connection(c) => c.query(sql, params).await,
            Executor::Transaction(t) => t.query(sql, params).await,
        }
    }

    /// A handle that can interrupt the query currently running through this
    /// executor, if the underlying driver supports cancellation. Open
    /// transactions don't expose one: cancelling mid-transaction is the
    /// caller's to manage via rollback, not the execution layer's.
    pub fn cancel_handle(&self) -> Option<Arc<dyn QueryCancelHandle>> {
        match self {
            Executor::Connection(c) => c.cancel_handle(),
            Executor::Transaction(_) => None,
        }
    }
}

/// An abort signal external callers can trip to cancel an in-flight
/// execution.
#[derive(Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
}

pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

impl AbortHandle {
    pub fn abort(&self) {
        let _ = self.tx.send(true);
    }
}

pub fn abort_channel() -> (AbortHandle, AbortSignal) {
    let (tx, rx) = watch::channel(false);
    (AbortHandle { tx }, AbortSignal { rx })
}

impl AbortSignal {
    async fn tripped(&mut self) {
        loop {
            if *self.rx.borrow() {
                return;
            }
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Per-call execution options.
#[derive(Default, Clone)]
pub struct ExecOptions {
    pub timeout: Option<Duration>,
    pub abort: Option<AbortSignal>,
    pub cache_ttl: Option<Duration>,
}

/// Runs `sql`/`params` as a row-returning query through `executor`, with the
/// full observable pipeline: start hook, span, timeout/abort race,
/// end/error hook, optional cache lookup/fill.
pub async fn run_query(
    executor: Executor<'_>,
    config: &Config,
    cache: Option<&QueryCache>,
    sql: &str,
    params: &[Value],
    kind: QueryKind,
    options: ExecOptions,
) -> Result<QueryResult> {
    if let (Some(cache), Some(_ttl)) = (cache, options.cache_ttl) {
        if let Some(cached) = cache.get(&cache_key(sql, params)) {
            return Ok(cached);
        }
    }

    fire_start_hook(config, sql, kind);
    let span = tracing::info_span!("sqlforge_query", kind = ?kind);
    let _entered = span.enter();
    let started = Instant::now();

    let result = race(
        executor.query(sql, params),
        options.timeout,
        options.abort.clone(),
        executor.cancel_handle(),
    )
    .await;

    let duration_ms = started.elapsed().as_millis() as u64;

    match result {
        Ok(Ok(rows)) => {
            fire_end_hook(config, sql, duration_ms, Some(rows.row_count()), kind);
            if let (Some(cache), Some(ttl)) = (cache, options.cache_ttl) {
                cache.set(cache_key(sql, params), rows.clone(), ttl);
            }
            Ok(rows)
        }
        Ok(Err(core_err)) => {
            let err = QueryError::from(core_err);
            fire_error_hook(config, sql, &err, duration_ms, kind);
            Err(err)
        }
        Err(timeout_err) => {
            fire_error_hook(config, sql, &timeout_err, duration_ms, kind);
            Err(timeout_err)
        }
    }
}

/// Runs `sql`/`params` as a mutating statement, same pipeline
/// as [`run_query`] minus caching.
pub async fn run_statement(
    executor: Executor<'_>,
    config: &Config,
    sql: &str,
    params: &[Value],
    kind: QueryKind,
    options: ExecOptions,
) -> Result<StatementResult> {
    fire_start_hook(config, sql, kind);
    let span = tracing::info_span!("sqlforge_query", kind = ?kind);
    let _entered = span.enter();
    let started = Instant::now();

    let result = race(
        executor.execute(sql, params),
        options.timeout,
        options.abort.clone(),
        executor.cancel_handle(),
    )
    .await;

    let duration_ms = started.elapsed().as_millis() as u64;

    match result {
        Ok(Ok(affected)) => {
            fire_end_hook(config, sql, duration_ms, None, kind);
            Ok(affected)
        }
        Ok(Err(core_err)) => {
            let err = QueryError::from(core_err);
            fire_error_hook(config, sql, &err, duration_ms, kind);
            Err(err)
        }
        Err(timeout_err) => {
            fire_error_hook(config, sql, &timeout_err, duration_ms, kind);
            Err(timeout_err)
        }
    }
}

async fn race<T>(
    fut: impl Future<Output = sqlforge_core::Result<T>>,
    timeout: Option<Duration>,
    abort: Option<AbortSignal>,
    cancel_handle: Option<Arc<dyn QueryCancelHandle>>,
) -> std::result::Result<sqlforge_core::Result<T>, QueryError> {
    tokio::pin!(fut);
    match (timeout, abort) {
        (None, None) => Ok(fut.await),
        (Some(duration), None) => match tokio::time::timeout(duration, fut).await {
            Ok(result) => Ok(result),
            Err(_) => {
                if let Some(handle) = &cancel_handle {
                    handle.cancel();
                }
                Err(QueryError::Core(sqlforge_core::Error::Timeout(format!(
                    "query exceeded {duration:?}"
                ))))
            }
        },
        (None, Some(mut signal)) => tokio::select! {
            result = &mut fut => Ok(result),
            _ = signal.tripped() => {
                if let Some(handle) = &cancel_handle {
                    handle.cancel();
                }
                Err(QueryError::Core(sqlforge_core::Error::Aborted(
                    "query aborted by caller".to_string(),
                )))
            }
        },
        (Some(duration), Some(mut signal)) => {
            let sleep = tokio::time::sleep(duration);
            tokio::pin!(sleep);
            tokio::select! {
                result = &mut fut => Ok(result),
                _ = &mut sleep => {
                    if let Some(handle) = &cancel_handle {
                        handle.cancel();
                    }
                    Err(QueryError::Core(sqlforge_core::Error::Timeout(format!(
                        "query exceeded {duration:?}"
                    ))))
                }
                _ = signal.tripped() => {
                    if let Some(handle) = &cancel_handle {
                        handle.cancel();
                    }
                    Err(QueryError::Core(sqlforge_core::Error::Aborted(
                        "query aborted by caller".to_string(),
                    )))
                }
            }
        }
    }
}

fn fire_start_hook(config: &Config, sql: &str, kind: QueryKind) {
    if let Some(hook) = &config.hooks.on_query_start {
        hook(&QueryStartEvent { sql, kind });
    }
}

fn fire_end_hook(config: &Config, sql: &str, duration_ms: u64, row_count: Option<usize>, kind: QueryKind) {
    if let Some(hook) = &config.hooks.on_query_end {
        hook(&QueryEndEvent {
            sql,
            duration_ms,
            row_count,
            kind,
        });
    }
}

fn fire_error_hook(config: &Config, sql: &str, error: &QueryError, duration_ms: u64, kind: QueryKind) {
    if let Some(hook) = &config.hooks.on_query_error {
        hook(&QueryErrorEvent {
            sql,
            error,
            duration_ms,
            kind,
        });
    }
}

/// `dd()` debug helper: logs the composed SQL and parameters at
/// error level and returns a [`QueryError::DumpAndDie`], matching the
/// teacher's pattern of terminal debug escapes that abort the caller.
pub fn dump_and_die(config: &Config, sql: &str, params: &[Value]) -> QueryError {
    if config.debug.capture_text {
        tracing::error!(sql, ?params, "dd(): dump and die");
    } else {
        tracing::error!("dd(): dump and die");
    }
    QueryError::DumpAndDie(sql.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlforge_core::{Error as CoreError, Row};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct StubConnection {
        calls: AtomicU32,
    }

    #[async_trait::async_trait]
    impl Connection for StubConnection {
        fn driver_name(&self) -> &str {
            "stub"
        }

        async fn execute(&self, _sql: &str, _params: &[Value]) -> sqlforge_core::Result<StatementResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(StatementResult {
                affected_rows: 1,
                last_insert_id: None,
                execution_time_ms: 0,
            })
        }

        async fn query(&self, _sql: &str, _params: &[Value]) -> sqlforge_core::Result<QueryResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(QueryResult {
                columns: vec!["id".to_string()],
                rows: vec![Row::new(vec!["id".to_string()], vec![Value::Int64(1)])],
                execution_time_ms: 0,
            })
        }

        async fn begin_transaction(
            &self,
            _isolation: sqlforge_core::IsolationLevel,
            _read_only: bool,
        ) -> sqlforge_core::Result<Box<dyn Transaction>> {
            Err(CoreError::NotSupported("transactions".into()))
        }

        async fn close(&self) -> sqlforge_core::Result<()> {
            Ok(())
        }

        fn is_closed(&self) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn successful_query_runs_once_and_fires_hooks() {
        let conn = StubConnection {
            calls: AtomicU32::new(0),
        };
        let config = Config::default();
        let result = run_query(
            Executor::Connection(&conn),
            &config,
            None,
            "SELECT 1",
            &[],
            QueryKind::Select,
            ExecOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(result.row_count(), 1);
        assert_eq!(conn.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cache_hit_skips_driver_call() {
        let conn = StubConnection {
            calls: AtomicU32::new(0),
        };
        let config = Config::default();
        let cache = QueryCache::new(10);
        let options = ExecOptions {
            cache_ttl: Some(Duration::from_secs(60)),
            ..Default::default()
        };
        run_query(
            Executor::Connection(&conn),
            &config,
            Some(&cache),
            "SELECT 1",
            &[],
            QueryKind::Select,
            options.clone(),
        )
        .await
        .unwrap();
        run_query(
            Executor::Connection(&conn),
            &config,
            Some(&cache),
            "SELECT 1",
            &[],
            QueryKind::Select,
            options,
        )
        .await
        .unwrap();
        assert_eq!(conn.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cache_keys_on_params_not_just_sql_text() {
        struct CountingConnection {
            calls: AtomicU32,
        }

        #[async_trait::async_trait]
        impl Connection for CountingConnection {
            fn driver_name(&self) -> &str {
                "stub"
            }

            async fn execute(&self, _sql: &str, _params: &[Value]) -> sqlforge_core::Result<StatementResult> {
                unreachable!()
            }

            async fn query(&self, _sql: &str, params: &[Value]) -> sqlforge_core::Result<QueryResult> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Ok(QueryResult {
                    columns: vec!["id".to_string()],
                    rows: vec![Row::new(vec!["id".to_string()], vec![params[0].clone()])],
                    execution_time_ms: 0,
                })
            }

            async fn begin_transaction(
                &self,
                _isolation: sqlforge_core::IsolationLevel,
            ) -> sqlforge_core::Result<Box<dyn Transaction>> {
                Err(CoreError::NotSupported("transactions".into()))
            }

            async fn close(&self) -> sqlforge_core::Result<()> {
                Ok(())
            }

            fn is_closed(&self) -> bool {
                false
            }
        }

        let conn = CountingConnection {
            calls: AtomicU32::new(0),
        };
        let config = Config::default();
        let cache = QueryCache::new(10);
        let options = ExecOptions {
            cache_ttl: Some(Duration::from_secs(60)),
            ..Default::default()
        };
        let first = run_query(
            Executor::Connection(&conn),
            &config,
            Some(&cache),
            "SELECT * FROM users WHERE id = $1",
            &[Value::Int64(1)],
            QueryKind::Select,
            options.clone(),
        )
        .await
        .unwrap();
        let second = run_query(
            Executor::Connection(&conn),
            &config,
            Some(&cache),
            "SELECT * FROM users WHERE id = $1",
            &[Value::Int64(2)],
            QueryKind::Select,
            options,
        )
        .await
        .unwrap();
        assert_eq!(conn.calls.load(Ordering::SeqCst), 2);
        assert_eq!(first.rows[0].get(0), Some(&Value::Int64(1)));
        assert_eq!(second.rows[0].get(0), Some(&Value::Int64(2)));
    }

    #[tokio::test]
    async fn abort_signal_cancels_in_flight_query() {
        struct SlowConnection;

        #[async_trait::async_trait]
        impl Connection for SlowConnection {
            fn driver_name(&self) -> &str {
                "slow"
            }

            async fn execute(&self, _sql: &str, _params: &[Value]) -> sqlforge_core::Result<StatementResult> {
                unreachable!()
            }

            async fn query(&self, _sql: &str, _params: &[Value]) -> sqlforge_core::Result<QueryResult> {
                tokio::time::sleep(Duration::from_secs(5)).await;
                unreachable!()
            }

            async fn begin_transaction(
                &self,
                _isolation: sqlforge_core::IsolationLevel,
            ) -> sqlforge_core::Result<Box<dyn Transaction>> {
                Err(CoreError::NotSupported("transactions".into()))
            }

            async fn close(&self) -> sqlforge_core::Result<()> {
                Ok(())
            }

            fn is_closed(&self) -> bool {
                false
            }
        }

        let conn = SlowConnection;
        let config = Config::default();
        let (handle, signal) = abort_channel();
        let options = ExecOptions {
            abort: Some(signal),
            ..Default::default()
        };
        let fut = run_query(
            Executor::Connection(&conn),
            &config,
            None,
            "SELECT pg_sleep(5)",
            &[],
            QueryKind::Select,
            options,
        );
        tokio::pin!(fut);
        handle.abort();
        let err = fut.await.unwrap_err();
        assert_eq!(err.code(), "EBQBABORT");
    }
}
