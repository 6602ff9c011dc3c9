//! Transaction Core: runs a caller-supplied function inside a
//! database transaction with retries, plus the savepoint, distributed
//! transaction, and advisory lock pass-throughs that share its plumbing.
//!
//! The retry loop is the one piece of this crate that owns a connection
//! across multiple driver round-trips rather than composing a single
//! textual statement, so unlike the select/DML builders it is a set of
//! free functions over [`Executor`] rather than a builder type.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::RwLock;
use rand::Rng;

use sqlforge_core::{advisory_lock_key, Connection, IsolationLevel, SavepointSupport, Transaction};

use crate::config::{
    AfterCommitHook, AfterRollbackHook, BackoffConfig, Config, RetryHook, RollbackHook,
};
use crate::error::{QueryError, Result};
use crate::execution::Executor;

/// Per-call overrides for [`transaction`], seeded from
/// [`crate::config::TransactionDefaults`] and narrowed by the caller (spec
/// §4.7 "Options").
#[derive(Clone)]
pub struct TransactionOptions {
    pub retries: u32,
    pub isolation: IsolationLevel,
    pub read_only: bool,
    pub sql_states: Vec<String>,
    pub backoff: BackoffConfig,
    pub on_retry: Option<RetryHook>,
    pub after_commit: Option<AfterCommitHook>,
    pub on_rollback: Option<RollbackHook>,
    pub after_rollback: Option<AfterRollbackHook>,
}

impl TransactionOptions {
    /// Seeds options from `config.transaction_defaults`/`config.hooks`,
    /// the "configured defaults, overridable per call" pattern used
    /// throughout this crate (e.g. `ExecOptions` vs. `.cache(ttl)`).
    pub fn from_config(config: &Config) -> Self {
        let defaults = &config.transaction_defaults;
        Self {
            retries: defaults.retries,
            isolation: defaults.isolation,
            read_only: defaults.read_only,
            sql_states: defaults.sql_states.clone(),
            backoff: defaults.backoff,
            on_retry: config.hooks.on_retry.clone(),
            after_commit: config.hooks.after_commit.clone(),
            on_rollback: config.hooks.on_rollback.clone(),
            after_rollback: config.hooks.after_rollback.clone(),
        }
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = isolation;
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn sql_states(mut self, sql_states: Vec<String>) -> Self {
        self.sql_states = sql_states;
        self
    }

    pub fn backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn on_retry(mut self, hook: RetryHook) -> Self {
        self.on_retry = Some(hook);
        self
    }

    pub fn after_commit(mut self, hook: AfterCommitHook) -> Self {
        self.after_commit = Some(hook);
        self
    }

    pub fn on_rollback(mut self, hook: RollbackHook) -> Self {
        self.on_rollback = Some(hook);
        self
    }

    pub fn after_rollback(mut self, hook: AfterRollbackHook) -> Self {
        self.after_rollback = Some(hook);
        self
    }
}

/// Delay before retry attempt `n` (1-based: the first retry is `n = 1`),
/// `min(maxMs, baseMs * factor^(n-1))` reduced by up to `jitter` fraction
///.
fn backoff_delay(backoff: &BackoffConfig, n: u32) -> Duration {
    let raw = backoff.base_ms as f64 * backoff.factor.powi(n as i32 - 1);
    let capped = raw.min(backoff.max_ms as f64).max(0.0);
    let jitter = if backoff.jitter > 0.0 {
        1.0 - rand::thread_rng().gen_range(0.0..backoff.jitter)
    } else {
        1.0
    };
    Duration::from_millis((capped * jitter).round() as u64)
}

/// Runs `f` inside a transaction opened on `connection`, retrying on a
/// retriable failure up to `options.retries` times with backoff between
/// attempts.
///
/// `fn` runs to completion before commit or rollback: a single coroutine
/// per attempt, no overlapping attempts.
pub async fn transaction<T, F>(
    connection: &dyn Connection,
    options: &TransactionOptions,
    f: F,
) -> Result<T>
where
    F: for<'a> Fn(Executor<'a>) -> BoxFuture<'a, Result<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        if attempt > 1 {
            let delay = backoff_delay(&options.backoff, attempt - 1);
            tokio::time::sleep(delay).await;
        }

        let tx = connection
            .begin_transaction(options.isolation, options.read_only)
            .await
            .map_err(QueryError::Core)?;

        match f(Executor::Transaction(tx.as_ref())).await {
            Ok(value) => {
                tx.commit().await.map_err(QueryError::Core)?;
                if let Some(hook) = &options.after_commit {
                    hook();
                }
                return Ok(value);
            }
            Err(err) => {
                if let Some(hook) = &options.on_rollback {
                    hook(&err);
                }
                tx.rollback().await.map_err(QueryError::Core)?;
                if let Some(hook) = &options.after_rollback {
                    hook();
                }

                let retriable = err.is_retriable(&options.sql_states);
                if retriable && attempt <= options.retries {
                    tracing::warn!(attempt, error = %err, "retrying transaction after retriable error");
                    if let Some(hook) = &options.on_retry {
                        hook(attempt, &err);
                    }
                    continue;
                }

                return Err(if attempt > 1 {
                    QueryError::RetriesExhausted {
                        attempts: attempt,
                        source: Box::new(err),
                    }
                } else {
                    err
                });
            }
        }
    }
}

/// Runs `f` inside a savepoint: must be called
/// with an `Executor::Transaction`, since a savepoint only makes sense
/// nested inside an already-open transaction. A failure inside `f` rolls
/// back to the savepoint only, leaving the enclosing transaction open for
/// the caller to retry or continue.
pub async fn savepoint<T, F>(executor: Executor<'_>, name: &str, f: F) -> Result<T>
where
    F: for<'a> FnOnce(Executor<'a>) -> BoxFuture<'a, Result<T>>,
{
    let tx = match executor {
        Executor::Transaction(tx) => tx,
        Executor::Connection(_) => return Err(QueryError::SavepointOutsideTransaction),
    };

    tx.savepoint(name).await.map_err(QueryError::Core)?;

    match f(Executor::Transaction(tx)).await {
        Ok(value) => {
            tx.release_savepoint(name).await.map_err(QueryError::Core)?;
            Ok(value)
        }
        Err(err) => {
            tx.rollback_to_savepoint(name).await.map_err(QueryError::Core)?;
            Err(err)
        }
    }
}

/// Opens a named distributed (two-phase commit) transaction, runs `f`, and
/// commits or rolls it back based on the outcome. Pass-through to the driver; most drivers reject this
/// with [`sqlforge_core::Error::NotSupported`].
pub async fn run_distributed<T, F>(connection: &dyn Connection, name: &str, f: F) -> Result<T>
where
    F: for<'a> FnOnce() -> BoxFuture<'a, Result<T>>,
{
    connection
        .begin_distributed(name)
        .await
        .map_err(QueryError::Core)?;

    match f().await {
        Ok(value) => {
            connection
                .commit_distributed(name)
                .await
                .map_err(QueryError::Core)?;
            Ok(value)
        }
        Err(err) => {
            connection
                .rollback_distributed(name)
                .await
                .map_err(QueryError::Core)?;
            Err(err)
        }
    }
}

/// Blocking PostgreSQL advisory lock keyed by an arbitrary string, hashed
/// with [`advisory_lock_key`].
pub async fn advisory_lock(connection: &dyn Connection, key: &str) -> Result<()> {
    connection
        .advisory_lock(advisory_lock_key(key))
        .await
        .map_err(QueryError::Core)
}

/// Non-blocking variant of [`advisory_lock`]; returns whether the lock was
/// acquired.
pub async fn try_advisory_lock(connection: &dyn Connection, key: &str) -> Result<bool> {
    connection
        .try_advisory_lock(advisory_lock_key(key))
        .await
        .map_err(QueryError::Core)
}

/// Releases a previously-acquired advisory lock.
pub async fn advisory_unlock(connection: &dyn Connection, key: &str) -> Result<()> {
    connection
        .advisory_unlock(advisory_lock_key(key))
        .await
        .map_err(QueryError::Core)
}

/// Produces a fresh live [`Connection`] on demand, re-created when the
/// dialect or database name in configuration changes.
pub type ConnectionFactory =
    Arc<dyn Fn() -> BoxFuture<'static, sqlforge_core::Result<Box<dyn Connection>>> + Send + Sync>;

/// Lazily-created, swappable connection handle: the active
/// handle is created on first use by [`ConnectionHandle::get`] and
/// transparently re-created by [`run_with_fresh_connection`] after a
/// connection-closed error.
pub struct ConnectionHandle {
    factory: ConnectionFactory,
    current: RwLock<Option<Arc<dyn Connection>>>,
}

impl ConnectionHandle {
    pub fn new(factory: ConnectionFactory) -> Self {
        Self {
            factory,
            current: RwLock::new(None),
        }
    }

    /// Returns the current connection, creating one on first use.
    pub async fn get(&self) -> Result<Arc<dyn Connection>> {
        if let Some(conn) = self.current.read().clone() {
            return Ok(conn);
        }
        self.recreate().await
    }

    /// Discards the current connection (if any) and creates a new one.
    pub async fn recreate(&self) -> Result<Arc<dyn Connection>> {
        let conn: Arc<dyn Connection> = Arc::from((self.factory)().await.map_err(QueryError::Core)?);
        *self.current.write() = Some(conn.clone());
        Ok(conn)
    }
}

/// Runs `f` against the handle's current connection; if it fails with a
/// connection-closed error, re-creates the handle and retries the block
/// exactly once.
pub async fn run_with_fresh_connection<T, F>(handle: &ConnectionHandle, f: F) -> Result<T>
where
    F: for<'a> Fn(&'a dyn Connection) -> BoxFuture<'a, Result<T>>,
{
    let conn = handle.get().await?;
    match f(conn.as_ref()).await {
        Ok(value) => Ok(value),
        Err(err) if is_connection_closed(&err) => {
            let conn = handle.recreate().await?;
            f(conn.as_ref()).await
        }
        Err(err) => Err(err),
    }
}

fn is_connection_closed(err: &QueryError) -> bool {
    matches!(
        err,
        QueryError::Core(sqlforge_core::Error::Connection(message))
            if sqlforge_core::Error::is_connection_closed_message(message)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use sqlforge_core::{Error as CoreError, QueryResult, Savepoint, StatementResult, Value};

    struct StubTransaction {
        commits: AtomicU32,
        rollbacks: AtomicU32,
    }

    #[async_trait::async_trait]
    impl SavepointSupport for StubTransaction {
        async fn savepoint(&self, name: &str) -> sqlforge_core::Result<Savepoint> {
            Ok(Savepoint::new(name))
        }
        async fn rollback_to_savepoint(&self, _name: &str) -> sqlforge_core::Result<()> {
            Ok(())
        }
        async fn release_savepoint(&self, _name: &str) -> sqlforge_core::Result<()> {
            Ok(())
        }
    }

    #[async_trait::async_trait]
    impl Transaction for StubTransaction {
        async fn execute(&self, _sql: &str, _params: &[Value]) -> sqlforge_core::Result<StatementResult> {
            unreachable!()
        }
        async fn query(&self, _sql: &str, _params: &[Value]) -> sqlforge_core::Result<QueryResult> {
            unreachable!()
        }
        async fn commit(self: Box<Self>) -> sqlforge_core::Result<()> {
            self.commits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn rollback(self: Box<Self>) -> sqlforge_core::Result<()> {
            self.rollbacks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct StubConnection {
        begins: AtomicU32,
        last_read_only: AtomicU32,
    }

    #[async_trait::async_trait]
    impl Connection for StubConnection {
        fn driver_name(&self) -> &str {
            "stub"
        }
        async fn execute(&self, _sql: &str, _params: &[Value]) -> sqlforge_core::Result<StatementResult> {
            unreachable!()
        }
        async fn query(&self, _sql: &str, _params: &[Value]) -> sqlforge_core::Result<QueryResult> {
            unreachable!()
        }
        async fn begin_transaction(
            &self,
            _isolation: IsolationLevel,
            read_only: bool,
        ) -> sqlforge_core::Result<Box<dyn Transaction>> {
            self.begins.fetch_add(1, Ordering::SeqCst);
            self.last_read_only.store(read_only as u32, Ordering::SeqCst);
            Ok(Box::new(StubTransaction {
                commits: AtomicU32::new(0),
                rollbacks: AtomicU32::new(0),
            }))
        }
        async fn close(&self) -> sqlforge_core::Result<()> {
            Ok(())
        }
        fn is_closed(&self) -> bool {
            false
        }
    }

    fn options(retries: u32) -> TransactionOptions {
        TransactionOptions {
            retries,
            isolation: IsolationLevel::ReadCommitted,
            read_only: false,
            sql_states: vec![],
            backoff: BackoffConfig {
                base_ms: 1,
                factor: 2.0,
                max_ms: 50,
                jitter: 0.0,
            },
            on_retry: None,
            after_commit: None,
            on_rollback: None,
            after_rollback: None,
        }
    }

    #[tokio::test]
    async fn commits_on_success() {
        let conn = StubConnection {
            begins: AtomicU32::new(0),
            last_read_only: AtomicU32::new(0),
        };
        let result = transaction(&conn, &options(0), |_exec| {
            Box::pin(async { Ok::<_, QueryError>(42) })
        })
        .await
        .unwrap();
        assert_eq!(result, 42);
        assert_eq!(conn.begins.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn read_only_option_is_passed_to_begin_transaction() {
        let conn = StubConnection {
            begins: AtomicU32::new(0),
            last_read_only: AtomicU32::new(0),
        };
        let opts = options(0).read_only(true);
        transaction(&conn, &opts, |_exec| Box::pin(async { Ok::<_, QueryError>(()) }))
            .await
            .unwrap();
        assert_eq!(conn.last_read_only.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_on_deadlock_then_succeeds() {
        let conn = StubConnection {
            begins: AtomicU32::new(0),
            last_read_only: AtomicU32::new(0),
        };
        let failures_left = AtomicU32::new(2);
        let retry_count = Arc::new(AtomicU32::new(0));
        let mut opts = options(2);
        let retry_count_hook = retry_count.clone();
        opts.on_retry = Some(Arc::new(move |_attempt, _err| {
            retry_count_hook.fetch_add(1, Ordering::SeqCst);
        }));

        let result = transaction(&conn, &opts, |_exec| {
            Box::pin(async {
                if failures_left.fetch_sub(1, Ordering::SeqCst) > 0 {
                    Err(QueryError::Core(CoreError::Driver("deadlock detected".into())))
                } else {
                    Ok::<_, QueryError>("ok")
                }
            })
        })
        .await
        .unwrap();

        assert_eq!(result, "ok");
        assert_eq!(conn.begins.load(Ordering::SeqCst), 3);
        assert_eq!(retry_count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn exhausts_retries_and_surfaces_final_error() {
        let conn = StubConnection {
            begins: AtomicU32::new(0),
            last_read_only: AtomicU32::new(0),
        };
        let result = transaction(&conn, &options(1), |_exec| {
            Box::pin(async {
                Err::<(), _>(QueryError::Core(CoreError::Driver("deadlock detected".into())))
            })
        })
        .await;

        match result {
            Err(QueryError::RetriesExhausted { attempts, .. }) => assert_eq!(attempts, 2),
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_retriable_error_fails_immediately() {
        let conn = StubConnection {
            begins: AtomicU32::new(0),
            last_read_only: AtomicU32::new(0),
        };
        let result = transaction(&conn, &options(5), |_exec| {
            Box::pin(async { Err::<(), _>(QueryError::Core(CoreError::Driver("syntax error".into()))) })
        })
        .await;
        assert!(matches!(result, Err(QueryError::Core(_))));
        assert_eq!(conn.begins.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn savepoint_outside_transaction_rejected() {
        let conn = StubConnection {
            begins: AtomicU32::new(0),
            last_read_only: AtomicU32::new(0),
        };
        let result = savepoint(Executor::Connection(&conn), "sp1", |_exec| {
            Box::pin(async { Ok::<_, QueryError>(()) })
        })
        .await;
        assert!(matches!(result, Err(QueryError::SavepointOutsideTransaction)));
    }

    #[test]
    fn backoff_delay_grows_and_caps() {
        let backoff = BackoffConfig {
            base_ms: 10,
            factor: 2.0,
            max_ms: 30,
            jitter: 0.0,
        };
        assert_eq!(backoff_delay(&backoff, 1), Duration::from_millis(10));
        assert_eq!(backoff_delay(&backoff, 2), Duration::from_millis(20));
        assert_eq!(backoff_delay(&backoff, 3), Duration::from_millis(30));
        assert_eq!(backoff_delay(&backoff, 4), Duration::from_millis(30));
    }

    #[test]
    fn connection_closed_error_detected() {
        let err = QueryError::Core(CoreError::Connection("connection closed".into()));
        assert!(is_connection_closed(&err));
        let err = QueryError::Core(CoreError::Driver("deadlock detected".into()));
        assert!(!is_connection_closed(&err));
    }
}
