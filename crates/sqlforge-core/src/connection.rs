//! The driver abstraction: a single capability set the rest of the
//! workspace programs against, never surfacing driver-specific types
//!.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::Result;
use crate::transaction::savepoint::SavepointSupport;
use crate::value::{QueryResult, StatementResult, Value};

/// Handle for cancelling a running query from any thread.
///
/// Safe to call from any thread and idempotent: a second call after the
/// query already finished (or was already cancelled) is a no-op.
pub trait QueryCancelHandle: Send + Sync {
    fn cancel(&self);
}

/// Transaction isolation levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

/// A live database connection.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Driver identifier, e.g. `"postgres"`.
    fn driver_name(&self) -> &str;

    /// Execute a statement that modifies data (INSERT/UPDATE/DELETE/DDL).
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult>;

    /// Execute a query that returns rows (SELECT).
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult>;

    /// A cancellation handle for the query currently running on this
    /// connection, if the driver supports cancellation.
    fn cancel_handle(&self) -> Option<Arc<dyn QueryCancelHandle>> {
        None
    }

    /// Begin a transaction. `read_only` is a hint enforced by the driver
    /// (native `READ ONLY` syntax where the dialect has it); callers must
    /// not assume writes inside a read-only transaction fail uniformly
    /// across drivers that lack enforcement.
    async fn begin_transaction(
        &self,
        isolation: IsolationLevel,
        read_only: bool,
    ) -> Result<Box<dyn Transaction>>;

    /// Begin a distributed (two-phase commit) transaction under `name`.
    async fn begin_distributed(&self, _name: &str) -> Result<()> {
        Err(crate::error::Error::NotSupported(
            "distributed transactions".into(),
        ))
    }

    /// Commit a previously-begun distributed transaction.
    async fn commit_distributed(&self, _name: &str) -> Result<()> {
        Err(crate::error::Error::NotSupported(
            "distributed transactions".into(),
        ))
    }

    /// Roll back a previously-begun distributed transaction.
    async fn rollback_distributed(&self, _name: &str) -> Result<()> {
        Err(crate::error::Error::NotSupported(
            "distributed transactions".into(),
        ))
    }

    /// Acquire a PostgreSQL advisory lock, blocking until available.
    async fn advisory_lock(&self, _key: i64) -> Result<()> {
        Err(crate::error::Error::NotSupported("advisory locks".into()))
    }

    /// Attempt to acquire a PostgreSQL advisory lock without blocking.
    async fn try_advisory_lock(&self, _key: i64) -> Result<bool> {
        Err(crate::error::Error::NotSupported("advisory locks".into()))
    }

    /// Release a PostgreSQL advisory lock previously acquired on this
    /// connection.
    async fn advisory_unlock(&self, _key: i64) -> Result<()> {
        Err(crate::error::Error::NotSupported("advisory locks".into()))
    }

    /// Close the connection.
    async fn close(&self) -> Result<()>;

    /// Whether the connection has already been closed.
    fn is_closed(&self) -> bool;
}

/// An open transaction. Statements executed through it run in order;
/// [`Transaction::commit`] or [`Transaction::rollback`] ends it exactly once.
///
/// Savepoint support is a supertrait rather than a downcast because every
/// driver's transaction implements it, and the transaction-retry core needs
/// to call `savepoint()` generically over `Box<dyn Transaction>`.
#[async_trait]
pub trait Transaction: Send + Sync + SavepointSupport {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult>;

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Hashes a string key to a 32-bit integer for PostgreSQL advisory locks,
/// which only take integer keys.
pub fn advisory_lock_key(name: &str) -> i64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    name.hash(&mut hasher);
    (hasher.finish() as i64) & 0x7fff_ffff
}
