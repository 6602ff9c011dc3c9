//! sqlforge-query - the Select/DML compilers, execution layer, transaction
//! core, and query cache.
//!
//! This crate is the consumer end of the dependency order: it
//! builds on `sqlforge-core` (dialect drivers, the driver abstraction,
//! identifier validation) and `sqlforge-schema` (model definitions, the
//! metadata graph) to compose parameterised SQL and run it.
//!
//! - [`select::SelectBuilder`] - fluent SELECT composition (§4.4)
//! - [`dml`] - INSERT/UPDATE/DELETE builders and convenience helpers (§4.5)
//! - [`execution`] - hook dispatch, cancellation, timeout, caching (§4.6)
//! - [`transaction`] - retrying transactions, savepoints, advisory locks (§4.7)
//! - [`cache::QueryCache`] - the bounded TTL read-result cache (§4.8)
//! - [`condition`] - the where-clause normaliser shared by select and DML (§4.4)

pub mod cache;
pub mod condition;
pub mod config;
pub mod dml;
pub mod error;
pub mod execution;
pub mod param;
pub mod registry;
pub mod select;
#[cfg(test)]
pub(crate) mod test_support;
pub mod transaction;

pub use cache::QueryCache;
pub use condition::{Condition, Conjunction, DynamicJoin, Op, RValue};
pub use config::{BackoffConfig, Config, HooksConfig, TransactionDefaults};
pub use dml::{find_or_fail, first_or_create, save, update_or_create, DeleteBuilder, InsertBuilder, UpdateBuilder};
pub use error::{QueryError, Result};
pub use execution::{abort_channel, AbortHandle, AbortSignal, ExecOptions, Executor};
pub use param::ParamBinder;
pub use registry::SoftDeleteRegistry;
pub use select::SelectBuilder;
pub use transaction::{
    advisory_lock, advisory_unlock, run_distributed, run_with_fresh_connection, savepoint,
    transaction, try_advisory_lock, ConnectionFactory, ConnectionHandle, TransactionOptions,
};
