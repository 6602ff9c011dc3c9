//! sqlforge-core - shared traits and types for the query compiler and
//! migration engine.
//!
//! This crate defines the fundamental abstractions that every other
//! sqlforge crate programs against:
//!
//! - [`Value`] / [`Row`] / [`QueryResult`] / [`StatementResult`] - driver-agnostic data
//! - [`Connection`] / [`Transaction`] / [`SavepointSupport`] - the driver contract (§6)
//! - [`DatabaseDriver`] / [`Dialect`] - per-dialect SQL generation (§4.2)
//! - [`ColumnType`] - the canonical (dialect-independent) column type
//! - identifier validation (§4.9)
//! - [`Error`] - the shared error taxonomy (§7)

pub mod column_type;
pub mod connection;
pub mod dialect;
pub mod error;
pub mod identifier;
pub mod transaction;
pub mod value;

pub use column_type::ColumnType;
pub use connection::{
    advisory_lock_key, Connection, IsolationLevel, QueryCancelHandle, Transaction,
};
pub use dialect::{ColumnTypeOptions, DatabaseDriver, Dialect, DriverCapabilities, JsonContainsMode};
pub use error::{Error, Result};
pub use identifier::{is_valid_identifier, validate_identifier};
pub use transaction::savepoint::{Savepoint, SavepointSupport};
pub use value::{QueryResult, Row, StatementResult, Value};
