//! Query-layer errors: wraps [`sqlforge_core::Error`] plus variants specific
//! to the select/DML compilers, execution layer, and transaction core
//!.

use thiserror::Error;

use sqlforge_schema::SchemaError;

/// Errors raised while composing or executing a query.
#[derive(Error, Debug)]
pub enum QueryError {
    #[error(transparent)]
    Core(#[from] sqlforge_core::Error),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("unknown column {column:?} on table {table:?}")]
    UnknownColumn { table: String, column: String },

    #[error("invalid operator {0:?}")]
    InvalidOperator(String),

    #[error("builder misuse: {0}")]
    BuilderState(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{attempts} attempt(s) exhausted, last error: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<QueryError>,
    },

    #[error("savepoint used outside an active transaction")]
    SavepointOutsideTransaction,

    #[error("dump and die: {0}")]
    DumpAndDie(String),
}

impl QueryError {
    /// Stable machine-readable code, extending [`sqlforge_core::Error::code`]
    /// for query-layer-specific variants.
    pub fn code(&self) -> &'static str {
        match self {
            QueryError::Core(err) => err.code(),
            QueryError::Schema(err) => match err {
                SchemaError::UnknownRelation { .. } => "EBQBUNKNOWNRELATION",
                SchemaError::CircularRelationship { .. } => "EBQBCIRCULAR",
                SchemaError::MaxDepthExceeded { .. } => "EBQBMAXDEPTH",
                SchemaError::MaxEagerLoadExceeded { .. } => "EBQBMAXEAGERLOAD",
                _ => "EBQBSCHEMA",
            },
            QueryError::UnknownColumn { .. } => "EBQBUNKNOWNCOLUMN",
            QueryError::InvalidOperator(_) => "EBQBOPERATOR",
            QueryError::BuilderState(_) => "EBQBSTATE",
            QueryError::NotFound(_) => "EBQBNOTFOUND",
            QueryError::RetriesExhausted { .. } => "EBQBRETRIESEXHAUSTED",
            QueryError::SavepointOutsideTransaction => "EBQBSAVEPOINTSTATE",
            QueryError::DumpAndDie(_) => "EBQBDUMPANDDIE",
        }
    }

    /// Whether this error should trigger a transaction retry: either a
    /// retriable driver message or an explicit SQL-state match.
    pub fn is_retriable(&self, sql_states: &[String]) -> bool {
        match self {
            QueryError::Core(sqlforge_core::Error::Driver(message)) => {
                sqlforge_core::Error::is_retriable_message(message)
                    || sql_states.iter().any(|state| message.contains(state.as_str()))
            }
            QueryError::Core(sqlforge_core::Error::Connection(message)) => {
                sqlforge_core::Error::is_retriable_message(message)
            }
            _ => false,
        }
    }
}

/// Result type alias for the query layer.
pub type Result<T> = std::result::Result<T, QueryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retriable_driver_message_detected() {
        let err = QueryError::Core(sqlforge_core::Error::Driver("deadlock detected".into()));
        assert!(err.is_retriable(&[]));
    }

    #[test]
    fn non_retriable_message_rejected() {
        let err = QueryError::Core(sqlforge_core::Error::Driver("syntax error".into()));
        assert!(!err.is_retriable(&[]));
    }

    #[test]
    fn explicit_sql_state_is_retriable() {
        let err = QueryError::Core(sqlforge_core::Error::Driver("ERROR 40P01".into()));
        assert!(err.is_retriable(&["40P01".to_string()]));
    }
}
