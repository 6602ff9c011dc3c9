//! Errors raised while building or querying the schema metadata graph.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("table {table:?} is declared by more than one model ({first_model:?} and {second_model:?})")]
    DuplicateTable {
        table: String,
        first_model: String,
        second_model: String,
    },

    #[error("unknown relation {relation:?} on table {table:?}; available: {}", suggestions.join(", "))]
    UnknownRelation {
        table: String,
        relation: String,
        suggestions: Vec<String>,
    },

    #[error("circular relationship detected while joining {path}")]
    CircularRelationship { path: String },

    #[error("maximum eager-load depth ({max}) exceeded while resolving {path}")]
    MaxDepthExceeded { max: usize, path: String },

    #[error("maximum eager-load count ({max}) exceeded")]
    MaxEagerLoadExceeded { max: usize },

    #[error("cannot infer a column type for attribute {attribute:?} on model {model:?}")]
    CannotInferType { model: String, attribute: String },

    #[error("invalid identifier {name:?} in {context}")]
    InvalidIdentifier { name: String, context: String },
}

impl From<sqlforge_core::Error> for SchemaError {
    fn from(err: sqlforge_core::Error) -> Self {
        match err {
            sqlforge_core::Error::InvalidIdentifier { name, context } => {
                SchemaError::InvalidIdentifier { name, context }
            }
            other => SchemaError::InvalidIdentifier {
                name: other.to_string(),
                context: "schema".to_string(),
            },
        }
    }
}
