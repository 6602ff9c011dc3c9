//! Migration planner errors: wraps [`sqlforge_schema::SchemaError`] plus
//! planning-only variants.

use thiserror::Error;

use sqlforge_schema::SchemaError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("foreign key on {table}.{column} references unknown table/column {ref_table}.{ref_column}")]
    DanglingForeignKey {
        table: String,
        column: String,
        ref_table: String,
        ref_column: String,
    },

    #[error("duplicate index name {name:?} on table {table:?}")]
    DuplicateIndexName { table: String, name: String },

    #[error("duplicate column name {column:?} on table {table:?}")]
    DuplicateColumnName { table: String, column: String },

    #[error("table {table:?} declares more than one primary key column")]
    MultiplePrimaryKeys { table: String },

    #[error("invalid identifier {name:?} in {context}")]
    InvalidIdentifier { name: String, context: String },
}

impl From<sqlforge_core::Error> for PlanError {
    fn from(err: sqlforge_core::Error) -> Self {
        match err {
            sqlforge_core::Error::InvalidIdentifier { name, context } => {
                PlanError::InvalidIdentifier { name, context }
            }
            other => PlanError::InvalidIdentifier {
                name: other.to_string(),
                context: "migration planner".to_string(),
            },
        }
    }
}
