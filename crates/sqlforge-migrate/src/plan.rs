//! The canonical migration plan value.

use serde::{Deserialize, Serialize};
use sqlforge_core::{ColumnType, Dialect, Value};

/// A foreign-key reference inferred or declared for a column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKeyRef {
    pub table: String,
    pub column: String,
}

/// A column's default value, distinguishing "no default" from "default is
/// literal NULL".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnDefault {
    Absent,
    Literal(Value),
    /// A server-side expression, e.g. `CURRENT_TIMESTAMP` for the
    /// timestamps trait's `created_at`.
    Expression(String),
}

impl ColumnDefault {
    pub fn is_absent(&self) -> bool {
        matches!(self, ColumnDefault::Absent)
    }
}

/// A single column in a [`TablePlan`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnPlan {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
    pub default: ColumnDefault,
    pub unique: bool,
    pub primary_key: bool,
    pub references: Option<ForeignKeyRef>,
}

impl ColumnPlan {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: false,
            default: ColumnDefault::Absent,
            unique: false,
            primary_key: false,
            references: None,
        }
    }

    /// Structural equality for diffing purposes: enum value lists compare
    /// as sets, everything else compares directly.
    pub fn structurally_eq(&self, other: &ColumnPlan) -> bool {
        self.name == other.name
            && self.column_type.structurally_eq(&other.column_type)
            && self.nullable == other.nullable
            && self.default == other.default
            && self.unique == other.unique
            && self.primary_key == other.primary_key
            && self.references == other.references
    }
}

/// Kind of a composite index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexKind {
    Index,
    Unique,
}

/// A standalone index in a [`TablePlan`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexPlan {
    pub name: String,
    pub columns: Vec<String>,
    pub kind: IndexKind,
}

/// The plan for a single table: ordered columns and indexes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TablePlan {
    pub name: String,
    pub columns: Vec<ColumnPlan>,
    pub indexes: Vec<IndexPlan>,
}

impl TablePlan {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            indexes: Vec::new(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnPlan> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn index(&self, name: &str) -> Option<&IndexPlan> {
        self.indexes.iter().find(|i| i.name == name)
    }

    pub fn primary_key_column(&self) -> Option<&ColumnPlan> {
        self.columns.iter().find(|c| c.primary_key)
    }
}

/// A canonical, order-stable schema description derived from a model set
///.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationPlan {
    pub dialect: Dialect,
    pub tables: Vec<TablePlan>,
}

impl MigrationPlan {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            tables: Vec::new(),
        }
    }

    pub fn table(&self, name: &str) -> Option<&TablePlan> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Tables that reference, or are referenced by, `name` via a foreign
    /// key, plus `name` itself if present. Used by the diff emitter to
    /// order DDL around foreign-key dependencies.
    pub fn tables_touching(&self, name: &str) -> Vec<&TablePlan> {
        self.tables
            .iter()
            .filter(|t| {
                t.name == name
                    || t.columns
                        .iter()
                        .any(|c| c.references.as_ref().is_some_and(|r| r.table == name))
            })
            .collect()
    }
}
