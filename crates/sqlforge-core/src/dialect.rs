//! The `DatabaseDriver` trait: the uniform interface dialect drivers
//! implement so the rest of the workspace never hardcodes per-dialect logic.

use serde::{Deserialize, Serialize};

use crate::column_type::ColumnType;

/// The three dialects this workspace targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Postgres,
    MySql,
    Sqlite,
}

impl Dialect {
    pub fn id(&self) -> &'static str {
        match self {
            Dialect::Postgres => "postgres",
            Dialect::MySql => "mysql",
            Dialect::Sqlite => "sqlite",
        }
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id())
    }
}

/// Options that influence how a canonical [`ColumnType`] is rendered to SQL
/// by a given dialect (e.g. whether a `string` gets a length bound).
#[derive(Debug, Clone, Default)]
pub struct ColumnTypeOptions {
    /// `VARCHAR(n)` length for `ColumnType::String`; dialects fall back to a
    /// sensible default (255) when absent.
    pub length: Option<u32>,
    /// Precision/scale for `ColumnType::Decimal`, e.g. `(10, 2)`.
    pub precision: Option<(u32, u32)>,
    /// Name to use for a PostgreSQL `CREATE TYPE ... AS ENUM` declaration.
    pub enum_type_name: Option<String>,
}

/// Capabilities a driver exposes to callers that need to branch generically
/// instead of matching on [`Dialect`] everywhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct DriverCapabilities {
    pub supports_returning: bool,
    pub supports_upsert: bool,
    pub supports_cte: bool,
    pub supports_window_functions: bool,
    pub supports_savepoints: bool,
    pub supports_advisory_locks: bool,
    pub supports_named_enum_types: bool,
    pub max_identifier_length: Option<usize>,
}

/// The uniform dialect interface consumed by the migration planner and the
/// select/DML compilers.
pub trait DatabaseDriver: Send + Sync {
    /// Unique identifier, e.g. `"postgres"`.
    fn id(&self) -> &'static str {
        self.dialect().id()
    }

    fn dialect(&self) -> Dialect;

    /// Declared capability flags.
    fn capabilities(&self) -> DriverCapabilities;

    /// Wraps a pre-validated identifier in the dialect's quoting style
    /// (`"x"` for Postgres/SQLite, `` `x` `` for MySQL).
    fn quote_identifier(&self, name: &str) -> String;

    /// Maps a canonical [`ColumnType`] to this dialect's SQL spelling.
    fn column_type_sql(&self, ty: &ColumnType, opts: &ColumnTypeOptions) -> String;

    /// DDL for the migrations tracking table.
    fn create_migrations_table(&self) -> String;

    /// SQL to list already-applied permanent migrations, ordered by id.
    fn get_executed_migrations_query(&self) -> String;

    /// SQL (with one positional placeholder for the migration name, and a
    /// second for the batch number) to record a migration as applied.
    fn record_migration_query(&self) -> String;

    /// `DROP TABLE` DDL for the given (already-validated) table name.
    fn drop_table(&self, name: &str) -> String;

    /// `DROP TYPE` DDL for a named enum type, where the dialect supports
    /// them (PostgreSQL). Other dialects return `None`.
    fn drop_enum_type(&self, _name: &str) -> Option<String> {
        None
    }

    /// Whether native `ILIKE` is available (Postgres); other dialects fall
    /// back to `LOWER(col) LIKE LOWER(?)`.
    fn ilike_supported(&self) -> bool;

    /// The dialect's random-ordering function, e.g. `RANDOM()` / `RAND()`.
    fn random_function(&self) -> &'static str;

    /// Syntax for a shared (read) lock clause, e.g. `FOR SHARE` / `LOCK IN
    /// SHARE MODE`. `None` when unsupported.
    fn shared_lock_syntax(&self) -> Option<&'static str>;

    /// The JSON "contains" operator/function family used by JSON path
    /// predicates, e.g. `@>`, `JSON_CONTAINS`, or `json_extract`.
    fn json_contains_operator(&self) -> JsonContainsMode;

    /// Positional placeholder for the `n`th (1-indexed) bound parameter.
    fn placeholder(&self, position: usize) -> String {
        match self.dialect() {
            Dialect::Postgres => format!("${position}"),
            Dialect::MySql | Dialect::Sqlite => "?".to_string(),
        }
    }
}

/// How a dialect expresses a JSON-containment predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonContainsMode {
    /// PostgreSQL's native `@>` operator.
    NativeOperator,
    /// MySQL's `JSON_CONTAINS(col, value)`.
    JsonContains,
    /// SQLite's `json_extract(col, path) = value`.
    JsonExtract,
}
