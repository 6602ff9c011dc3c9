//! PostgreSQL type mapping, identifier quoting, and migrations-table DDL
//!.

use sqlforge_core::{
    ColumnType, ColumnTypeOptions, DatabaseDriver, Dialect, DriverCapabilities, JsonContainsMode,
};

/// PostgreSQL [`DatabaseDriver`]: enums become named `CREATE TYPE ... AS
/// ENUM` declarations, JSON maps to `jsonb`, and positional placeholders
/// are `$1`, `$2`, ....
#[derive(Debug, Default)]
pub struct PostgresDriver;

impl PostgresDriver {
    pub fn new() -> Self {
        tracing::debug!("postgres driver initialized");
        Self
    }
}

impl DatabaseDriver for PostgresDriver {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn capabilities(&self) -> DriverCapabilities {
        DriverCapabilities {
            supports_returning: true,
            supports_upsert: true,
            supports_cte: true,
            supports_window_functions: true,
            supports_savepoints: true,
            supports_advisory_locks: true,
            supports_named_enum_types: true,
            max_identifier_length: Some(63),
        }
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{name}\"")
    }

    fn column_type_sql(&self, ty: &ColumnType, opts: &ColumnTypeOptions) -> String {
        match ty {
            ColumnType::String => match opts.length {
                Some(length) => format!("VARCHAR({length})"),
                None => "VARCHAR(255)".to_string(),
            },
            ColumnType::Text => "TEXT".to_string(),
            ColumnType::Integer => "INTEGER".to_string(),
            ColumnType::BigInt => "BIGINT".to_string(),
            ColumnType::Float => "REAL".to_string(),
            ColumnType::Double => "DOUBLE PRECISION".to_string(),
            ColumnType::Decimal => match opts.precision {
                Some((precision, scale)) => format!("NUMERIC({precision},{scale})"),
                None => "NUMERIC".to_string(),
            },
            ColumnType::Boolean => "BOOLEAN".to_string(),
            ColumnType::Date => "DATE".to_string(),
            ColumnType::DateTime => "TIMESTAMP".to_string(),
            ColumnType::Json => "JSONB".to_string(),
            // The value list was already declared via a separate `CREATE
            // TYPE ... AS ENUM` statement emitted by the migration planner
            //; the
            // column definition references that type by name.
            ColumnType::Enum(_) => opts
                .enum_type_name
                .clone()
                .unwrap_or_else(|| "TEXT".to_string()),
        }
    }

    fn create_migrations_table(&self) -> String {
        "CREATE TABLE IF NOT EXISTS \"migrations\" (\
            \"id\" BIGSERIAL PRIMARY KEY, \
            \"migration\" TEXT NOT NULL UNIQUE, \
            \"batch\" INTEGER, \
            \"executed_at\" TIMESTAMPTZ NOT NULL DEFAULT NOW()\
        )"
        .to_string()
    }

    fn get_executed_migrations_query(&self) -> String {
        "SELECT \"migration\" FROM \"migrations\" ORDER BY \"id\"".to_string()
    }

    fn record_migration_query(&self) -> String {
        "INSERT INTO \"migrations\" (\"migration\", \"batch\") VALUES ($1, $2)".to_string()
    }

    fn drop_table(&self, name: &str) -> String {
        format!("DROP TABLE IF EXISTS {}", self.quote_identifier(name))
    }

    fn drop_enum_type(&self, name: &str) -> Option<String> {
        Some(format!("DROP TYPE IF EXISTS {}", self.quote_identifier(name)))
    }

    fn ilike_supported(&self) -> bool {
        true
    }

    fn random_function(&self) -> &'static str {
        "RANDOM()"
    }

    fn shared_lock_syntax(&self) -> Option<&'static str> {
        Some("FOR SHARE")
    }

    fn json_contains_operator(&self) -> JsonContainsMode {
        JsonContainsMode::NativeOperator
    }
}
