//! SQLite type mapping, identifier quoting, and migrations-table DDL
//!.

use sqlforge_core::{
    ColumnType, ColumnTypeOptions, DatabaseDriver, Dialect, DriverCapabilities, JsonContainsMode,
};

/// SQLite [`DatabaseDriver`]: most textual types collapse to `TEXT`,
/// booleans to `INTEGER`, and enums to a `TEXT CHECK(col IN (...))`
/// constraint.
#[derive(Debug, Default)]
pub struct SqliteDriver;

impl SqliteDriver {
    pub fn new() -> Self {
        tracing::debug!("sqlite driver initialized");
        Self
    }
}

impl DatabaseDriver for SqliteDriver {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn capabilities(&self) -> DriverCapabilities {
        DriverCapabilities {
            supports_returning: true,
            supports_upsert: true,
            supports_cte: true,
            supports_window_functions: true,
            supports_savepoints: true,
            supports_advisory_locks: false,
            supports_named_enum_types: false,
            max_identifier_length: None,
        }
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{name}\"")
    }

    fn column_type_sql(&self, ty: &ColumnType, opts: &ColumnTypeOptions) -> String {
        match ty {
            ColumnType::String | ColumnType::Text => "TEXT".to_string(),
            ColumnType::Integer | ColumnType::BigInt => "INTEGER".to_string(),
            ColumnType::Float | ColumnType::Double => "REAL".to_string(),
            ColumnType::Decimal => match opts.precision {
                Some((precision, scale)) => format!("NUMERIC({precision},{scale})"),
                None => "NUMERIC".to_string(),
            },
            ColumnType::Boolean => "INTEGER".to_string(),
            ColumnType::Date => "TEXT".to_string(),
            ColumnType::DateTime => "TEXT".to_string(),
            ColumnType::Json => "TEXT".to_string(),
            // SQLite has no enum type; the `CHECK(col IN (...))` constraint
            // that pins down the value list is appended by the migration
            // planner's DDL emitter, which knows the column name this
            // method is never given.
            ColumnType::Enum(_) => "TEXT".to_string(),
        }
    }

    fn create_migrations_table(&self) -> String {
        "CREATE TABLE IF NOT EXISTS \"migrations\" (\
            \"id\" INTEGER PRIMARY KEY AUTOINCREMENT, \
            \"migration\" TEXT NOT NULL UNIQUE, \
            \"batch\" INTEGER, \
            \"executed_at\" TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP\
        )"
        .to_string()
    }

    fn get_executed_migrations_query(&self) -> String {
        "SELECT \"migration\" FROM \"migrations\" ORDER BY \"id\"".to_string()
    }

    fn record_migration_query(&self) -> String {
        "INSERT INTO \"migrations\" (\"migration\", \"batch\") VALUES (?, ?)".to_string()
    }

    fn drop_table(&self, name: &str) -> String {
        format!("DROP TABLE IF EXISTS {}", self.quote_identifier(name))
    }

    fn ilike_supported(&self) -> bool {
        false
    }

    fn random_function(&self) -> &'static str {
        "RANDOM()"
    }

    fn shared_lock_syntax(&self) -> Option<&'static str> {
        // SQLite has no row-level shared-lock clause; the whole database
        // file is locked by the active transaction instead.
        None
    }

    fn json_contains_operator(&self) -> JsonContainsMode {
        JsonContainsMode::JsonExtract
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enum_column_base_type_is_text() {
        let driver = SqliteDriver::new();
        let sql = driver.column_type_sql(
            &ColumnType::Enum(vec!["pending".into(), "completed".into()]),
            &ColumnTypeOptions::default(),
        );
        assert_eq!(sql, "TEXT");
    }

    #[test]
    fn boolean_maps_to_integer() {
        let driver = SqliteDriver::new();
        assert_eq!(
            driver.column_type_sql(&ColumnType::Boolean, &ColumnTypeOptions::default()),
            "INTEGER"
        );
    }

    #[test]
    fn placeholder_is_question_mark() {
        let driver = SqliteDriver::new();
        assert_eq!(driver.placeholder(1), "?");
        assert_eq!(driver.placeholder(2), "?");
    }
}
