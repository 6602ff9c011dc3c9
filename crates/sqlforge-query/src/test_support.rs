//! Minimal in-crate driver stand-ins so this crate's tests don't need a
//! dependency on the concrete driver crates (which pull in async database
//! client libraries), mirroring `sqlforge-migrate`'s `sqlforge_driver_stub`
//! test module.

#![cfg(test)]

use std::sync::Arc;

use sqlforge_core::{
    ColumnType, ColumnTypeOptions, DatabaseDriver, Dialect, DriverCapabilities, JsonContainsMode,
};

macro_rules! stub_driver {
    ($name:ident, $dialect:expr, $quote_open:expr, $quote_close:expr, $ilike:expr, $random:expr, $shared_lock:expr, $json_mode:expr) => {
        #[derive(Debug, Default)]
        pub struct $name;
        impl DatabaseDriver for $name {
            fn dialect(&self) -> Dialect {
                $dialect
            }
            fn capabilities(&self) -> DriverCapabilities {
                DriverCapabilities {
                    supports_returning: true,
                    supports_upsert: true,
                    supports_cte: true,
                    supports_window_functions: true,
                    supports_savepoints: true,
                    supports_advisory_locks: matches!($dialect, Dialect::Postgres),
                    supports_named_enum_types: matches!($dialect, Dialect::Postgres),
                    max_identifier_length: Some(63),
                }
            }
            fn quote_identifier(&self, name: &str) -> String {
                format!("{}{}{}", $quote_open, name, $quote_close)
            }
            fn column_type_sql(&self, ty: &ColumnType, _opts: &ColumnTypeOptions) -> String {
                ty.name().to_uppercase()
            }
            fn create_migrations_table(&self) -> String {
                String::new()
            }
            fn get_executed_migrations_query(&self) -> String {
                String::new()
            }
            fn record_migration_query(&self) -> String {
                String::new()
            }
            fn drop_table(&self, name: &str) -> String {
                format!("DROP TABLE {}{}{}", $quote_open, name, $quote_close)
            }
            fn ilike_supported(&self) -> bool {
                $ilike
            }
            fn random_function(&self) -> &'static str {
                $random
            }
            fn shared_lock_syntax(&self) -> Option<&'static str> {
                $shared_lock
            }
            fn json_contains_operator(&self) -> JsonContainsMode {
                $json_mode
            }
        }
    };
}

stub_driver!(
    PostgresStub,
    Dialect::Postgres,
    '"',
    '"',
    true,
    "RANDOM()",
    Some("FOR SHARE"),
    JsonContainsMode::NativeOperator
);
stub_driver!(
    MySqlStub,
    Dialect::MySql,
    '`',
    '`',
    false,
    "RAND()",
    Some("LOCK IN SHARE MODE"),
    JsonContainsMode::JsonContains
);
stub_driver!(
    SqliteStub,
    Dialect::Sqlite,
    '"',
    '"',
    false,
    "RANDOM()",
    None,
    JsonContainsMode::JsonExtract
);

/// Returns a boxed stub driver for `dialect`, for use in this crate's unit
/// tests only.
pub fn stub_driver(dialect: Dialect) -> Arc<dyn DatabaseDriver> {
    match dialect {
        Dialect::Postgres => Arc::new(PostgresStub),
        Dialect::MySql => Arc::new(MySqlStub),
        Dialect::Sqlite => Arc::new(SqliteStub),
    }
}
