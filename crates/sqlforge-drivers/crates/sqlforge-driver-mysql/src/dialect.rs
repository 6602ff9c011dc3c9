//! MySQL type mapping, identifier quoting, and migrations-table DDL
//!.

use sqlforge_core::{
    ColumnType, ColumnTypeOptions, DatabaseDriver, Dialect, DriverCapabilities, JsonContainsMode,
};

/// MySQL [`DatabaseDriver`]: enums are rendered inline as `ENUM(...)`
/// (MySQL has no standalone enum type), booleans collapse to
/// `TINYINT(1)`, and positional placeholders are all `?`.
#[derive(Debug, Default)]
pub struct MySqlDriver;

impl MySqlDriver {
    pub fn new() -> Self {
        tracing::debug!("mysql driver initialized");
        Self
    }
}

impl DatabaseDriver for MySqlDriver {
    fn dialect(&self) -> Dialect {
        Dialect::MySql
    }

    fn capabilities(&self) -> DriverCapabilities {
        DriverCapabilities {
            supports_returning: false,
            supports_upsert: true,
            supports_cte: true,
            supports_window_functions: true,
            supports_savepoints: true,
            supports_advisory_locks: false,
            supports_named_enum_types: false,
            max_identifier_length: Some(64),
        }
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("`{name}`")
    }

    fn column_type_sql(&self, ty: &ColumnType, opts: &ColumnTypeOptions) -> String {
        match ty {
            ColumnType::String => match opts.length {
                Some(length) => format!("VARCHAR({length})"),
                None => "VARCHAR(255)".to_string(),
            },
            ColumnType::Text => "TEXT".to_string(),
            ColumnType::Integer => "INT".to_string(),
            ColumnType::BigInt => "BIGINT".to_string(),
            ColumnType::Float => "FLOAT".to_string(),
            ColumnType::Double => "DOUBLE".to_string(),
            ColumnType::Decimal => match opts.precision {
                Some((precision, scale)) => format!("DECIMAL({precision},{scale})"),
                None => "DECIMAL(10,2)".to_string(),
            },
            ColumnType::Boolean => "TINYINT(1)".to_string(),
            ColumnType::Date => "DATE".to_string(),
            ColumnType::DateTime => "DATETIME".to_string(),
            ColumnType::Json => "JSON".to_string(),
            ColumnType::Enum(values) => {
                let quoted = values
                    .iter()
                    .map(|v| format!("'{}'", v.replace('\'', "''")))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("ENUM({quoted})")
            }
        }
    }

    fn create_migrations_table(&self) -> String {
        "CREATE TABLE IF NOT EXISTS `migrations` (\
            `id` BIGINT AUTO_INCREMENT PRIMARY KEY, \
            `migration` VARCHAR(255) NOT NULL UNIQUE, \
            `batch` INT, \
            `executed_at` TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP\
        )"
        .to_string()
    }

    fn get_executed_migrations_query(&self) -> String {
        "SELECT `migration` FROM `migrations` ORDER BY `id`".to_string()
    }

    fn record_migration_query(&self) -> String {
        "INSERT INTO `migrations` (`migration`, `batch`) VALUES (?, ?)".to_string()
    }

    fn drop_table(&self, name: &str) -> String {
        format!("DROP TABLE IF EXISTS {}", self.quote_identifier(name))
    }

    fn ilike_supported(&self) -> bool {
        false
    }

    fn random_function(&self) -> &'static str {
        "RAND()"
    }

    fn shared_lock_syntax(&self) -> Option<&'static str> {
        Some("LOCK IN SHARE MODE")
    }

    fn json_contains_operator(&self) -> JsonContainsMode {
        JsonContainsMode::JsonContains
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enum_renders_inline_value_list() {
        let driver = MySqlDriver::new();
        let sql = driver.column_type_sql(
            &ColumnType::Enum(vec!["pending".into(), "shipped".into()]),
            &ColumnTypeOptions::default(),
        );
        assert_eq!(sql, "ENUM('pending', 'shipped')");
    }

    #[test]
    fn boolean_maps_to_tinyint() {
        let driver = MySqlDriver::new();
        assert_eq!(
            driver.column_type_sql(&ColumnType::Boolean, &ColumnTypeOptions::default()),
            "TINYINT(1)"
        );
    }

    #[test]
    fn placeholder_is_question_mark() {
        let driver = MySqlDriver::new();
        assert_eq!(driver.placeholder(1), "?");
        assert_eq!(driver.placeholder(3), "?");
    }

    #[test]
    fn drop_enum_type_is_unsupported() {
        let driver = MySqlDriver::new();
        assert_eq!(driver.drop_enum_type("orders_status"), None);
    }
}
