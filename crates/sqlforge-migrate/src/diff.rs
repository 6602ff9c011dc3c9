//! Diffs two [`MigrationPlan`]s into dialect-correct DDL.

use sqlforge_core::{ColumnTypeOptions, DatabaseDriver, Dialect};

use crate::plan::{ColumnDefault, ColumnPlan, IndexKind, IndexPlan, MigrationPlan, TablePlan};

/// An accumulated migration: forward (`up`) and reverse (`down`) statements,
/// kept apart internally before being flattened to the plain `Vec<String>`
/// the public `diff` operation returns.
#[derive(Debug, Clone, Default)]
pub struct Migration {
    pub up_sql: Vec<String>,
    pub down_sql: Vec<String>,
}

impl Migration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_up(&mut self, sql: impl Into<String>) {
        self.up_sql.push(sql.into());
    }

    pub fn add_down(&mut self, sql: impl Into<String>) {
        self.down_sql.push(sql.into());
    }

    pub fn merge(&mut self, other: Migration) {
        self.up_sql.extend(other.up_sql);
        self.down_sql.extend(other.down_sql);
    }

    pub fn is_empty(&self) -> bool {
        self.up_sql.is_empty()
    }
}

/// Diffs `previous` against `next` and returns the ordered DDL statements
/// needed to reconcile the database. Emits a single
/// `-- no changes; nothing to apply` marker when the two plans require no
/// statements.
pub fn diff(previous: &MigrationPlan, next: &MigrationPlan, driver: &dyn DatabaseDriver) -> Vec<String> {
    let migration = build_migration(previous, next, driver);
    if migration.up_sql.is_empty() {
        vec!["-- no changes; nothing to apply".to_string()]
    } else {
        migration.up_sql
    }
}

fn build_migration(previous: &MigrationPlan, next: &MigrationPlan, driver: &dyn DatabaseDriver) -> Migration {
    let mut migration = Migration::new();

    for table in &next.tables {
        if previous.table(&table.name).is_none() {
            migration.merge(create_table_migration(table, driver));
        }
    }

    for table in &next.tables {
        if let Some(previous_table) = previous.table(&table.name) {
            migration.merge(alter_table_migration(previous_table, table, driver));
        }
    }

    for table in &previous.tables {
        if next.table(&table.name).is_none() {
            migration.merge(drop_table_migration(table, driver));
        }
    }

    migration
}

fn quote(driver: &dyn DatabaseDriver, name: &str) -> String {
    driver.quote_identifier(name)
}

/// Builds a column definition fragment for `CREATE`/`ADD COLUMN`.
///
/// Enum columns are rendered per-dialect: PostgreSQL references a named `CREATE TYPE ... AS ENUM`
/// declaration (via `opts.enum_type_name`, expected to have already been
/// emitted by [`enum_type_statements`]); MySQL inlines `ENUM(...)` in the
/// column type itself; SQLite falls back to `TEXT` plus a `CHECK (col IN
/// (...))` constraint, since the driver's `column_type_sql` has no column
/// name to build the constraint with.
fn column_definition(driver: &dyn DatabaseDriver, table: &str, column: &ColumnPlan) -> String {
    let opts = ColumnTypeOptions {
        enum_type_name: column
            .column_type
            .enum_values()
            .filter(|_| driver.dialect() == Dialect::Postgres)
            .map(|_| enum_type_name(table, &column.name)),
        ..Default::default()
    };
    let mut sql = format!(
        "{} {}",
        quote(driver, &column.name),
        driver.column_type_sql(&column.column_type, &opts)
    );
    if !column.nullable {
        sql.push_str(" NOT NULL");
    }
    match &column.default {
        ColumnDefault::Absent => {}
        ColumnDefault::Literal(value) => {
            sql.push_str(" DEFAULT ");
            sql.push_str(&literal_sql(value));
        }
        ColumnDefault::Expression(expr) => {
            sql.push_str(" DEFAULT ");
            sql.push_str(expr);
        }
    }
    if driver.dialect() == Dialect::Sqlite {
        if let Some(values) = column.column_type.enum_values() {
            let quoted_values = values
                .iter()
                .map(|v| format!("'{}'", v.replace('\'', "''")))
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(&format!(
                " CHECK ({} IN ({quoted_values}))",
                quote(driver, &column.name)
            ));
        }
    }
    sql
}

/// `CREATE TYPE` statements that must run before a `CREATE TABLE` on
/// PostgreSQL when the table declares enum columns, mapping each to a named
/// `CREATE TYPE` plus column.
fn enum_type_statements(table: &TablePlan, driver: &dyn DatabaseDriver) -> Vec<String> {
    if driver.dialect() != Dialect::Postgres {
        return Vec::new();
    }
    table
        .columns
        .iter()
        .filter_map(|column| {
            let values = column.column_type.enum_values()?;
            let quoted_values = values
                .iter()
                .map(|v| format!("'{}'", v.replace('\'', "''")))
                .collect::<Vec<_>>()
                .join(", ");
            Some(format!(
                "CREATE TYPE {} AS ENUM ({quoted_values})",
                quote(driver, &enum_type_name(&table.name, &column.name))
            ))
        })
        .collect()
}

fn literal_sql(value: &sqlforge_core::Value) -> String {
    use sqlforge_core::Value;
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => if *b { "TRUE".to_string() } else { "FALSE".to_string() },
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        other => other.to_string(),
    }
}

fn create_table_migration(table: &TablePlan, driver: &dyn DatabaseDriver) -> Migration {
    let mut migration = Migration::new();
    let quoted_table = quote(driver, &table.name);

    for statement in enum_type_statements(table, driver) {
        migration.add_up(statement);
    }

    let mut parts: Vec<String> = table
        .columns
        .iter()
        .map(|c| column_definition(driver, &table.name, c))
        .collect();

    if let Some(pk) = table.primary_key_column() {
        parts.push(format!("PRIMARY KEY ({})", quote(driver, &pk.name)));
    }

    for column in &table.columns {
        if let Some(reference) = &column.references {
            parts.push(format!(
                "FOREIGN KEY ({}) REFERENCES {}({})",
                quote(driver, &column.name),
                quote(driver, &reference.table),
                quote(driver, &reference.column),
            ));
        }
    }

    migration.add_up(format!(
        "CREATE TABLE {} (\n  {}\n)",
        quoted_table,
        parts.join(",\n  ")
    ));

    for index in &table.indexes {
        migration.add_up(create_index_sql(driver, &table.name, index));
    }

    migration.add_down(driver.drop_table(&table.name));
    for column in &table.columns {
        if column.column_type.enum_values().is_some() {
            if let Some(drop_type) = driver.drop_enum_type(&enum_type_name(&table.name, &column.name)) {
                migration.add_down(drop_type);
            }
        }
    }

    migration
}

fn drop_table_migration(table: &TablePlan, driver: &dyn DatabaseDriver) -> Migration {
    let mut migration = Migration::new();
    migration.add_up(driver.drop_table(&table.name));

    for column in &table.columns {
        if column.column_type.enum_values().is_some() {
            if let Some(drop_type) = driver.drop_enum_type(&enum_type_name(&table.name, &column.name)) {
                migration.add_up(drop_type);
            }
        }
    }

    let recreate = create_table_migration(table, driver);
    migration.add_down(
        recreate
            .up_sql
            .into_iter()
            .find(|s| s.starts_with("CREATE TABLE"))
            .expect("create_table_migration always emits a CREATE TABLE statement"),
    );
    migration
}

fn alter_table_migration(previous: &TablePlan, next: &TablePlan, driver: &dyn DatabaseDriver) -> Migration {
    let mut migration = Migration::new();
    let quoted_table = quote(driver, &next.name);

    for column in &next.columns {
        if previous.column(&column.name).is_none() {
            migration.add_up(format!(
                "ALTER TABLE {} ADD COLUMN {}",
                quoted_table,
                column_definition(driver, &next.name, column)
            ));
            migration.add_down(format!(
                "ALTER TABLE {} DROP COLUMN {}",
                quoted_table,
                quote(driver, &column.name)
            ));
        }
    }

    for column in &previous.columns {
        if next.column(&column.name).is_none() {
            migration.add_up(format!(
                "ALTER TABLE {} DROP COLUMN {}",
                quoted_table,
                quote(driver, &column.name)
            ));
            migration.add_down(format!(
                "ALTER TABLE {} ADD COLUMN {}",
                quoted_table,
                column_definition(driver, &previous.name, column)
            ));
        }
    }

    for next_column in &next.columns {
        if let Some(previous_column) = previous.column(&next_column.name) {
            if !previous_column.structurally_eq(next_column) {
                migration.merge(alter_column_migration(&next.name, &quoted_table, previous_column, next_column, driver));
            }
        }
    }

    for index in &next.indexes {
        match previous.index(&index.name) {
            None => migration.add_up(create_index_sql(driver, &next.name, index)),
            Some(previous_index) if previous_index.columns != index.columns => {
                migration.add_up(drop_index_sql(driver, &previous.name, &previous_index.name));
                migration.add_up(create_index_sql(driver, &next.name, index));
            }
            Some(_) => {}
        }
    }
    for index in &previous.indexes {
        if next.index(&index.name).is_none() {
            migration.add_up(drop_index_sql(driver, &previous.name, &index.name));
        }
    }

    migration
}

/// Emits the ALTER COLUMN sequence for a column whose type, default,
/// nullability, unique flag, or enum-value-list changed, respecting each
/// dialect's constraints. Each dialect renders
/// a column rebuild its own way; SQLite has no native `ALTER COLUMN`, so the
/// same textual statement is emitted there as a documented best-effort (the
/// driver is expected to run it inside a table-rebuild transaction).
fn alter_column_migration(
    table: &str,
    quoted_table: &str,
    previous: &ColumnPlan,
    next: &ColumnPlan,
    driver: &dyn DatabaseDriver,
) -> Migration {
    let mut migration = Migration::new();
    let quoted_column = quote(driver, &next.name);
    let opts = ColumnTypeOptions {
        enum_type_name: next
            .column_type
            .enum_values()
            .filter(|_| driver.dialect() == Dialect::Postgres)
            .map(|_| enum_type_name(table, &next.name)),
        ..Default::default()
    };

    if !previous.column_type.structurally_eq(&next.column_type) {
        let type_sql = driver.column_type_sql(&next.column_type, &opts);
        migration.add_up(match driver.dialect() {
            Dialect::Postgres => format!(
                "ALTER TABLE {quoted_table} ALTER COLUMN {quoted_column} TYPE {type_sql}"
            ),
            Dialect::MySql => format!(
                "ALTER TABLE {quoted_table} MODIFY COLUMN {quoted_column} {type_sql}"
            ),
            Dialect::Sqlite => format!(
                "ALTER TABLE {quoted_table} ALTER COLUMN {quoted_column} TYPE {type_sql}"
            ),
        });
    }

    if previous.nullable != next.nullable {
        migration.add_up(match driver.dialect() {
            Dialect::Postgres | Dialect::Sqlite => {
                let clause = if next.nullable { "DROP NOT NULL" } else { "SET NOT NULL" };
                format!("ALTER TABLE {quoted_table} ALTER COLUMN {quoted_column} {clause}")
            }
            Dialect::MySql => {
                let type_sql = driver.column_type_sql(&next.column_type, &opts);
                let null_clause = if next.nullable { "NULL" } else { "NOT NULL" };
                format!("ALTER TABLE {quoted_table} MODIFY COLUMN {quoted_column} {type_sql} {null_clause}")
            }
        });
    }

    if previous.default != next.default {
        migration.add_up(match &next.default {
            ColumnDefault::Absent => format!(
                "ALTER TABLE {quoted_table} ALTER COLUMN {quoted_column} DROP DEFAULT"
            ),
            ColumnDefault::Literal(value) => format!(
                "ALTER TABLE {quoted_table} ALTER COLUMN {quoted_column} SET DEFAULT {}",
                literal_sql(value)
            ),
            ColumnDefault::Expression(expr) => format!(
                "ALTER TABLE {quoted_table} ALTER COLUMN {quoted_column} SET DEFAULT {expr}"
            ),
        });
    }

    migration
}

fn create_index_sql(driver: &dyn DatabaseDriver, table: &str, index: &IndexPlan) -> String {
    let unique = if matches!(index.kind, IndexKind::Unique) { "UNIQUE " } else { "" };
    let columns = index
        .columns
        .iter()
        .map(|c| quote(driver, c))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "CREATE {unique}INDEX {} ON {} ({columns})",
        quote(driver, &index.name),
        quote(driver, table)
    )
}

fn drop_index_sql(driver: &dyn DatabaseDriver, table: &str, name: &str) -> String {
    match driver.dialect() {
        Dialect::MySql => format!("DROP INDEX {} ON {}", quote(driver, name), quote(driver, table)),
        Dialect::Postgres | Dialect::Sqlite => format!("DROP INDEX {}", quote(driver, name)),
    }
}

fn enum_type_name(table: &str, column: &str) -> String {
    format!("{table}_{column}_enum")
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlforge_core::Dialect;
    use sqlforge_schema::{AttributeDescriptor, ModelDefinition};

    fn driver(dialect: Dialect) -> Box<dyn DatabaseDriver> {
        match dialect {
            Dialect::Postgres => Box::new(sqlforge_driver_stub::PostgresStub),
            Dialect::MySql => Box::new(sqlforge_driver_stub::MySqlStub),
            Dialect::Sqlite => Box::new(sqlforge_driver_stub::SqliteStub),
        }
    }

    /// A minimal in-crate driver stand-in so `sqlforge-migrate`'s tests don't
    /// need a dependency on the concrete driver crates (which themselves
    /// depend on async database client libraries).
    mod sqlforge_driver_stub {
        use sqlforge_core::{ColumnType, ColumnTypeOptions, DatabaseDriver, Dialect, DriverCapabilities, JsonContainsMode};

        macro_rules! stub_driver {
            ($name:ident, $dialect:expr, $quote_open:expr, $quote_close:expr) => {
                pub struct $name;
                impl DatabaseDriver for $name {
                    fn dialect(&self) -> Dialect {
                        $dialect
                    }
                    fn capabilities(&self) -> DriverCapabilities {
                        DriverCapabilities::default()
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
                        false
                    }
                    fn random_function(&self) -> &'static str {
                        "RANDOM()"
                    }
                    fn shared_lock_syntax(&self) -> Option<&'static str> {
                        None
                    }
                    fn json_contains_operator(&self) -> JsonContainsMode {
                        JsonContainsMode::JsonExtract
                    }
                }
            };
        }

        stub_driver!(PostgresStub, Dialect::Postgres, '"', '"');
        stub_driver!(MySqlStub, Dialect::MySql, '`', '`');
        stub_driver!(SqliteStub, Dialect::Sqlite, '"', '"');
    }

    #[test]
    fn new_table_emits_create_table_and_indexes() {
        let models = vec![ModelDefinition::new("User")
            .attribute("email", AttributeDescriptor::new().unique())];
        let next = crate::builder::build_plan(&models, Dialect::Postgres).unwrap();
        let previous = MigrationPlan::new(Dialect::Postgres);

        let statements = diff(&previous, &next, driver(Dialect::Postgres).as_ref());
        assert!(statements[0].starts_with("CREATE TABLE \"users\""));
        assert!(statements.iter().any(|s| s.contains("CREATE UNIQUE INDEX")));
    }

    #[test]
    fn removed_table_emits_drop_table() {
        let models = vec![ModelDefinition::new("User")];
        let previous = crate::builder::build_plan(&models, Dialect::Postgres).unwrap();
        let next = MigrationPlan::new(Dialect::Postgres);

        let statements = diff(&previous, &next, driver(Dialect::Postgres).as_ref());
        assert_eq!(statements, vec!["DROP TABLE \"users\"".to_string()]);
    }

    #[test]
    fn identical_plans_produce_no_changes_marker() {
        let models = vec![ModelDefinition::new("User").timestamps()];
        let plan = crate::builder::build_plan(&models, Dialect::Postgres).unwrap();

        let statements = diff(&plan, &plan, driver(Dialect::Postgres).as_ref());
        assert_eq!(statements, vec!["-- no changes; nothing to apply".to_string()]);
    }

    #[test]
    fn enum_value_addition_emits_alter_column() {
        use sqlforge_core::ColumnType;
        use crate::plan::TablePlan;

        let mut previous_table = TablePlan::new("orders");
        previous_table.columns.push(ColumnPlan {
            name: "status".into(),
            column_type: ColumnType::Enum(vec!["pending".into(), "completed".into()]),
            nullable: false,
            default: ColumnDefault::Absent,
            unique: false,
            primary_key: false,
            references: None,
        });
        let mut next_table = previous_table.clone();
        next_table.columns[0].column_type = ColumnType::Enum(vec![
            "pending".into(),
            "processing".into(),
            "completed".into(),
            "cancelled".into(),
        ]);

        let previous = MigrationPlan {
            dialect: Dialect::Postgres,
            tables: vec![previous_table],
        };
        let next = MigrationPlan {
            dialect: Dialect::Postgres,
            tables: vec![next_table],
        };

        let statements = diff(&previous, &next, driver(Dialect::Postgres).as_ref());
        assert!(statements.iter().any(|s| s.contains("ALTER COLUMN")));
    }

    #[test]
    fn reordered_enum_values_produce_no_changes() {
        use sqlforge_core::ColumnType;
        use crate::plan::TablePlan;

        let mut table_a = TablePlan::new("orders");
        table_a.columns.push(ColumnPlan {
            name: "status".into(),
            column_type: ColumnType::Enum(vec!["completed".into(), "pending".into()]),
            nullable: false,
            default: ColumnDefault::Absent,
            unique: false,
            primary_key: false,
            references: None,
        });
        let mut table_b = table_a.clone();
        table_b.columns[0].column_type = ColumnType::Enum(vec!["pending".into(), "completed".into()]);

        let plan_a = MigrationPlan { dialect: Dialect::Postgres, tables: vec![table_a] };
        let plan_b = MigrationPlan { dialect: Dialect::Postgres, tables: vec![table_b] };

        let statements = diff(&plan_a, &plan_b, driver(Dialect::Postgres).as_ref());
        assert_eq!(statements, vec!["-- no changes; nothing to apply".to_string()]);
    }

    #[test]
    fn diff_round_trip_is_empty_after_applying_once() {
        let models_a = vec![ModelDefinition::new("User")];
        let models_b = vec![ModelDefinition::new("User").timestamps()];
        let plan_a = crate::builder::build_plan(&models_a, Dialect::Postgres).unwrap();
        let plan_b = crate::builder::build_plan(&models_b, Dialect::Postgres).unwrap();

        let first = diff(&plan_a, &plan_b, driver(Dialect::Postgres).as_ref());
        assert!(!first.is_empty());
        let second = diff(&plan_b, &plan_b, driver(Dialect::Postgres).as_ref());
        assert_eq!(second, vec!["-- no changes; nothing to apply".to_string()]);
    }
}
