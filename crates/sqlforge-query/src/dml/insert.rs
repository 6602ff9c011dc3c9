//! INSERT compiler.

use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use sqlforge_core::{validate_identifier, DatabaseDriver, Dialect, StatementResult, Value};

use crate::config::{Config, QueryKind};
use crate::error::{QueryError, Result};
use crate::execution::{self, ExecOptions, Executor};
use crate::param::ParamBinder;

/// Conflict-handling clause attached to an insert, covering
/// `insertOrIgnore`/`upsert`.
#[derive(Debug, Clone)]
enum ConflictClause {
    DoNothing,
    Upsert {
        conflict_columns: Vec<String>,
        merge_columns: Vec<String>,
    },
}

/// Builds an `INSERT` statement. `values(rows)` collects column names from
/// the first row; subsequent rows must carry the same columns.
#[derive(Clone)]
pub struct InsertBuilder {
    driver: Arc<dyn DatabaseDriver>,
    config: Arc<Config>,
    table: String,
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
    conflict: Option<ConflictClause>,
    returning: Vec<String>,
    timeout: Option<Duration>,
}

impl InsertBuilder {
    pub fn new(driver: Arc<dyn DatabaseDriver>, config: Arc<Config>, table: impl Into<String>) -> Self {
        Self {
            driver,
            config,
            table: table.into(),
            columns: Vec::new(),
            rows: Vec::new(),
            conflict: None,
            returning: Vec::new(),
            timeout: None,
        }
    }

    /// `values(row | rows)`: the first row's keys fix the column list for
    /// every row that follows.
    pub fn values(mut self, rows: Vec<IndexMap<String, Value>>) -> Result<Self> {
        for row in rows {
            if self.columns.is_empty() && self.rows.is_empty() {
                self.columns = row.keys().cloned().collect();
            } else if row.len() != self.columns.len() || !self.columns.iter().all(|c| row.contains_key(c)) {
                return Err(QueryError::BuilderState(
                    "insert rows must all carry the same columns as the first row".into(),
                ));
            }
            let values = self
                .columns
                .iter()
                .map(|c| row.get(c).cloned().unwrap_or(Value::Null))
                .collect();
            self.rows.push(values);
        }
        Ok(self)
    }

    /// `insertOrIgnore`: `ON CONFLICT DO NOTHING` (Postgres/SQLite) or
    /// `INSERT IGNORE INTO` (MySQL).
    pub fn insert_or_ignore(mut self) -> Self {
        self.conflict = Some(ConflictClause::DoNothing);
        self
    }

    /// `upsert(conflictCols, mergeCols)`; the conflicting rows themselves
    /// still go through `.values()`.
    pub fn upsert(mut self, conflict_columns: Vec<String>, merge_columns: Vec<String>) -> Self {
        self.conflict = Some(ConflictClause::Upsert {
            conflict_columns,
            merge_columns,
        });
        self
    }

    pub fn returning(mut self, columns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.returning = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn compile(&self) -> Result<(String, Vec<Value>)> {
        if self.rows.is_empty() {
            return Err(QueryError::BuilderState("insert requires at least one row".into()));
        }
        validate_identifier(&self.table, "table")?;
        for column in &self.columns {
            validate_identifier(column, "insert column")?;
        }
        for column in &self.returning {
            validate_identifier(column, "returning column")?;
        }
        if let Some(ConflictClause::Upsert {
            conflict_columns,
            merge_columns,
        }) = &self.conflict
        {
            for column in conflict_columns.iter().chain(merge_columns.iter()) {
                validate_identifier(column, "upsert column")?;
            }
        }

        let driver = self.driver.as_ref();
        let mut binder = ParamBinder::new(self.driver.clone());
        let quoted_table = driver.quote_identifier(&self.table);
        let quoted_columns = self
            .columns
            .iter()
            .map(|c| driver.quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", ");

        let mut value_groups = Vec::with_capacity(self.rows.len());
        for row in &self.rows {
            let placeholders = row.iter().map(|v| binder.push(v.clone())).collect::<Vec<_>>().join(", ");
            value_groups.push(format!("({placeholders})"));
        }

        let mysql_ignore = matches!(driver.dialect(), Dialect::MySql)
            && matches!(self.conflict, Some(ConflictClause::DoNothing));
        let verb = if mysql_ignore { "INSERT IGNORE INTO" } else { "INSERT INTO" };
        let mut sql = format!(
            "{verb} {quoted_table} ({quoted_columns}) VALUES {}",
            value_groups.join(", ")
        );

        match (&self.conflict, driver.dialect()) {
            (None, _) | (Some(ConflictClause::DoNothing), Dialect::MySql) => {}
            (Some(ConflictClause::DoNothing), _) => sql.push_str(" ON CONFLICT DO NOTHING"),
            (Some(ConflictClause::Upsert { merge_columns, .. }), Dialect::MySql) => {
                let set = merge_columns
                    .iter()
                    .map(|c| {
                        let q = driver.quote_identifier(c);
                        format!("{q} = VALUES({q})")
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                sql.push_str(&format!(" ON DUPLICATE KEY UPDATE {set}"));
            }
            (
                Some(ConflictClause::Upsert {
                    conflict_columns,
                    merge_columns,
                }),
                _,
            ) => {
                let conflict = conflict_columns
                    .iter()
                    .map(|c| driver.quote_identifier(c))
                    .collect::<Vec<_>>()
                    .join(", ");
                let set = merge_columns
                    .iter()
                    .map(|c| {
                        let q = driver.quote_identifier(c);
                        format!("{q} = EXCLUDED.{q}")
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                sql.push_str(&format!(" ON CONFLICT ({conflict}) DO UPDATE SET {set}"));
            }
        }

        if !self.returning.is_empty() && driver.capabilities().supports_returning {
            let cols = self
                .returning
                .iter()
                .map(|c| driver.quote_identifier(c))
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(&format!(" RETURNING {cols}"));
        }

        Ok((sql, binder.into_values()))
    }

    pub async fn execute(&self, executor: Executor<'_>) -> Result<StatementResult> {
        let (sql, params) = self.compile()?;
        let options = ExecOptions {
            timeout: self.timeout,
            abort: None,
            cache_ttl: None,
        };
        execution::run_statement(executor, &self.config, &sql, &params, QueryKind::Insert, options).await
    }

    /// Inserts a single row and returns its primary key, via `RETURNING id`
    /// where the dialect supports it and `LAST_INSERT_ID()` otherwise (spec
    /// §4.5 "for MySQL, `insertGetId` uses `LAST_INSERT_ID()` instead").
    pub async fn insert_get_id(&self, executor: Executor<'_>) -> Result<Value> {
        if self.driver.capabilities().supports_returning {
            let (sql, params) = self.clone().returning(["id"]).compile()?;
            let options = ExecOptions {
                timeout: self.timeout,
                abort: None,
                cache_ttl: None,
            };
            let result =
                execution::run_query(executor, &self.config, None, &sql, &params, QueryKind::Insert, options).await?;
            let row = result
                .rows
                .first()
                .ok_or_else(|| QueryError::BuilderState("insert returned no rows".into()))?;
            return row
                .get(0)
                .cloned()
                .ok_or_else(|| QueryError::BuilderState("returning id column missing".into()));
        }

        let result = self.execute(executor).await?;
        result
            .last_insert_id
            .ok_or_else(|| QueryError::BuilderState("driver did not report a last insert id".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlforge_core::Dialect;

    fn driver(dialect: Dialect) -> Arc<dyn DatabaseDriver> {
        crate::test_support::stub_driver(dialect)
    }

    fn row(pairs: &[(&str, Value)]) -> IndexMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn single_row_insert_binds_in_column_order() {
        let builder = InsertBuilder::new(driver(Dialect::Postgres), Arc::new(Config::default()), "users")
            .values(vec![row(&[
                ("name", Value::String("Ada".into())),
                ("email", Value::String("ada@example.com".into())),
            ])])
            .unwrap();
        let (sql, params) = builder.compile().unwrap();
        assert_eq!(sql, "INSERT INTO \"users\" (\"name\", \"email\") VALUES ($1, $2)");
        assert_eq!(params, vec![Value::String("Ada".into()), Value::String("ada@example.com".into())]);
    }

    #[test]
    fn multi_row_insert_produces_one_group_per_row() {
        let builder = InsertBuilder::new(driver(Dialect::Postgres), Arc::new(Config::default()), "users")
            .values(vec![
                row(&[("name", Value::String("Ada".into()))]),
                row(&[("name", Value::String("Grace".into()))]),
            ])
            .unwrap();
        let (sql, params) = builder.compile().unwrap();
        assert_eq!(sql, "INSERT INTO \"users\" (\"name\") VALUES ($1), ($2)");
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn mismatched_columns_across_rows_is_rejected() {
        let result = InsertBuilder::new(driver(Dialect::Postgres), Arc::new(Config::default()), "users").values(vec![
            row(&[("name", Value::String("Ada".into()))]),
            row(&[("email", Value::String("ada@example.com".into()))]),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn insert_or_ignore_on_postgres_emits_on_conflict_do_nothing() {
        let builder = InsertBuilder::new(driver(Dialect::Postgres), Arc::new(Config::default()), "users")
            .values(vec![row(&[("name", Value::String("Ada".into()))])])
            .unwrap()
            .insert_or_ignore();
        let (sql, _) = builder.compile().unwrap();
        assert!(sql.ends_with("ON CONFLICT DO NOTHING"));
    }

    #[test]
    fn insert_or_ignore_on_mysql_uses_insert_ignore() {
        let builder = InsertBuilder::new(driver(Dialect::MySql), Arc::new(Config::default()), "users")
            .values(vec![row(&[("name", Value::String("Ada".into()))])])
            .unwrap()
            .insert_or_ignore();
        let (sql, _) = builder.compile().unwrap();
        assert!(sql.starts_with("INSERT IGNORE INTO"));
    }

    #[test]
    fn upsert_on_postgres_emits_excluded_references() {
        let builder = InsertBuilder::new(driver(Dialect::Postgres), Arc::new(Config::default()), "users")
            .values(vec![row(&[
                ("email", Value::String("ada@example.com".into())),
                ("name", Value::String("Ada".into())),
            ])])
            .unwrap()
            .upsert(vec!["email".to_string()], vec!["name".to_string()]);
        let (sql, _) = builder.compile().unwrap();
        assert!(sql.contains("ON CONFLICT (\"email\") DO UPDATE SET \"name\" = EXCLUDED.\"name\""));
    }

    #[test]
    fn upsert_on_mysql_emits_on_duplicate_key_update() {
        let builder = InsertBuilder::new(driver(Dialect::MySql), Arc::new(Config::default()), "users")
            .values(vec![row(&[
                ("email", Value::String("ada@example.com".into())),
                ("name", Value::String("Ada".into())),
            ])])
            .unwrap()
            .upsert(vec!["email".to_string()], vec!["name".to_string()]);
        let (sql, _) = builder.compile().unwrap();
        assert!(sql.contains("ON DUPLICATE KEY UPDATE `name` = VALUES(`name`)"));
    }

    #[test]
    fn returning_is_appended_when_dialect_supports_it() {
        let builder = InsertBuilder::new(driver(Dialect::Postgres), Arc::new(Config::default()), "users")
            .values(vec![row(&[("name", Value::String("Ada".into()))])])
            .unwrap()
            .returning(["id"]);
        let (sql, _) = builder.compile().unwrap();
        assert!(sql.ends_with("RETURNING \"id\""));
    }

    #[test]
    fn returning_is_dropped_silently_on_mysql() {
        let builder = InsertBuilder::new(driver(Dialect::MySql), Arc::new(Config::default()), "users")
            .values(vec![row(&[("name", Value::String("Ada".into()))])])
            .unwrap()
            .returning(["id"]);
        let (sql, _) = builder.compile().unwrap();
        assert!(!sql.contains("RETURNING"));
    }

    #[test]
    fn empty_insert_is_rejected() {
        let builder = InsertBuilder::new(driver(Dialect::Postgres), Arc::new(Config::default()), "users");
        assert!(builder.compile().is_err());
    }

    #[test]
    fn unsafe_table_name_is_rejected() {
        let builder = InsertBuilder::new(
            driver(Dialect::Postgres),
            Arc::new(Config::default()),
            "users; DROP TABLE users",
        )
        .values(vec![row(&[("name", Value::String("Ada".into()))])])
        .unwrap();
        assert!(builder.compile().is_err());
    }
}
