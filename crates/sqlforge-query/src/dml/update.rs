//! UPDATE compiler.

use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use sqlforge_core::{validate_identifier, DatabaseDriver, StatementResult, Value};

use crate::condition::{Condition, Conjunction};
use crate::config::{Config, QueryKind};
use crate::error::{QueryError, Result};
use crate::execution::{self, ExecOptions, Executor};
use crate::param::ParamBinder;

/// Builds an `UPDATE` statement. `set(obj)` captures assignments; `where`
/// reuses the same predicate normaliser as the select compiler (spec
/// §4.5 "UPDATE").
#[derive(Clone)]
pub struct UpdateBuilder {
    driver: Arc<dyn DatabaseDriver>,
    config: Arc<Config>,
    table: String,
    assignments: Vec<(String, Value)>,
    wheres: Vec<(Conjunction, Condition)>,
    timeout: Option<Duration>,
}

impl UpdateBuilder {
    pub fn new(driver: Arc<dyn DatabaseDriver>, config: Arc<Config>, table: impl Into<String>) -> Self {
        Self {
            driver,
            config,
            table: table.into(),
            assignments: Vec::new(),
            wheres: Vec::new(),
            timeout: None,
        }
    }

    /// `set(obj)`: merges entries into the assignment list, later calls
    /// overriding earlier ones for the same column.
    pub fn set(mut self, assignments: IndexMap<String, Value>) -> Self {
        for (column, value) in assignments {
            if let Some(existing) = self.assignments.iter_mut().find(|(c, _)| *c == column) {
                existing.1 = value;
            } else {
                self.assignments.push((column, value));
            }
        }
        self
    }

    pub fn where_cond(mut self, condition: Condition) -> Self {
        self.wheres.push((Conjunction::And, condition));
        self
    }

    pub fn or_where(mut self, condition: Condition) -> Self {
        self.wheres.push((Conjunction::Or, condition));
        self
    }

    /// Conjunction-of-equality shape from an object literal, reused by
    /// UPDATE's `where`.
    pub fn where_all(mut self, entries: IndexMap<String, Value>) -> Self {
        for condition in Condition::from_object(entries) {
            self.wheres.push((Conjunction::And, condition));
        }
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn compile(&self) -> Result<(String, Vec<Value>)> {
        if self.assignments.is_empty() {
            return Err(QueryError::BuilderState("update requires at least one assignment".into()));
        }
        validate_identifier(&self.table, "table")?;
        for (column, _) in &self.assignments {
            validate_identifier(column, "update assignment column")?;
        }

        let driver = self.driver.as_ref();
        let mut binder = ParamBinder::new(self.driver.clone());
        let quoted_table = driver.quote_identifier(&self.table);

        let set_clause = self
            .assignments
            .iter()
            .map(|(column, value)| {
                let quoted = driver.quote_identifier(column);
                let placeholder = binder.push(value.clone());
                format!("{quoted} = {placeholder}")
            })
            .collect::<Vec<_>>()
            .join(", ");

        let mut sql = format!("UPDATE {quoted_table} SET {set_clause}");

        if !self.wheres.is_empty() {
            let rendered = self
                .wheres
                .iter()
                .map(|(_, cond)| cond.render(driver, &mut binder))
                .collect::<Result<Vec<_>>>()?;
            let joined = crate::select::join_with_conjunctions(&self.wheres, &rendered);
            sql.push_str(&format!(" WHERE {joined}"));
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
        execution::run_statement(executor, &self.config, &sql, &params, QueryKind::Update, options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::Op;
    use sqlforge_core::Dialect;

    fn driver() -> Arc<dyn DatabaseDriver> {
        crate::test_support::stub_driver(Dialect::Postgres)
    }

    fn assignments(pairs: &[(&str, Value)]) -> IndexMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn set_and_where_bind_parameters_in_order() {
        let builder = UpdateBuilder::new(driver(), Arc::new(Config::default()), "users")
            .set(assignments(&[("name", Value::String("Ada".into()))]))
            .where_cond(Condition::triple("id", Op::Eq, Value::Int64(5)));
        let (sql, params) = builder.compile().unwrap();
        assert_eq!(sql, "UPDATE \"users\" SET \"name\" = $1 WHERE \"id\" = $2");
        assert_eq!(params, vec![Value::String("Ada".into()), Value::Int64(5)]);
    }

    #[test]
    fn later_set_call_overrides_earlier_assignment_for_same_column() {
        let builder = UpdateBuilder::new(driver(), Arc::new(Config::default()), "users")
            .set(assignments(&[("name", Value::String("Ada".into()))]))
            .set(assignments(&[("name", Value::String("Grace".into()))]));
        let (_, params) = builder.compile().unwrap();
        assert_eq!(params, vec![Value::String("Grace".into())]);
    }

    #[test]
    fn update_without_where_affects_every_row() {
        let builder =
            UpdateBuilder::new(driver(), Arc::new(Config::default()), "users").set(assignments(&[("active", Value::Bool(false))]));
        let (sql, _) = builder.compile().unwrap();
        assert_eq!(sql, "UPDATE \"users\" SET \"active\" = $1");
    }

    #[test]
    fn empty_assignment_set_is_rejected() {
        let builder = UpdateBuilder::new(driver(), Arc::new(Config::default()), "users");
        assert!(builder.compile().is_err());
    }
}
